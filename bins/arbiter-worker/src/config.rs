// Language configuration management for the Arbiter worker
use anyhow::{bail, Context, Result};
use arbiter_core::sandbox::{LanguageCatalog, LanguageSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub key: String,
    /// Docker image the program is built and run in; falls back to `default_image`
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub compile: Option<String>,
    pub execute: String,
    pub code_file: String,
    #[serde(default = "default_rate")]
    pub time_limit_rate: f64,
    #[serde(default)]
    pub analysis: Option<String>,
}

fn default_rate() -> f64 {
    1.0
}

fn default_image() -> String {
    "arbiter-runner:latest".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    #[serde(default = "default_image")]
    default_image: String,
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
    default_image: String,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            if lang.time_limit_rate <= 0.0 {
                bail!("time_limit_rate of {} must be positive", lang.key);
            }
            if configs.insert(lang.key.clone(), lang).is_some() {
                bail!("Duplicate language entry");
            }
        }

        Ok(Self {
            configs,
            default_image: languages_json.default_image,
        })
    }

    /// Load with default path (config/languages.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new("config/languages.json"))
    }

    pub fn get_config(&self, key: &str) -> Result<&LanguageConfig> {
        self.configs
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", key))
    }

    /// Docker image for a language, or the default runner image
    pub fn image_for(&self, key: &str) -> &str {
        self.configs
            .get(key)
            .and_then(|c| c.image.as_deref())
            .unwrap_or(&self.default_image)
    }

    pub fn default_image(&self) -> &str {
        &self.default_image
    }

    /// List all supported languages, sorted
    pub fn list_languages(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.configs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl LanguageCatalog for LanguageConfigManager {
    fn lookup(&self, key: &str) -> Option<LanguageSpec> {
        self.configs.get(key).map(|c| LanguageSpec {
            key: c.key.clone(),
            compile: c.compile.clone(),
            execute: c.execute.clone(),
            code_file: c.code_file.clone(),
            time_limit_rate: c.time_limit_rate,
            analysis: c.analysis.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "default_image": "runner:test",
        "languages": [
            { "key": "cc", "image": "gcc:13", "compile": "g++ -O2 foo.cc -o foo", "execute": "/w/foo", "code_file": "foo.cc" },
            { "key": "py3", "execute": "python3 foo.py", "code_file": "foo.py", "time_limit_rate": 2.0, "analysis": "python3 /analyze.py" }
        ]
    }"#;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("languages.json");
        fs::write(&path, SAMPLE).unwrap();

        let manager = LanguageConfigManager::load(&path).unwrap();
        assert_eq!(manager.list_languages(), vec!["cc".to_string(), "py3".to_string()]);
        assert_eq!(manager.get_config("cc").unwrap().time_limit_rate, 1.0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LanguageConfigManager::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_lookup_builds_language_spec() {
        let manager = LanguageConfigManager::parse(SAMPLE).unwrap();
        let py3 = manager.lookup("py3").unwrap();
        assert_eq!(py3.compile, None);
        assert_eq!(py3.time_limit_rate, 2.0);
        assert_eq!(py3.analysis.as_deref(), Some("python3 /analyze.py"));
        assert!(manager.lookup("cobol").is_none());
    }

    #[test]
    fn test_image_falls_back_to_default() {
        let manager = LanguageConfigManager::parse(SAMPLE).unwrap();
        assert_eq!(manager.image_for("cc"), "gcc:13");
        assert_eq!(manager.image_for("py3"), "runner:test");
        assert_eq!(manager.image_for("cobol"), "runner:test");
    }

    #[test]
    fn test_rejects_duplicates_and_bad_rates() {
        let dup = r#"{ "languages": [
            { "key": "cc", "execute": "/w/foo", "code_file": "foo.cc" },
            { "key": "cc", "execute": "/w/foo", "code_file": "foo.cc" }
        ] }"#;
        assert!(LanguageConfigManager::parse(dup).is_err());

        let rate = r#"{ "languages": [
            { "key": "cc", "execute": "/w/foo", "code_file": "foo.cc", "time_limit_rate": 0 }
        ] }"#;
        assert!(LanguageConfigManager::parse(rate).is_err());
    }
}
