// Process-wide judge configuration
// Read once per run: config/judge.json (optional), then environment overrides

use crate::units::parse_memory_mb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    /// Ceiling on the number of cases in one problem
    pub testcases_max: usize,
    /// Ceiling on the sum of all case time limits, in seconds
    pub total_time_limit: u64,
    /// Ceiling on any single case memory limit, e.g. "1g"
    pub memory_max: String,
    /// Concurrent case executions per submission
    pub parallelism: usize,
    pub tmp_dir: PathBuf,
    pub redis_url: String,
    pub languages_path: PathBuf,
    /// testlib.h copied next to interactors when present
    pub testlib_path: Option<PathBuf>,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            testcases_max: 100,
            total_time_limit: 60,
            memory_max: "1g".to_string(),
            parallelism: 2,
            tmp_dir: std::env::temp_dir().join("arbiter"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            languages_path: PathBuf::from("config/languages.json"),
            testlib_path: None,
        }
    }
}

impl JudgeSettings {
    /// Load settings from a JSON file
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read {}: {}", config_path.display(), e))?;
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse {}: {}", config_path.display(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load config/judge.json when it exists, defaults otherwise, then apply env overrides
    pub fn load_default() -> Result<Self, String> {
        let default_path = Path::new("config/judge.json");
        let settings = if default_path.exists() {
            Self::load(default_path)?
        } else {
            Self::default()
        };
        let settings = settings.with_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Apply JUDGE_* / REDIS_URL environment overrides
    pub fn with_env(mut self) -> Self {
        if let Some(v) = env_parse("JUDGE_TESTCASES_MAX") {
            self.testcases_max = v;
        }
        if let Some(v) = env_parse("JUDGE_TOTAL_TIME_LIMIT") {
            self.total_time_limit = v;
        }
        if let Ok(v) = std::env::var("JUDGE_MEMORY_MAX") {
            self.memory_max = v;
        }
        if let Some(v) = env_parse("JUDGE_PARALLELISM") {
            self.parallelism = v;
        }
        if let Ok(v) = std::env::var("JUDGE_TMP_DIR") {
            self.tmp_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("JUDGE_TESTLIB") {
            self.testlib_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis_url = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        parse_memory_mb(&self.memory_max)?;
        if self.parallelism == 0 {
            return Err("parallelism must be at least 1".to_string());
        }
        Ok(())
    }

    /// Memory ceiling in megabytes
    pub fn memory_max_mb(&self) -> u64 {
        // validated on load; fall back to the default ceiling otherwise
        parse_memory_mb(&self.memory_max).unwrap_or(1024)
    }

    pub fn total_time_limit_ms(&self) -> u64 {
        self.total_time_limit * 1000
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
