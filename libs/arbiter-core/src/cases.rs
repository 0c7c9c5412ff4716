/// Case Normalizer - Test Data → ProblemConfig
///
/// **Steps:**
/// 1. Merge the test-data config file (`config.yaml` > `config.yml` > `config.ini`)
///    over the caller's overrides; file keys win
/// 2. Read explicit `subtasks[].cases[]` (or a top-level `cases` list)
/// 3. With zero cases, fall back to filename discovery (`discovery.rs`)
/// 4. Assign global case ids, default scores and limits
/// 5. Check the secret key, then validate against `JudgeSettings`
///
/// Nothing here executes user code; every failure is a `FormatError`
/// except unreadable directories, which are system failures.

use crate::discovery::{self, FoundSubtask};
use crate::error::{FormatError, JudgeError, Result};
use crate::report::Reporter;
use arbiter_common::config::JudgeSettings;
use arbiter_common::types::{CaseSpec, JudgeType, ProblemConfig, Progress, ScorePolicy, SubtaskSpec};
use arbiter_common::units::{parse_memory_mb, parse_time_ms};
use arbiter_common::Status;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_TIME_MS: u64 = 1000;
const DEFAULT_MEMORY_MB: u64 = 256;
const SCORE_EPSILON: f64 = 1e-6;

/// Caller-side inputs that are not part of the test data
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseArgs<'a> {
    /// Key presented by the submitter; must match the config's key if it has one
    pub key: Option<&'a str>,
    pub self_submission: bool,
    pub reporter: Option<&'a Reporter>,
}

/// A time or memory limit, either a bare number or a string with a unit
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Limit {
    Number(f64),
    Text(String),
}

impl Limit {
    fn time_ms(&self) -> Result<u64> {
        match self {
            Limit::Number(n) => Ok(n.max(0.0).round() as u64),
            Limit::Text(s) => parse_time_ms(s).map_err(|e| FormatError::Invalid(e).into()),
        }
    }

    fn memory_mb(&self) -> Result<u64> {
        match self {
            Limit::Number(n) => Ok(n.max(0.0).ceil() as u64),
            Limit::Text(s) => parse_memory_mb(s).map_err(|e| FormatError::Invalid(e).into()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCase {
    input: Option<String>,
    output: Option<String>,
    score: Option<f64>,
    time: Option<Limit>,
    memory: Option<Limit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSubtask {
    id: Option<u32>,
    #[serde(rename = "type")]
    policy: Option<ScorePolicy>,
    score: Option<f64>,
    time: Option<Limit>,
    memory: Option<Limit>,
    #[serde(rename = "if")]
    depends_on: Vec<u32>,
    cases: Vec<RawCase>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(rename = "type")]
    judge_type: Option<JudgeType>,
    time: Option<Limit>,
    memory: Option<Limit>,
    subtasks: Vec<RawSubtask>,
    /// Shorthand for a single `sum` subtask
    cases: Vec<RawCase>,
    checker_type: Option<String>,
    checker: Option<String>,
    interactor: Option<String>,
    filename: Option<String>,
    user_extra_files: Vec<String>,
    judge_extra_files: Vec<String>,
    detail: Option<bool>,
    key: Option<String>,
}

struct DraftCase {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    score: Option<f64>,
    time_ms: u64,
    memory_mb: u64,
}

struct DraftSubtask {
    id: u32,
    policy: Option<ScorePolicy>,
    score: Option<f64>,
    time_ms: u64,
    memory_mb: u64,
    depends_on: Vec<u32>,
    cases: Vec<DraftCase>,
}

/// Resolves names in the config against the test-data folder
struct Files<'a> {
    folder: Option<&'a Path>,
}

impl Files<'_> {
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = match self.folder {
            Some(folder) => folder.join(name),
            None => PathBuf::from(name),
        };
        if path.exists() {
            Ok(path)
        } else {
            Err(FormatError::MissingFile(name.to_string()).into())
        }
    }

    fn resolve_opt(&self, name: Option<&str>) -> Result<Option<PathBuf>> {
        name.map(|n| self.resolve(n)).transpose()
    }

    fn resolve_all(&self, names: &[String]) -> Result<Vec<PathBuf>> {
        names.iter().map(|n| self.resolve(n)).collect()
    }
}

/// Convert the legacy `config.ini` line format
///
/// First line is the case count, then one `input|output|time_s|score|memory_kb`
/// line per case. Every line becomes its own subtask.
pub fn convert_ini(ini: &str) -> Result<Mapping> {
    let mut lines = ini.lines();
    let count: usize = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| FormatError::Invalid("Testcase count incorrect.".to_string()))?;

    let mut subtasks = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| FormatError::Invalid("Testcase count incorrect.".to_string()))?;
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 4 {
            return Err(FormatError::Invalid(format!("Malformed config.ini line: {}", line)).into());
        }
        let memory = fields
            .get(4)
            .and_then(|m| m.trim().parse::<u64>().ok())
            .map(|kb| format!("{}m", kb / 1024))
            .unwrap_or_else(|| format!("{}m", DEFAULT_MEMORY_MB));
        let score: f64 = fields[3]
            .trim()
            .parse()
            .map_err(|_| FormatError::Invalid(format!("Malformed score in config.ini: {}", fields[3])))?;

        let mut case = Mapping::new();
        case.insert("input".into(), format!("input/{}", fields[0].trim().to_lowercase()).into());
        case.insert("output".into(), format!("output/{}", fields[1].trim().to_lowercase()).into());

        let mut subtask = Mapping::new();
        subtask.insert("cases".into(), Value::Sequence(vec![Value::Mapping(case)]));
        subtask.insert("score".into(), score.into());
        subtask.insert("time".into(), format!("{}s", fields[2].trim()).into());
        subtask.insert("memory".into(), memory.into());
        subtasks.push(Value::Mapping(subtask));
    }

    let mut config = Mapping::new();
    config.insert("subtasks".into(), Value::Sequence(subtasks));
    Ok(config)
}

fn load_config_file(folder: &Path) -> Result<Option<Mapping>> {
    for name in ["config.yaml", "config.yml"] {
        let path = folder.join(name);
        if !path.exists() {
            continue;
        }
        let text = fs::read_to_string(&path)?;
        let value: Value = serde_yaml::from_str(&text)
            .map_err(|e| FormatError::Invalid(format!("Cannot parse {}: {}", name, e)))?;
        return match value {
            Value::Mapping(m) => Ok(Some(m)),
            Value::Null => Ok(Some(Mapping::new())),
            _ => Err(FormatError::Invalid(format!("{} must be a mapping", name)).into()),
        };
    }
    let ini = folder.join("config.ini");
    if ini.exists() {
        let text = fs::read_to_string(&ini)?;
        return convert_ini(&text).map(Some);
    }
    Ok(None)
}

/// Relative paths of every file in the folder and its `input/` `output/` subfolders
fn list_files(folder: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    for (sub, prefix) in [(None, ""), (Some("input"), "input/"), (Some("output"), "output/")] {
        let dir = match sub {
            Some(s) => folder.join(s),
            None => folder.to_path_buf(),
        };
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(format!("{}{}", prefix, entry.file_name().to_string_lossy()));
            }
        }
    }
    files.sort();
    Ok(files)
}

fn draft_case(raw: &RawCase, files: &Files, time_ms: u64, memory_mb: u64) -> Result<DraftCase> {
    let input = match raw.input.as_deref() {
        Some(name) => Some(files.resolve(name)?),
        None => return Err(FormatError::Invalid("Every case needs an input.".to_string()).into()),
    };
    Ok(DraftCase {
        input,
        output: files.resolve_opt(raw.output.as_deref())?,
        score: raw.score,
        time_ms: raw.time.as_ref().map(Limit::time_ms).transpose()?.unwrap_or(time_ms),
        memory_mb: raw.memory.as_ref().map(Limit::memory_mb).transpose()?.unwrap_or(memory_mb),
    })
}

fn draft_subtask(raw: &RawSubtask, position: usize, files: &Files, time_ms: u64, memory_mb: u64) -> Result<DraftSubtask> {
    let time_ms = raw.time.as_ref().map(Limit::time_ms).transpose()?.unwrap_or(time_ms);
    let memory_mb = raw.memory.as_ref().map(Limit::memory_mb).transpose()?.unwrap_or(memory_mb);
    let cases = raw
        .cases
        .iter()
        .map(|c| draft_case(c, files, time_ms, memory_mb))
        .collect::<Result<Vec<_>>>()?;
    Ok(DraftSubtask {
        id: raw.id.unwrap_or(position as u32 + 1),
        policy: raw.policy,
        score: raw.score,
        time_ms,
        memory_mb,
        depends_on: raw.depends_on.clone(),
        cases,
    })
}

fn merge_discovered(drafts: &mut Vec<DraftSubtask>, found: Vec<FoundSubtask>, files: &Files, time_ms: u64, memory_mb: u64) -> Result<()> {
    for subtask in found {
        let idx = match drafts.iter().position(|d| d.id == subtask.id) {
            Some(idx) => idx,
            None => {
                drafts.push(DraftSubtask {
                    id: subtask.id,
                    policy: None,
                    score: None,
                    time_ms,
                    memory_mb,
                    depends_on: Vec::new(),
                    cases: Vec::new(),
                });
                drafts.len() - 1
            }
        };
        let draft = &mut drafts[idx];
        draft.policy.get_or_insert(subtask.policy);
        for case in subtask.cases {
            draft.cases.push(DraftCase {
                input: Some(files.resolve(&case.input)?),
                output: files.resolve_opt(case.output.as_deref())?,
                score: None,
                time_ms: draft.time_ms,
                memory_mb: draft.memory_mb,
            });
        }
    }
    Ok(())
}

/// Fill in ids, default scores and policies
fn finalize(drafts: Vec<DraftSubtask>) -> Result<Vec<SubtaskSpec>> {
    let mut seen = HashSet::new();
    for d in &drafts {
        if !seen.insert(d.id) {
            return Err(FormatError::Invalid(format!("Duplicate subtask id {}.", d.id)).into());
        }
    }

    let subtask_count = drafts.len().max(1) as f64;
    let mut next_id = 1u32;
    let mut subtasks = Vec::with_capacity(drafts.len());
    for d in drafts {
        if d.cases.is_empty() {
            return Err(FormatError::Invalid(format!("Subtask {} has no testcases.", d.id)).into());
        }
        let policy = d.policy.unwrap_or_default();
        let score = d.score.unwrap_or(100.0 / subtask_count);

        if policy == ScorePolicy::Sum {
            let explicit: f64 = d.cases.iter().filter_map(|c| c.score).sum();
            if explicit > score + SCORE_EPSILON {
                return Err(FormatError::ScoreOverflow { subtask: d.id, score }.into());
            }
        }
        let default_case_score = match policy {
            ScorePolicy::Sum => score / d.cases.len() as f64,
            ScorePolicy::Min | ScorePolicy::Max => score,
        };

        let cases = d
            .cases
            .into_iter()
            .map(|c| {
                let id = next_id;
                next_id += 1;
                CaseSpec {
                    id,
                    input: c.input,
                    output: c.output,
                    score: c.score.unwrap_or(default_case_score),
                    time_ms: c.time_ms,
                    memory_mb: c.memory_mb,
                }
            })
            .collect();

        subtasks.push(SubtaskSpec {
            id: d.id,
            policy,
            score,
            time_ms: d.time_ms,
            memory_mb: d.memory_mb,
            depends_on: d.depends_on,
            cases,
        });
    }
    Ok(subtasks)
}

/// Every `if` reference exists and the dependency graph has no cycle
pub fn check_dependencies(subtasks: &[SubtaskSpec]) -> Result<()> {
    let deps: HashMap<u32, &[u32]> = subtasks.iter().map(|s| (s.id, s.depends_on.as_slice())).collect();
    for s in subtasks {
        if let Some(missing) = s.depends_on.iter().find(|d| !deps.contains_key(d)) {
            return Err(FormatError::UnknownDependency {
                subtask: s.id,
                dependency: *missing,
            }
            .into());
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    fn visit(id: u32, deps: &HashMap<u32, &[u32]>, marks: &mut HashMap<u32, Mark>) -> Result<()> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(FormatError::CyclicDependency(id).into()),
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        for dep in deps.get(&id).copied().unwrap_or_default() {
            visit(*dep, deps, marks)?;
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for s in subtasks {
        visit(s.id, &deps, &mut marks)?;
    }
    Ok(())
}

/// Ceilings from `JudgeSettings` plus checker/interactor presence
pub fn validate(config: &ProblemConfig, settings: &JudgeSettings) -> Result<()> {
    if config.count > settings.testcases_max {
        return Err(FormatError::TooManyCases {
            count: config.count,
            max: settings.testcases_max,
        }
        .into());
    }
    let total_time: u64 = config.cases().map(|c| c.time_ms).sum();
    if total_time > settings.total_time_limit_ms() {
        return Err(FormatError::TotalTimeTooLong(settings.total_time_limit).into());
    }
    let memory_max = settings.memory_max_mb();
    if config.cases().any(|c| c.memory_mb > memory_max) {
        return Err(FormatError::MemoryTooLarge(memory_max).into());
    }
    if !matches!(config.checker_type.as_str(), "default" | "strict") && config.checker.is_none() {
        return Err(FormatError::MissingChecker.into());
    }
    if config.judge_type == JudgeType::Interactive {
        if config.interactor.is_none() {
            return Err(FormatError::MissingInteractor.into());
        }
        if config.count == 0 {
            return Err(FormatError::NoCases.into());
        }
    }
    Ok(())
}

/// Normalize a test-data folder (or inline config only, with `folder = None`)
pub fn read_cases(
    folder: Option<&Path>,
    overrides: Mapping,
    args: &CaseArgs,
    settings: &JudgeSettings,
) -> Result<ProblemConfig> {
    let mut merged = overrides;
    if let Some(folder) = folder {
        if let Some(file) = load_config_file(folder)? {
            for (k, v) in file {
                merged.insert(k, v);
            }
        }
    }
    let raw: RawConfig = serde_yaml::from_value(Value::Mapping(merged))
        .map_err(|e| FormatError::Invalid(format!("Invalid config: {}", e)))?;

    let files = Files { folder };
    let judge_type = raw.judge_type.unwrap_or_default();
    let time_ms = raw.time.as_ref().map(Limit::time_ms).transpose()?.unwrap_or(DEFAULT_TIME_MS);
    let memory_mb = raw.memory.as_ref().map(Limit::memory_mb).transpose()?.unwrap_or(DEFAULT_MEMORY_MB);

    let mut drafts = raw
        .subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| draft_subtask(s, i, &files, time_ms, memory_mb))
        .collect::<Result<Vec<_>>>()?;
    if !raw.cases.is_empty() {
        let shorthand = RawSubtask {
            id: None,
            policy: Some(ScorePolicy::Sum),
            ..Default::default()
        };
        let mut draft = draft_subtask(&shorthand, drafts.len(), &files, time_ms, memory_mb)?;
        draft.cases = raw
            .cases
            .iter()
            .map(|c| draft_case(c, &files, time_ms, memory_mb))
            .collect::<Result<Vec<_>>>()?;
        drafts.push(draft);
    }

    if drafts.iter().all(|d| d.cases.is_empty()) {
        if let Some(folder) = folder {
            let listing = list_files(folder).map_err(|e| {
                JudgeError::system("Cannot parse testdata.", vec![e.to_string()])
            })?;
            let found = discovery::discover(&listing, judge_type == JudgeType::Interactive);
            merge_discovered(&mut drafts, found, &files, time_ms, memory_mb)?;
        }
    }

    let subtasks = finalize(drafts)?;
    check_dependencies(&subtasks)?;
    let count = subtasks.iter().map(|s| s.cases.len()).sum();

    let config = ProblemConfig {
        judge_type,
        subtasks,
        count,
        time_ms,
        memory_mb,
        checker_type: raw.checker_type.unwrap_or_else(|| "default".to_string()),
        checker: files.resolve_opt(raw.checker.as_deref())?,
        interactor: files.resolve_opt(raw.interactor.as_deref())?,
        filename: raw.filename,
        user_extra_files: files.resolve_all(&raw.user_extra_files)?,
        judge_extra_files: files.resolve_all(&raw.judge_extra_files)?,
        detail: raw.detail.unwrap_or(true),
        key: raw.key,
    };

    if args.self_submission {
        if let Some(reporter) = args.reporter {
            reporter.next(Progress::status(Status::Judging).with_message(format!("Found {} testcases.", count)));
        }
    }

    match config.key.as_deref() {
        Some(key) if args.key != Some(key) => return Err(FormatError::IncorrectKey.into()),
        Some(_) => {}
        None => validate(&config, settings)?,
    }

    tracing::debug!(
        subtasks = config.subtasks.len(),
        count = config.count,
        judge_type = %config.judge_type,
        "Test data normalized"
    );
    Ok(config)
}
