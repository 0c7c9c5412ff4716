use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// How a subtask folds its case scores
///
/// - `sum`: add case scores (partial credit per case)
/// - `max`: best single case wins
/// - `min`: start from the full subtask score, degrade to the worst case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScorePolicy {
    #[default]
    Min,
    Max,
    Sum,
}

impl ScorePolicy {
    /// Aggregate value before any case has been folded in
    pub fn initial(self, full_score: f64) -> f64 {
        match self {
            ScorePolicy::Min => full_score,
            ScorePolicy::Max | ScorePolicy::Sum => 0.0,
        }
    }

    pub fn fold(self, acc: f64, score: f64) -> f64 {
        match self {
            ScorePolicy::Sum => acc + score,
            ScorePolicy::Max => acc.max(score),
            ScorePolicy::Min => acc.min(score),
        }
    }
}

impl fmt::Display for ScorePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScorePolicy::Min => write!(f, "min"),
            ScorePolicy::Max => write!(f, "max"),
            ScorePolicy::Sum => write!(f, "sum"),
        }
    }
}

/// Which execution pipeline judges a problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JudgeType {
    /// Single program, single input, binary score
    #[default]
    #[serde(alias = "run", alias = "default")]
    Batch,
    /// Submission and interactor run as a connected pair
    Interactive,
}

impl fmt::Display for JudgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JudgeType::Batch => write!(f, "batch"),
            JudgeType::Interactive => write!(f, "interactive"),
        }
    }
}

/// One normalized test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSpec {
    /// 1-based, unique across the whole problem
    pub id: u32,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// Weight of this case; case results score within `[0, score]`
    pub score: f64,
    pub time_ms: u64,
    pub memory_mb: u64,
}

/// One normalized subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub id: u32,
    pub policy: ScorePolicy,
    pub score: f64,
    pub time_ms: u64,
    pub memory_mb: u64,
    /// Subtask ids that must be accepted before this one counts
    #[serde(default)]
    pub depends_on: Vec<u32>,
    pub cases: Vec<CaseSpec>,
}

/// Normalized problem description produced by the case normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub judge_type: JudgeType,
    pub subtasks: Vec<SubtaskSpec>,
    /// Total number of cases across all subtasks
    pub count: usize,
    pub time_ms: u64,
    pub memory_mb: u64,
    pub checker_type: String,
    pub checker: Option<PathBuf>,
    pub interactor: Option<PathBuf>,
    /// Named input/output file instead of standard streams
    pub filename: Option<String>,
    pub user_extra_files: Vec<PathBuf>,
    pub judge_extra_files: Vec<PathBuf>,
    pub detail: bool,
    pub key: Option<String>,
}

impl ProblemConfig {
    pub fn cases(&self) -> impl Iterator<Item = &CaseSpec> {
        self.subtasks.iter().flat_map(|s| s.cases.iter())
    }
}

/// Classified result of one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub case_id: u32,
    pub subtask_id: u32,
    pub status: Status,
    pub score: f64,
    /// Exit code of the submission
    pub code: i32,
    pub time_ms: u64,
    pub memory_kb: u64,
    pub message: String,
}

impl ExecutionResult {
    /// Result carrying only a status and a message, used for run-level failures
    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Self {
            case_id: 0,
            subtask_id: 0,
            status,
            score: 0.0,
            code: 0,
            time_ms: 0,
            memory_kb: 0,
            message: message.into(),
        }
    }
}

/// Final summary of one judged submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: Status,
    pub score: f64,
    pub time_ms: u64,
    pub memory_kb: u64,
}

impl Verdict {
    pub fn failure(status: Status) -> Self {
        Self {
            status,
            score: 0.0,
            time_ms: 0,
            memory_kb: 0,
        }
    }
}

/// Incremental progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<ExecutionResult>,
    /// Percentage, 0..=100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_text: Option<String>,
}

impl Progress {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            case: None,
            progress: None,
            message: None,
            compiler_text: None,
        }
    }

    pub fn with_case(mut self, case: ExecutionResult) -> Self {
        self.case = Some(case);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_compiler_text(mut self, text: impl Into<String>) -> Self {
        self.compiler_text = Some(text.into());
        self
    }
}

/// Event stream produced by one judging run:
/// zero or more `Progress`, then exactly one `End`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JudgeEvent {
    Progress(Progress),
    End(Verdict),
}

/// A submission handed to the judge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub id: Uuid,
    pub lang: String,
    pub code: String,
    /// Test-data directory; absent for self-tests driven only by `config`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Standard input for self-test runs
    #[serde(default)]
    pub input: Option<String>,
    /// Raw config overrides; the test-data config file wins on conflict
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Secret key for privileged re-judging
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub self_submission: bool,
    pub submitted_at: DateTime<Utc>,
}

impl JudgeRequest {
    pub fn new(lang: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lang: lang.into(),
            code: code.into(),
            data_dir: None,
            input: None,
            config: serde_json::Map::new(),
            key: None,
            self_submission: false,
            submitted_at: Utc::now(),
        }
    }
}

/// Stored outcome of one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub request_id: Uuid,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
