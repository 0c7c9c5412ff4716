use arbiter_common::Status;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JudgeError>;

/// Malformed or over-limit test data; raised before anything executes
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("Too many testcases ({count} > {max}). Cancelled.")]
    TooManyCases { count: usize, max: usize },
    #[error("Total time limit longer than {0}s. Cancelled.")]
    TotalTimeTooLong(u64),
    #[error("Memory limit larger than memory_max ({0}MB).")]
    MemoryTooLarge(u64),
    #[error("You did not specify a checker.")]
    MissingChecker,
    #[error("Interactive problem without an interactor.")]
    MissingInteractor,
    #[error("No testcases found.")]
    NoCases,
    #[error("Incorrect secret key")]
    IncorrectKey,
    #[error("File {0} not found.")]
    MissingFile(String),
    #[error("Subtask {subtask} depends on unknown subtask {dependency}.")]
    UnknownDependency { subtask: u32, dependency: u32 },
    #[error("Subtask dependencies form a cycle through subtask {0}.")]
    CyclicDependency(u32),
    #[error("Case scores of subtask {subtask} add up to more than {score}.")]
    ScoreOverflow { subtask: u32, score: f64 },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error)]
pub enum JudgeError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Compile Error")]
    Compile { stdout: String, stderr: String },
    #[error("{message}")]
    System { message: String, params: Vec<String> },
}

impl JudgeError {
    pub fn system(message: impl Into<String>, params: Vec<String>) -> Self {
        JudgeError::System {
            message: message.into(),
            params,
        }
    }

    /// Status the terminal verdict carries when a run stops on this error
    pub fn status(&self) -> Status {
        match self {
            JudgeError::Compile { .. } => Status::CompileError,
            JudgeError::Format(_) | JudgeError::System { .. } => Status::SystemError,
        }
    }

    /// Human-readable text for the failure progress event
    pub fn describe(&self) -> String {
        match self {
            JudgeError::Format(e) => e.to_string(),
            JudgeError::Compile { stdout, stderr } => crate::compiler_text(stdout, stderr),
            JudgeError::System { message, params } if params.is_empty() => message.clone(),
            JudgeError::System { message, params } => {
                format!("{}\n{}", message, params.join("\n"))
            }
        }
    }
}

impl From<std::io::Error> for JudgeError {
    fn from(e: std::io::Error) -> Self {
        JudgeError::system("I/O failure", vec![e.to_string()])
    }
}

impl From<anyhow::Error> for JudgeError {
    fn from(e: anyhow::Error) -> Self {
        JudgeError::system(e.to_string(), e.chain().skip(1).map(|c| c.to_string()).collect())
    }
}
