/// Sandbox and Compiler Contracts
///
/// **Boundary:**
/// The judging core never spawns processes itself. Every execution goes
/// through a `Sandbox`, every build through a `Compiler`. Implementations
/// own isolation and resource accounting; the core only reads the numbers
/// they report and classifies them.
///
/// **Suspension points:**
/// `compile`, `run` and `run_piped` are the only awaits in a judging run
/// that wait on the outside world.

use arbiter_common::Status;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where a file copied into the sandbox comes from
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    /// A file on the judge host
    Path(PathBuf),
    /// Literal content
    Content(String),
}

/// Files to place in the sandbox working directory, keyed by name
pub type CopyIn = BTreeMap<String, FileSource>;

/// Deferred release of sandbox-side state created by a compile
///
/// Nothing happens until the closure is called; the returned future does the work.
pub type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Language entry the compiler and the analysis step need
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageSpec {
    pub key: String,
    /// Build command; interpreted languages leave it empty
    pub compile: Option<String>,
    pub execute: String,
    /// Name the source is written under
    pub code_file: String,
    /// Multiplier applied to every time limit for this language
    pub time_limit_rate: f64,
    /// Optional diagnostic command run after a failed self-test
    pub analysis: Option<String>,
}

/// Lookup of configured languages by key ("cc", "py3", ...)
pub trait LanguageCatalog: Send + Sync {
    fn lookup(&self, key: &str) -> Option<LanguageSpec>;
}

/// A compiled, runnable program
pub struct Executable {
    /// Command line that starts the program inside the sandbox
    pub execute: String,
    /// Sandbox-side handle of the compiled artifact, passed back on every run
    pub artifact: Option<String>,
    /// Files every run of this program needs
    pub copy_in: CopyIn,
    pub time_multiplier: f64,
    /// Taken by the judge right after compiling
    pub cleanup: Option<Cleanup>,
}

impl Executable {
    /// Run spec for this program with the given limits
    pub fn run_spec(&self, time_ms: u64, memory_mb: u64) -> RunSpec {
        RunSpec {
            execute: self.execute.clone(),
            artifact: self.artifact.clone(),
            copy_in: self.copy_in.clone(),
            time_ms,
            memory_mb,
            ..Default::default()
        }
    }

    /// Scale a nominal time limit by this program's multiplier
    pub fn scaled_time(&self, time_ms: u64) -> u64 {
        (time_ms as f64 * self.time_multiplier).round() as u64
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("execute", &self.execute)
            .field("artifact", &self.artifact)
            .field("copy_in", &self.copy_in.keys().collect::<Vec<_>>())
            .field("time_multiplier", &self.time_multiplier)
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// Why a compile produced no executable
#[derive(Debug, thiserror::Error)]
pub enum CompileFailure {
    /// The source is at fault; the run ends with Compile Error
    #[error("compile error")]
    Compile { stdout: String, stderr: String },
    /// The compiler could not be driven at all
    #[error(transparent)]
    System(#[from] anyhow::Error),
}

impl From<CompileFailure> for crate::JudgeError {
    fn from(e: CompileFailure) -> Self {
        match e {
            CompileFailure::Compile { stdout, stderr } => crate::JudgeError::Compile { stdout, stderr },
            CompileFailure::System(e) => e.into(),
        }
    }
}

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        lang: &LanguageSpec,
        source: FileSource,
        copy_in: CopyIn,
    ) -> Result<Executable, CompileFailure>;
}

/// One sandboxed execution request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSpec {
    pub execute: String,
    pub artifact: Option<String>,
    /// Host file fed to standard input; `None` leaves stdin empty
    pub stdin: Option<PathBuf>,
    /// Host file receiving standard output; `None` captures it in `RunResult::stdout`
    pub stdout: Option<PathBuf>,
    /// Host file receiving standard error; `None` captures it in `RunResult::stderr`
    pub stderr: Option<PathBuf>,
    pub copy_in: CopyIn,
    /// Files to read back after the run; a trailing `?` marks a file optional
    pub copy_out: Vec<String>,
    pub time_ms: u64,
    pub memory_mb: u64,
    pub env: BTreeMap<String, String>,
}

/// What the sandbox observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    /// The sandbox's own verdict; Accepted means it saw a clean exit
    pub status: Status,
    pub code: i32,
    pub time_ms: u64,
    pub memory_kb: u64,
    pub stdout: String,
    pub stderr: String,
    /// Contents of `copy_out` files that existed, keyed without the `?`
    pub files: BTreeMap<String, String>,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, spec: RunSpec) -> anyhow::Result<RunResult>;

    /// Run two programs concurrently with `a`'s stdout wired to `b`'s stdin
    /// and `b`'s stdout wired to `a`'s stdin
    async fn run_piped(&self, a: RunSpec, b: RunSpec) -> anyhow::Result<(RunResult, RunResult)>;
}
