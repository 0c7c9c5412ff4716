/// Judging Run - Dispatch and Lifecycle
///
/// **Responsibility:**
/// Own one submission from request to terminal event:
/// 1. Resolve the language and a per-request scratch directory
/// 2. Normalize test data (`cases::read_cases`)
/// 3. Hand off to the batch or interactive pipeline
/// 4. Run every registered cleanup, success or failure
/// 5. Emit exactly one `End` event
///
/// Pipelines return `Result<Verdict>`; any error is turned into a failure
/// progress event plus a terminal verdict here and nowhere else.

pub mod batch;
pub mod interactive;

use crate::cases::{self, CaseArgs};
use crate::error::{JudgeError, Result};
use crate::pool::WorkerPool;
use crate::report::Reporter;
use crate::sandbox::{Cleanup, Compiler, Executable, LanguageCatalog, LanguageSpec, Sandbox};
use anyhow::Context;
use arbiter_common::config::JudgeSettings;
use arbiter_common::types::{ExecutionResult, JudgeRequest, JudgeType, ProblemConfig, Progress, Verdict};
use arbiter_common::Status;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// External collaborators a run talks to
#[derive(Clone)]
pub struct Services {
    pub sandbox: Arc<dyn Sandbox>,
    pub compiler: Arc<dyn Compiler>,
    pub languages: Arc<dyn LanguageCatalog>,
}

/// Read-only state shared by every case of one run
pub struct JudgeContext<'a> {
    pub request: &'a JudgeRequest,
    pub services: &'a Services,
    pub settings: &'a JudgeSettings,
    pub reporter: &'a Reporter,
    pub config: ProblemConfig,
    pub lang: LanguageSpec,
    /// Scratch directory owned by this run
    pub tmp_dir: PathBuf,
    pub pool: WorkerPool,
    /// Environment handed to every sandboxed process
    pub env: BTreeMap<String, String>,
}

impl JudgeContext<'_> {
    pub fn lookup_lang(&self, key: &str) -> Result<LanguageSpec> {
        self.services
            .languages
            .lookup(key)
            .ok_or_else(|| JudgeError::system(format!("Language {} is not supported.", key), vec![]))
    }
}

/// Pending cleanups of a run
///
/// `run` invokes them in registration order; anything still pending when the
/// guard is dropped is spawned onto the current runtime.
#[derive(Default)]
pub struct CleanupGuard {
    pending: Vec<Cleanup>,
}

impl CleanupGuard {
    pub fn push(&mut self, cleanup: Cleanup) {
        self.pending.push(cleanup);
    }

    /// Move the executable's cleanup handle into the guard
    pub fn adopt(&mut self, executable: &mut Executable) {
        if let Some(cleanup) = executable.cleanup.take() {
            self.push(cleanup);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub async fn run(&mut self) {
        for cleanup in self.pending.drain(..) {
            if let Err(e) = cleanup().await {
                tracing::warn!(error = %e, "Cleanup failed");
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for cleanup in pending {
                        if let Err(e) = cleanup().await {
                            tracing::warn!(error = %e, "Cleanup failed");
                        }
                    }
                });
            }
            Err(_) => tracing::error!(count = pending.len(), "Cleanups dropped outside a runtime"),
        }
    }
}

/// Judge one request, streaming events to `reporter`
///
/// Always ends the stream with one `End` event carrying the returned verdict.
#[tracing::instrument(skip_all, fields(request_id = %request.id, lang = %request.lang))]
pub async fn run(request: &JudgeRequest, services: &Services, settings: &JudgeSettings, reporter: Reporter) -> Verdict {
    let mut guard = CleanupGuard::default();
    let outcome = judge(request, services, settings, &reporter, &mut guard).await;
    guard.run().await;

    let verdict = match outcome {
        Ok(verdict) => verdict,
        Err(e) => {
            let status = e.status();
            let text = e.describe();
            match &e {
                JudgeError::Compile { .. } => tracing::info!(status = %status, "Compile error"),
                _ => tracing::error!(status = %status, error = %text, "Judging failed"),
            }
            let mut progress = Progress::status(status).with_case(ExecutionResult::failure(status, text.clone()));
            if matches!(e, JudgeError::Compile { .. }) {
                progress = progress.with_compiler_text(text);
            }
            reporter.next(progress);
            Verdict::failure(status)
        }
    };

    tracing::info!(
        status = %verdict.status,
        score = verdict.score,
        time_ms = verdict.time_ms,
        memory_kb = verdict.memory_kb,
        "Judging finished"
    );
    reporter.end(verdict.clone());
    verdict
}

async fn judge(
    request: &JudgeRequest,
    services: &Services,
    settings: &JudgeSettings,
    reporter: &Reporter,
    guard: &mut CleanupGuard,
) -> Result<Verdict> {
    let lang = services
        .languages
        .lookup(&request.lang)
        .ok_or_else(|| JudgeError::system(format!("Language {} is not supported.", request.lang), vec![]))?;

    let tmp_dir = settings.tmp_dir.join(request.id.to_string());
    tokio::fs::create_dir_all(&tmp_dir).await?;
    let scratch = tmp_dir.clone();
    guard.push(Box::new(move || {
        async move {
            tokio::fs::remove_dir_all(&scratch)
                .await
                .with_context(|| format!("Failed to remove {}", scratch.display()))
        }
        .boxed()
    }));

    let overrides = match serde_yaml::to_value(&request.config) {
        Ok(serde_yaml::Value::Mapping(m)) => m,
        Ok(_) => serde_yaml::Mapping::new(),
        Err(e) => return Err(JudgeError::system("Invalid config overrides", vec![e.to_string()])),
    };
    let args = CaseArgs {
        key: request.key.as_deref(),
        self_submission: request.self_submission,
        reporter: Some(reporter),
    };
    let config = cases::read_cases(request.data_dir.as_deref(), overrides, &args, settings)?;

    let env = BTreeMap::from([("HYDRO_LANG".to_string(), request.lang.clone())]);
    let ctx = JudgeContext {
        request,
        services,
        settings,
        reporter,
        pool: WorkerPool::new(settings.parallelism),
        config,
        lang,
        tmp_dir,
        env,
    };

    tracing::info!(
        judge_type = %ctx.config.judge_type,
        count = ctx.config.count,
        parallelism = ctx.pool.size(),
        "Judging started"
    );
    match ctx.config.judge_type {
        JudgeType::Batch => batch::judge(&ctx, guard).await,
        JudgeType::Interactive => interactive::judge(&ctx, guard).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report;
    use crate::testing::{self, MockCompiler, MockSandbox};
    use arbiter_common::types::JudgeEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_guard_runs_every_cleanup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut guard = CleanupGuard::default();
        for _ in 0..3 {
            let counter = counter.clone();
            guard.push(Box::new(move || {
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
                .boxed()
            }));
        }
        guard.push(Box::new(|| async { anyhow::Result::<()>::Err(anyhow::anyhow!("already gone")) }.boxed()));
        assert_eq!(guard.len(), 4);
        guard.run().await;
        assert!(guard.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_guard_drop_spawns_leftovers() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let mut guard = CleanupGuard::default();
            guard.push(Box::new(move || {
                async move {
                    let _ = tx.send(());
                    anyhow::Ok(())
                }
                .boxed()
            }));
        }
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_language_is_system_error() {
        let tmp = tempfile::tempdir().unwrap();
        let services = testing::services(Arc::new(MockSandbox::accepting()), Arc::new(MockCompiler::default()));
        let settings = testing::settings(tmp.path());
        let request = JudgeRequest::new("cobol", "DISPLAY 'HI'.");
        let (reporter, mut rx) = report::channel();

        let verdict = run(&request, &services, &settings, reporter).await;
        assert_eq!(verdict.status, Status::SystemError);
        let events = testing::drain(&mut rx);
        assert!(matches!(events.last(), Some(JudgeEvent::End(v)) if v.status == Status::SystemError));
        assert_eq!(events.iter().filter(|e| matches!(e, JudgeEvent::End(_))).count(), 1);
    }

    #[tokio::test]
    async fn test_format_error_ends_with_system_error() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(data.path().join("config.yaml"), "type: interactive\n").unwrap();
        std::fs::write(data.path().join("1.in"), "1").unwrap();

        let services = testing::services(Arc::new(MockSandbox::accepting()), Arc::new(MockCompiler::default()));
        let settings = testing::settings(tmp.path());
        let mut request = JudgeRequest::new("cc", "int main(){}");
        request.data_dir = Some(data.path().to_path_buf());
        let (reporter, mut rx) = report::channel();

        let verdict = run(&request, &services, &settings, reporter).await;
        assert_eq!(verdict, Verdict::failure(Status::SystemError));
        let events = testing::drain(&mut rx);
        let failure = events.iter().find_map(|e| match e {
            JudgeEvent::Progress(p) => p.case.clone(),
            _ => None,
        });
        assert_eq!(failure.unwrap().message, "Interactive problem without an interactor.");
    }

    #[tokio::test]
    async fn test_scratch_directory_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let services = testing::services(Arc::new(MockSandbox::accepting()), Arc::new(MockCompiler::default()));
        let settings = testing::settings(tmp.path());
        let request = JudgeRequest::new("cc", "int main(){}");
        let (reporter, _rx) = report::channel();

        run(&request, &services, &settings, reporter).await;
        assert!(!tmp.path().join(request.id.to_string()).exists());
    }
}
