/// Batch Pipeline - One Program, One Input, Binary Score
///
/// **Flow:**
/// 1. Compile with `user_extra_files` attached
/// 2. Write the input to `<tmp>/0.in`, run once
/// 3. Classify the sandbox result, emit the case
/// 4. On WA/RE, optionally run the language's analysis command for hints
///
/// Score is 100 when accepted, 0 otherwise.

use super::{CleanupGuard, JudgeContext};
use crate::error::Result;
use crate::sandbox::{CopyIn, FileSource, RunResult, RunSpec};
use crate::{signals, truncate, MAX_MESSAGE_CHARS};
use arbiter_common::types::{ExecutionResult, Progress, Verdict};
use arbiter_common::Status;
use std::path::{Path, PathBuf};

const ANALYSIS_TIME_MS: u64 = 5000;
const ANALYSIS_MEMORY_MB: u64 = 256;
const ANALYSIS_OUTPUT_CHARS: usize = 1024;

/// Exit-code note shown above the program's output
pub fn exit_note(code: i32) -> String {
    match signals::name(code) {
        Some(signal) => format!("ExitCode: {} ({})", code, signal),
        None => format!("ExitCode: {}", code),
    }
}

/// Status of a finished run plus the note to prepend to its output
///
/// Limits the sandbox enforced itself are kept as reported. A clean exit is
/// still checked against the measured time and memory.
pub fn classify(result: &RunResult, time_ms: u64, memory_mb: u64) -> (Status, Option<String>) {
    match result.status {
        Status::TimeLimitExceeded | Status::MemoryLimitExceeded => (result.status, None),
        _ if result.code != 0 => (Status::RuntimeError, Some(exit_note(result.code))),
        Status::Accepted if result.time_ms > time_ms => (Status::TimeLimitExceeded, None),
        Status::Accepted if result.memory_kb > memory_mb.saturating_mul(1024) => (Status::MemoryLimitExceeded, None),
        status => (status, None),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn read_or(path: &Path, fallback: &str) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(_) => fallback.to_string(),
    }
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request.id))]
pub async fn judge(ctx: &JudgeContext<'_>, guard: &mut CleanupGuard) -> Result<Verdict> {
    ctx.reporter.next(Progress::status(Status::Compiling));
    let extra: CopyIn = ctx
        .config
        .user_extra_files
        .iter()
        .map(|p| (file_name(p), FileSource::Path(p.clone())))
        .collect();
    let compiled = ctx
        .services
        .compiler
        .compile(&ctx.lang, FileSource::Content(ctx.request.code.clone()), extra)
        .await;
    let mut exe = compiled?;
    guard.adopt(&mut exe);
    ctx.reporter.next(Progress::status(Status::Judging).with_progress(0));

    let first = ctx.config.cases().next();
    let (time_limit, memory_mb) = first
        .map(|c| (c.time_ms, c.memory_mb))
        .unwrap_or((ctx.config.time_ms, ctx.config.memory_mb));
    let time_ms = exe.scaled_time(time_limit);

    let stdin = ctx.tmp_dir.join("0.in");
    let stdout = ctx.tmp_dir.join("0.out");
    let stderr = ctx.tmp_dir.join("0.err");
    // Test data is copied byte for byte; it need not be UTF-8
    let input = match (&ctx.request.input, first.and_then(|c| c.input.as_ref())) {
        (Some(text), _) => {
            tokio::fs::write(&stdin, text).await?;
            FileSource::Content(text.clone())
        }
        (None, Some(path)) => {
            tokio::fs::copy(path, &stdin).await?;
            FileSource::Path(path.clone())
        }
        (None, None) => {
            tokio::fs::write(&stdin, "").await?;
            FileSource::Content(String::new())
        }
    };

    let mut spec = exe.run_spec(time_ms, memory_mb);
    spec.stderr = Some(stderr.clone());
    spec.env = ctx.env.clone();
    match &ctx.config.filename {
        Some(name) => {
            spec.copy_in.insert(format!("{}.in", name), input);
            spec.copy_out.push(format!("{}.out?", name));
        }
        None => {
            spec.stdin = Some(stdin.clone());
            spec.stdout = Some(stdout.clone());
        }
    }
    let copy_in = spec.copy_in.clone();

    let result = ctx.services.sandbox.run(spec).await?;
    if let Some(name) = &ctx.config.filename {
        let produced = result.files.get(&format!("{}.out", name)).cloned().unwrap_or_default();
        tokio::fs::write(&stdout, produced).await?;
    }

    let (status, note) = classify(&result, time_ms, memory_mb);
    let mut parts: Vec<String> = note.into_iter().collect();
    parts.push(read_or(&stdout, &result.stdout).await);
    parts.push(read_or(&stderr, &result.stderr).await);
    parts.retain(|p| !p.is_empty());
    let message = truncate(&parts.join("\n"), MAX_MESSAGE_CHARS);

    let score = if status == Status::Accepted { 100.0 } else { 0.0 };
    tracing::info!(
        status = %status,
        code = result.code,
        time_ms = result.time_ms,
        memory_kb = result.memory_kb,
        "Run finished"
    );
    ctx.reporter.next(Progress::status(status).with_case(ExecutionResult {
        case_id: first.map_or(1, |c| c.id),
        subtask_id: ctx.config.subtasks.first().map_or(0, |s| s.id),
        status,
        score,
        code: result.code,
        time_ms: result.time_ms,
        memory_kb: result.memory_kb,
        message,
    }));

    if matches!(status, Status::WrongAnswer | Status::RuntimeError) {
        if let Some(analysis) = &ctx.lang.analysis {
            analyze(ctx, analysis, status, copy_in, stdin).await;
        }
    }

    Ok(Verdict {
        status,
        score,
        time_ms: result.time_ms,
        memory_kb: result.memory_kb,
    })
}

/// Best-effort diagnostics; failures are logged and never touch the verdict
async fn analyze(ctx: &JudgeContext<'_>, command: &str, status: Status, mut copy_in: CopyIn, stdin: PathBuf) {
    let lang = &ctx.lang;
    copy_in.insert("input".into(), FileSource::Path(stdin));
    copy_in.insert(lang.code_file.clone(), FileSource::Content(ctx.request.code.clone()));
    copy_in.insert("compile".into(), FileSource::Content(lang.compile.clone().unwrap_or_default()));
    copy_in.insert("execute".into(), FileSource::Content(lang.execute.clone()));
    let mut env = ctx.env.clone();
    env.insert("HYDRO_PRETEST".into(), "true".into());

    let spec = RunSpec {
        execute: command.to_string(),
        copy_in,
        time_ms: ANALYSIS_TIME_MS,
        memory_mb: ANALYSIS_MEMORY_MB,
        env,
        ..Default::default()
    };
    match ctx.services.sandbox.run(spec).await {
        Ok(result) if !result.stdout.is_empty() => {
            ctx.reporter
                .next(Progress::status(status).with_compiler_text(truncate(&result.stdout, ANALYSIS_OUTPUT_CHARS)));
        }
        Ok(_) => {}
        Err(e) => {
            tracing::info!("Failed to run analysis");
            tracing::error!(error = %e, "Analysis run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{run, Services};
    use crate::report;
    use crate::testing::{self, exited, finished, Failure, MockCompiler, MockSandbox};
    use arbiter_common::types::{JudgeEvent, JudgeRequest};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        tmp: TempDir,
        sandbox: Arc<MockSandbox>,
        compiler: Arc<MockCompiler>,
    }

    impl Harness {
        fn new(sandbox: MockSandbox) -> Self {
            Self::with_compiler(sandbox, MockCompiler::default())
        }

        fn with_compiler(sandbox: MockSandbox, compiler: MockCompiler) -> Self {
            Self {
                tmp: TempDir::new().unwrap(),
                sandbox: Arc::new(sandbox),
                compiler: Arc::new(compiler),
            }
        }

        fn services(&self) -> Services {
            testing::services(self.sandbox.clone(), self.compiler.clone())
        }

        async fn judge(&self, request: &JudgeRequest) -> (Verdict, Vec<JudgeEvent>) {
            let (reporter, mut rx) = report::channel();
            let settings = testing::settings(self.tmp.path());
            let verdict = run(request, &self.services(), &settings, reporter).await;
            (verdict, testing::drain(&mut rx))
        }
    }

    fn request(lang: &str, input: &str) -> JudgeRequest {
        let mut request = JudgeRequest::new(lang, "int main() { return 0; }");
        request.input = Some(input.to_string());
        request
    }

    fn cases(events: &[JudgeEvent]) -> Vec<ExecutionResult> {
        events
            .iter()
            .filter_map(|e| match e {
                JudgeEvent::Progress(p) => p.case.clone(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_classify() {
        let limits = (1000, 256);
        let ok = finished(999, 256 * 1024);
        assert_eq!(classify(&ok, limits.0, limits.1), (Status::Accepted, None));

        let slow = finished(1500, 1024);
        assert_eq!(classify(&slow, limits.0, limits.1).0, Status::TimeLimitExceeded);

        let fat = finished(10, 256 * 1024 + 1);
        assert_eq!(classify(&fat, limits.0, limits.1).0, Status::MemoryLimitExceeded);
        assert_eq!(classify(&fat, u64::MAX, u64::MAX).0, Status::Accepted);

        let killed = RunResult {
            status: Status::TimeLimitExceeded,
            code: 9,
            ..finished(3000, 1024)
        };
        assert_eq!(classify(&killed, limits.0, limits.1), (Status::TimeLimitExceeded, None));

        assert_eq!(
            classify(&exited(11), limits.0, limits.1),
            (Status::RuntimeError, Some("ExitCode: 11 (SIGSEGV)".to_string()))
        );
        assert_eq!(
            classify(&exited(40), limits.0, limits.1),
            (Status::RuntimeError, Some("ExitCode: 40".to_string()))
        );
    }

    #[tokio::test]
    async fn test_empty_program_is_accepted() {
        let h = Harness::new(MockSandbox::accepting().on_run(|_| Ok(finished(0, 0))));
        let (verdict, events) = h.judge(&request("cc", "")).await;

        assert_eq!(verdict.status, Status::Accepted);
        assert_eq!(verdict.score, 100.0);
        let statuses: Vec<Status> = events
            .iter()
            .map(|e| match e {
                JudgeEvent::Progress(p) => p.status,
                JudgeEvent::End(v) => v.status,
            })
            .collect();
        assert_eq!(
            statuses,
            [Status::Compiling, Status::Judging, Status::Accepted, Status::Accepted]
        );
        assert!(matches!(events.last(), Some(JudgeEvent::End(_))));

        let runs = h.sandbox.runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].stdin.as_ref().unwrap().ends_with("0.in"));
        assert!(runs[0].stdout.as_ref().unwrap().ends_with("0.out"));
        assert!(runs[0].stderr.as_ref().unwrap().ends_with("0.err"));
        assert_eq!(runs[0].time_ms, 1000);
        assert_eq!(runs[0].memory_mb, 256);
        assert_eq!(runs[0].env.get("HYDRO_LANG").map(String::as_str), Some("cc"));
        assert_eq!(h.compiler.cleaned(), 1);
    }

    #[tokio::test]
    async fn test_measured_overrun_is_tle() {
        let h = Harness::new(MockSandbox::accepting().on_run(|_| Ok(finished(1500, 1024))));
        let (verdict, _) = h.judge(&request("cc", "1 2\n")).await;
        assert_eq!(verdict.status, Status::TimeLimitExceeded);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(verdict.time_ms, 1500);
    }

    #[tokio::test]
    async fn test_time_multiplier_scales_limit() {
        let h = Harness::new(MockSandbox::accepting().on_run(|_| Ok(finished(1500, 1024))));
        let (verdict, _) = h.judge(&request("py3", "")).await;
        assert_eq!(verdict.status, Status::Accepted);
        assert_eq!(h.sandbox.runs()[0].time_ms, 2000);
    }

    #[tokio::test]
    async fn test_runtime_error_message() {
        let h = Harness::new(MockSandbox::accepting().on_run(|_| {
            Ok(RunResult {
                stdout: "partial".into(),
                stderr: "Segmentation fault".into(),
                ..exited(11)
            })
        }));
        let (verdict, events) = h.judge(&request("cc", "")).await;
        assert_eq!(verdict.status, Status::RuntimeError);
        let case = &cases(&events)[0];
        assert_eq!(case.message, "ExitCode: 11 (SIGSEGV)\npartial\nSegmentation fault");
        assert_eq!(case.score, 0.0);
        assert_eq!(case.code, 11);
    }

    #[tokio::test]
    async fn test_message_is_truncated() {
        let h = Harness::new(MockSandbox::accepting().on_run(|_| {
            Ok(RunResult {
                stdout: "y".repeat(MAX_MESSAGE_CHARS + 10),
                ..finished(1, 1)
            })
        }));
        let (_, events) = h.judge(&request("cc", "")).await;
        assert_eq!(cases(&events)[0].message.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn test_compile_error_stops_before_running() {
        let compiler = MockCompiler::default().failing("cc", Failure::Compile("foo.cc:1: error: expected ';'"));
        let h = Harness::with_compiler(MockSandbox::accepting(), compiler);
        let (verdict, events) = h.judge(&request("cc", "")).await;

        assert_eq!(verdict, Verdict::failure(Status::CompileError));
        assert!(h.sandbox.runs().is_empty());
        let failure = events.iter().find_map(|e| match e {
            JudgeEvent::Progress(p) if p.status == Status::CompileError => Some(p.clone()),
            _ => None,
        });
        let failure = failure.unwrap();
        assert_eq!(failure.compiler_text.as_deref(), Some("foo.cc:1: error: expected ';'"));
        assert_eq!(failure.case.unwrap().message, "foo.cc:1: error: expected ';'");
    }

    #[tokio::test]
    async fn test_compiler_crash_is_system_error() {
        let compiler = MockCompiler::default().failing("cc", Failure::System("compiler unreachable"));
        let h = Harness::with_compiler(MockSandbox::accepting(), compiler);
        let (verdict, _) = h.judge(&request("cc", "")).await;
        assert_eq!(verdict.status, Status::SystemError);
    }

    #[tokio::test]
    async fn test_sandbox_failure_is_system_error() {
        let h = Harness::new(MockSandbox::accepting().on_run(|_| anyhow::bail!("sandbox down")));
        let (verdict, _) = h.judge(&request("cc", "")).await;
        assert_eq!(verdict.status, Status::SystemError);
        assert_eq!(h.compiler.cleaned(), 1);
    }

    #[tokio::test]
    async fn test_named_file_mode() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.yaml"), "filename: foo\n").unwrap();
        let h = Harness::new(MockSandbox::accepting().on_run(|_| {
            let mut result = finished(5, 5);
            result.files.insert("foo.out".into(), "42".into());
            Ok(result)
        }));
        let mut req = request("cc", "6 7");
        req.data_dir = Some(tmp.path().to_path_buf());
        let (verdict, events) = h.judge(&req).await;

        assert_eq!(verdict.status, Status::Accepted);
        let spec = &h.sandbox.runs()[0];
        assert!(spec.stdin.is_none());
        assert!(spec.stdout.is_none());
        assert_eq!(spec.copy_in.get("foo.in"), Some(&FileSource::Content("6 7".into())));
        assert_eq!(spec.copy_out, vec!["foo.out?".to_string()]);
        assert_eq!(cases(&events)[0].message, "42");
    }

    #[tokio::test]
    async fn test_reads_first_case_input() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("1.in"), "from file").unwrap();
        std::fs::write(tmp.path().join("1.out"), "").unwrap();
        std::fs::write(tmp.path().join("config.yaml"), "time: 3s\nmemory: 64m\n").unwrap();
        let h = Harness::new(MockSandbox::accepting().on_run(|spec| {
            let input = std::fs::read_to_string(spec.stdin.as_ref().unwrap())?;
            Ok(RunResult {
                stdout: input,
                ..finished(1, 1)
            })
        }));
        let mut req = JudgeRequest::new("cc", "");
        req.data_dir = Some(tmp.path().to_path_buf());
        let (_, events) = h.judge(&req).await;

        assert_eq!(cases(&events)[0].message, "from file");
        assert_eq!(h.sandbox.runs()[0].time_ms, 3000);
        assert_eq!(h.sandbox.runs()[0].memory_mb, 64);
    }

    #[tokio::test]
    async fn test_binary_case_input_passes_through() {
        let tmp = TempDir::new().unwrap();
        let bytes = vec![0xff, 0xfe, 0x00, b'7'];
        std::fs::write(tmp.path().join("1.in"), &bytes).unwrap();
        std::fs::write(tmp.path().join("1.out"), "").unwrap();
        let expected = bytes.clone();
        let h = Harness::new(MockSandbox::accepting().on_run(move |spec| {
            let input = std::fs::read(spec.stdin.as_ref().unwrap())?;
            assert_eq!(input, expected);
            Ok(finished(1, 1))
        }));
        let mut req = JudgeRequest::new("cc", "");
        req.data_dir = Some(tmp.path().to_path_buf());
        let (verdict, _) = h.judge(&req).await;

        assert_eq!(verdict.status, Status::Accepted);
        assert_eq!(h.sandbox.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_analysis_after_runtime_error() {
        let h = Harness::new(MockSandbox::accepting().on_run(|spec| {
            if spec.execute == "python3 analyze.py" {
                Ok(RunResult {
                    stdout: "z".repeat(4000),
                    ..finished(100, 100)
                })
            } else {
                Ok(exited(1))
            }
        }));
        let (verdict, events) = h.judge(&request("py3", "")).await;
        assert_eq!(verdict.status, Status::RuntimeError);

        let runs = h.sandbox.runs();
        assert_eq!(runs.len(), 2);
        let analysis = &runs[1];
        assert_eq!(analysis.time_ms, 5000);
        assert_eq!(analysis.memory_mb, 256);
        assert_eq!(analysis.env.get("HYDRO_PRETEST").map(String::as_str), Some("true"));
        assert!(analysis.copy_in.contains_key("input"));
        assert_eq!(
            analysis.copy_in.get("foo.py"),
            Some(&FileSource::Content("int main() { return 0; }".into()))
        );
        assert_eq!(analysis.copy_in.get("compile"), Some(&FileSource::Content(String::new())));

        let hint = events.iter().find_map(|e| match e {
            JudgeEvent::Progress(p) => p.compiler_text.clone(),
            _ => None,
        });
        assert_eq!(hint.unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_analysis_failure_keeps_verdict() {
        let h = Harness::new(MockSandbox::accepting().on_run(|spec| {
            if spec.execute == "python3 analyze.py" {
                anyhow::bail!("analysis sandbox down")
            }
            Ok(exited(2))
        }));
        let (verdict, events) = h.judge(&request("py3", "")).await;
        assert_eq!(verdict.status, Status::RuntimeError);
        assert!(matches!(events.last(), Some(JudgeEvent::End(v)) if v.status == Status::RuntimeError));
    }

    #[tokio::test]
    async fn test_no_analysis_when_accepted() {
        let h = Harness::new(MockSandbox::accepting());
        let (verdict, _) = h.judge(&request("py3", "")).await;
        assert_eq!(verdict.status, Status::Accepted);
        assert_eq!(h.sandbox.runs().len(), 1);
    }
}
