/// Integration tests for the Docker engine
///
/// These need a Docker daemon and the default runner image (any image with
/// `sh`, `base64` and GNU `/usr/bin/time`), so they are ignored by default.

#[cfg(test)]
mod docker_tests {
    use crate::config::LanguageConfigManager;
    use crate::engine::DockerEngine;
    use arbiter_common::Status;
    use arbiter_core::sandbox::{CompileFailure, Compiler, CopyIn, FileSource, LanguageCatalog, RunSpec, Sandbox};

    fn engine() -> (DockerEngine, LanguageConfigManager) {
        let languages = LanguageConfigManager::load_default().expect("Failed to load language config");
        let engine = DockerEngine::new_with_config(&languages).expect("Failed to create Docker engine");
        (engine, languages)
    }

    fn shell(execute: &str) -> RunSpec {
        RunSpec {
            execute: execute.to_string(),
            time_ms: 2000,
            memory_mb: 128,
            ..Default::default()
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_run_captures_output_and_usage() {
        let (engine, _) = engine();
        let dir = tempfile::tempdir().unwrap();
        let stdin = dir.path().join("in");
        std::fs::write(&stdin, "21\n").unwrap();

        let spec = RunSpec {
            stdin: Some(stdin),
            ..shell("read n; echo $((n * 2))")
        };
        let result = engine.run(spec).await.unwrap();
        assert_eq!(result.status, Status::Accepted);
        assert_eq!(result.stdout.trim(), "42");
        assert!(result.memory_kb > 0);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_run_reports_exit_code_and_signal() {
        let (engine, _) = engine();
        let result = engine.run(shell("exit 3")).await.unwrap();
        assert_eq!(result.status, Status::RuntimeError);
        assert_eq!(result.code, 3);

        let result = engine.run(shell("kill -SEGV $$")).await.unwrap();
        assert_eq!(result.code, 11);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_run_times_out() {
        let (engine, _) = engine();
        let spec = RunSpec {
            time_ms: 200,
            ..shell("while true; do :; done")
        };
        let result = engine.run(spec).await.unwrap();
        assert_eq!(result.status, Status::TimeLimitExceeded);
        assert!(result.time_ms > 200, "time {}", result.time_ms);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_run_counts_blocking_time() {
        let (engine, _) = engine();
        let spec = RunSpec {
            time_ms: 500,
            ..shell("sleep 1")
        };
        let result = engine.run(spec).await.unwrap();
        assert_eq!(result.status, Status::Accepted);
        assert!(result.time_ms >= 1000, "time {}", result.time_ms);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_copy_in_and_copy_out() {
        let (engine, _) = engine();
        let spec = RunSpec {
            copy_in: CopyIn::from([("a.in".to_string(), FileSource::Content("hello".into()))]),
            copy_out: vec!["a.out?".to_string(), "missing?".to_string()],
            ..shell("cat a.in > a.out")
        };
        let result = engine.run(spec).await.unwrap();
        assert_eq!(result.files.get("a.out").map(String::as_str), Some("hello"));
        assert!(!result.files.contains_key("missing"));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_piped_programs_talk() {
        let (engine, _) = engine();
        let user = shell("read q; echo $((q + 1))");
        let interactor = shell("echo 41; read a; [ \"$a\" = 42 ] && echo ok >&2");
        let (user, interactor) = engine.run_piped(user, interactor).await.unwrap();
        assert_eq!(user.status, Status::Accepted);
        assert_eq!(interactor.stderr.trim(), "ok");
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_compile_failure_is_compile_error() {
        let (engine, languages) = engine();
        let Some(lang) = languages.lookup("cc") else {
            return;
        };
        let outcome = engine
            .compile(&lang, FileSource::Content("int main( {".into()), CopyIn::new())
            .await;
        assert!(matches!(outcome, Err(CompileFailure::Compile { .. })));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_compiled_artifact_runs_and_cleans_up() {
        let (engine, languages) = engine();
        let Some(lang) = languages.lookup("cc") else {
            return;
        };
        let source = "#include <cstdio>\nint main(){puts(\"hi\");}\n";
        let mut exe = engine
            .compile(&lang, FileSource::Content(source.into()), CopyIn::new())
            .await
            .unwrap();

        let result = engine.run(exe.run_spec(1000, 128)).await.unwrap();
        assert_eq!(result.stdout.trim(), "hi");

        let cleanup = exe.cleanup.take().unwrap();
        cleanup().await.unwrap();
    }
}
