// In-memory sandbox, compiler and language table for pipeline tests

use crate::judge::Services;
use crate::sandbox::{
    CompileFailure, Compiler, CopyIn, Executable, FileSource, LanguageCatalog, LanguageSpec, RunResult, RunSpec,
    Sandbox,
};
use arbiter_common::config::JudgeSettings;
use arbiter_common::types::JudgeEvent;
use arbiter_common::Status;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type RunFn = Box<dyn Fn(&RunSpec) -> anyhow::Result<RunResult> + Send + Sync>;
type PipedFn = Box<dyn Fn(&RunSpec, &RunSpec) -> anyhow::Result<(RunResult, RunResult)> + Send + Sync>;

pub fn finished(time_ms: u64, memory_kb: u64) -> RunResult {
    RunResult {
        status: Status::Accepted,
        time_ms,
        memory_kb,
        ..Default::default()
    }
}

pub fn exited(code: i32) -> RunResult {
    RunResult {
        status: Status::RuntimeError,
        code,
        ..finished(10, 1024)
    }
}

pub fn interactor_says(stderr: &str) -> RunResult {
    RunResult {
        stderr: stderr.to_string(),
        ..finished(5, 512)
    }
}

pub struct MockSandbox {
    on_run: RunFn,
    on_piped: PipedFn,
    delay: Duration,
    pub runs: Mutex<Vec<RunSpec>>,
    pub piped_runs: Mutex<Vec<(RunSpec, RunSpec)>>,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl MockSandbox {
    /// Every program exits cleanly in 10 ms; every interactor says `ok`
    pub fn accepting() -> Self {
        Self {
            on_run: Box::new(|_| Ok(finished(10, 1024))),
            on_piped: Box::new(|_, _| Ok((finished(10, 1024), interactor_says("ok")))),
            delay: Duration::ZERO,
            runs: Mutex::new(Vec::new()),
            piped_runs: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn on_run(mut self, f: impl Fn(&RunSpec) -> anyhow::Result<RunResult> + Send + Sync + 'static) -> Self {
        self.on_run = Box::new(f);
        self
    }

    pub fn on_piped(
        mut self,
        f: impl Fn(&RunSpec, &RunSpec) -> anyhow::Result<(RunResult, RunResult)> + Send + Sync + 'static,
    ) -> Self {
        self.on_piped = Box::new(f);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().unwrap().clone()
    }

    pub fn piped_runs(&self) -> Vec<(RunSpec, RunSpec)> {
        self.piped_runs.lock().unwrap().clone()
    }

    async fn occupy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn run(&self, spec: RunSpec) -> anyhow::Result<RunResult> {
        self.runs.lock().unwrap().push(spec.clone());
        self.occupy().await;
        let result = (self.on_run)(&spec)?;
        if let Some(path) = &spec.stdout {
            std::fs::write(path, &result.stdout)?;
        }
        if let Some(path) = &spec.stderr {
            std::fs::write(path, &result.stderr)?;
        }
        Ok(result)
    }

    async fn run_piped(&self, a: RunSpec, b: RunSpec) -> anyhow::Result<(RunResult, RunResult)> {
        self.piped_runs.lock().unwrap().push((a.clone(), b.clone()));
        self.occupy().await;
        (self.on_piped)(&a, &b)
    }
}

pub enum Failure {
    Compile(&'static str),
    System(&'static str),
}

#[derive(Default)]
pub struct MockCompiler {
    failures: HashMap<String, Failure>,
    pub compiled: Mutex<Vec<(String, FileSource, CopyIn)>>,
    pub cleaned: Arc<AtomicUsize>,
}

impl MockCompiler {
    pub fn failing(mut self, lang: &str, failure: Failure) -> Self {
        self.failures.insert(lang.to_string(), failure);
        self
    }

    pub fn cleaned(&self) -> usize {
        self.cleaned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compiler for MockCompiler {
    async fn compile(&self, lang: &LanguageSpec, source: FileSource, copy_in: CopyIn) -> Result<Executable, CompileFailure> {
        self.compiled
            .lock()
            .unwrap()
            .push((lang.key.clone(), source, copy_in.clone()));
        tokio::task::yield_now().await;
        match self.failures.get(&lang.key) {
            Some(Failure::Compile(text)) => {
                return Err(CompileFailure::Compile {
                    stdout: String::new(),
                    stderr: text.to_string(),
                })
            }
            Some(Failure::System(text)) => return Err(CompileFailure::System(anyhow::anyhow!(*text))),
            None => {}
        }

        let binary = format!("{}.bin", lang.key);
        let mut files = copy_in;
        files.insert(binary.clone(), FileSource::Content("binary".into()));
        let cleaned = self.cleaned.clone();
        Ok(Executable {
            execute: format!("/w/{}", binary),
            artifact: Some(format!("artifact-{}", lang.key)),
            copy_in: files,
            time_multiplier: lang.time_limit_rate,
            cleanup: Some(Box::new(move || {
                async move {
                    cleaned.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
                .boxed()
            })),
        })
    }
}

pub struct MockLanguages(HashMap<String, LanguageSpec>);

impl Default for MockLanguages {
    fn default() -> Self {
        let cc = LanguageSpec {
            key: "cc".into(),
            compile: Some("g++ -O2 foo.cc -o foo".into()),
            execute: "/w/foo".into(),
            code_file: "foo.cc".into(),
            time_limit_rate: 1.0,
            analysis: None,
        };
        let py3 = LanguageSpec {
            key: "py3".into(),
            compile: None,
            execute: "python3 foo.py".into(),
            code_file: "foo.py".into(),
            time_limit_rate: 2.0,
            analysis: Some("python3 analyze.py".into()),
        };
        Self(HashMap::from([("cc".to_string(), cc), ("py3".to_string(), py3)]))
    }
}

impl LanguageCatalog for MockLanguages {
    fn lookup(&self, key: &str) -> Option<LanguageSpec> {
        self.0.get(key).cloned()
    }
}

pub fn services(sandbox: Arc<MockSandbox>, compiler: Arc<MockCompiler>) -> Services {
    Services {
        sandbox,
        compiler,
        languages: Arc::new(MockLanguages::default()),
    }
}

pub fn settings(tmp: &Path) -> JudgeSettings {
    JudgeSettings {
        tmp_dir: tmp.join("scratch"),
        parallelism: 2,
        ..JudgeSettings::default()
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<JudgeEvent>) -> Vec<JudgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
