/// Docker Engine - Sandbox and Compiler backed by bollard
///
/// **Core Responsibility:**
/// Build submitted programs and execute them in throwaway containers,
/// reporting raw resource usage back to the judging core.
///
/// **Execution Model:**
/// - Compile: one build container per program; sources and extra files are
///   written to `/w`, the compile command runs there, and the container is
///   committed to an image. The image tag is the executable's artifact and
///   the cleanup removes it.
/// - Run: a fresh container per run from the artifact image (or the default
///   runner image), memory limited, network disabled. The program runs under
///   GNU time so CPU time and peak RSS come back with the exit code.
/// - Piped runs: two containers whose attached stdout streams are forwarded
///   into each other's stdin.
///
/// **Boundary:**
/// The engine never classifies verdicts beyond what it observes directly
/// (wall-clock timeout, clean exit, exit code).

use crate::config::LanguageConfigManager;
use anyhow::{bail, Context, Result};
use arbiter_common::Status;
use arbiter_core::sandbox::{
    CompileFailure, Compiler, CopyIn, Executable, FileSource, LanguageSpec, RunResult, RunSpec, Sandbox,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions};
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Safety limit to prevent pathological inputs from reaching Docker
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

const WORK_DIR: &str = "/w";
const USAGE_FILE: &str = "/tmp/.arbiter-usage";
const BUILD_REPO: &str = "arbiter-build";
const COMPILE_TIME_MS: u64 = 10_000;
const COMPILE_MEMORY_MB: u64 = 1024;
/// Smallest container memory limit Docker accepts comfortably
const MIN_MEMORY_MB: u64 = 16;
const PIDS_LIMIT: i64 = 64;
/// Wall-clock slack on top of the CPU time limit
const WALL_GRACE_MS: u64 = 1000;
const SIGKILL: i32 = 9;

type ExecOutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>;
type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Container cleanup guard - guarantees container removal
///
/// `release` removes the container and waits for it; dropping an unreleased
/// guard spawns the removal instead.
struct ContainerGuard {
    docker: Docker,
    container_id: Option<String>,
}

impl ContainerGuard {
    fn id(&self) -> &str {
        self.container_id.as_deref().unwrap_or_default()
    }

    async fn release(mut self) {
        if let Some(id) = self.container_id.take() {
            remove_container(&self.docker, &id).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.container_id.take() else {
            return;
        };
        let docker = self.docker.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_container(&docker, &id).await });
            }
            Err(_) => warn!(container_id = %id, "Container leaked outside a runtime"),
        }
    }
}

async fn remove_container(docker: &Docker, id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(id, Some(options)).await {
        warn!(container_id = %id, error = %e, "Failed to cleanup container");
    }
}

/// An attached exec: its id, its multiplexed output and its stdin
struct Session {
    exec_id: String,
    output: ExecOutputStream,
    input: ExecInput,
}

struct ExecOutput {
    stdout: String,
    stderr: String,
    code: Option<i64>,
}

/// Docker-based sandbox and compiler
pub struct DockerEngine {
    docker: Docker,
    languages: LanguageConfigManager,
}

impl DockerEngine {
    /// Create a new Docker engine with language config manager
    pub fn new_with_config(languages: &LanguageConfigManager) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            languages: languages.clone(),
        })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Create and start an idle container, removed when the guard goes away
    async fn create_box(&self, image: &str, memory_mb: u64) -> Result<ContainerGuard> {
        self.ensure_image(image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", image))?;

        let name = format!("arbiter-{}", uuid::Uuid::new_v4());
        let memory = memory_mb.max(MIN_MEMORY_MB).saturating_mul(1024 * 1024).min(i64::MAX as u64) as i64;
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sleep".to_string(), "3600".to_string()]),
            entrypoint: Some(vec![]),
            working_dir: Some(WORK_DIR.to_string()),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory),
                memory_swap: Some(memory),
                nano_cpus: Some(1_000_000_000),
                pids_limit: Some(PIDS_LIMIT),
                readonly_rootfs: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .context("Failed to create Docker container")?;
        let guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: Some(container.id),
        };

        self.docker
            .start_container(guard.id(), None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;
        Ok(guard)
    }

    async fn kill(&self, id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = %id, error = %e, "Failed to kill timed-out container");
        }
    }

    async fn attach(&self, id: &str, cmd: Vec<String>, env: &BTreeMap<String, String>) -> Result<Session> {
        let options = CreateExecOptions {
            cmd: Some(cmd),
            env: Some(env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
            working_dir: Some(WORK_DIR.to_string()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .context("Failed to create exec")?;

        let start = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        match self
            .docker
            .start_exec(&exec.id, Some(start))
            .await
            .context("Failed to start exec")?
        {
            StartExecResults::Attached { output, input } => Ok(Session {
                exec_id: exec.id,
                output,
                input,
            }),
            StartExecResults::Detached => bail!("Exec {} started detached", exec.id),
        }
    }

    /// Run a helper command to completion, feeding `stdin`
    async fn exec(&self, id: &str, cmd: Vec<String>, stdin: &[u8]) -> Result<ExecOutput> {
        let Session {
            exec_id,
            output,
            mut input,
        } = self.attach(id, cmd, &BTreeMap::new()).await?;

        let feed = async move {
            input.write_all(stdin).await?;
            input.shutdown().await
        };
        let (fed, (stdout, stderr)) = tokio::join!(feed, collect(output));
        if let Err(e) = fed {
            debug!(error = %e, "Exec stopped reading stdin");
        }

        let code = self.docker.inspect_exec(&exec_id).await?.exit_code;
        Ok(ExecOutput { stdout, stderr, code })
    }

    async fn write_file(&self, id: &str, name: &str, source: &FileSource) -> Result<()> {
        let content = match source {
            FileSource::Path(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
            FileSource::Content(text) => text.clone().into_bytes(),
        };
        let encoded = general_purpose::STANDARD.encode(content);
        let cmd = shell_with_arg(r#"mkdir -p "$(dirname "$1")" && base64 -d > "$1""#, &resolve(name));

        let output = self.exec(id, cmd, encoded.as_bytes()).await?;
        if output.code != Some(0) {
            bail!("Failed to write {} to container: {}", name, output.stderr.trim());
        }
        Ok(())
    }

    async fn copy_in(&self, id: &str, files: &CopyIn) -> Result<()> {
        for (name, source) in files {
            self.write_file(id, name, source).await?;
        }
        Ok(())
    }

    async fn read_file(&self, id: &str, name: &str) -> Result<Option<String>> {
        let output = self.exec(id, vec!["cat".to_string(), resolve(name)], &[]).await?;
        Ok((output.code == Some(0)).then_some(output.stdout))
    }

    fn image_of<'a>(&'a self, spec: &'a RunSpec) -> &'a str {
        spec.artifact.as_deref().unwrap_or(self.languages.default_image())
    }

    async fn run_in(&self, sandbox: &ContainerGuard, spec: &RunSpec) -> Result<RunResult> {
        self.copy_in(sandbox.id(), &spec.copy_in).await?;
        let stdin = match &spec.stdin {
            Some(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => Vec::new(),
        };

        let Session {
            exec_id,
            output,
            mut input,
        } = self.attach(sandbox.id(), timed(&spec.execute), &spec.env).await?;
        let started = Instant::now();
        let feed = async move {
            input.write_all(&stdin).await?;
            input.shutdown().await
        };
        let outcome = tokio::time::timeout(wall(spec.time_ms), async {
            let (fed, streams) = tokio::join!(feed, collect(output));
            if let Err(e) = fed {
                debug!(error = %e, "Program stopped reading stdin");
            }
            streams
        })
        .await
        .ok();

        self.settle(sandbox, &exec_id, spec, outcome, started.elapsed()).await
    }

    /// Turn a finished (or timed-out) exec into a `RunResult`
    async fn settle(
        &self,
        sandbox: &ContainerGuard,
        exec_id: &str,
        spec: &RunSpec,
        streams: Option<(String, String)>,
        elapsed: Duration,
    ) -> Result<RunResult> {
        let Some((stdout, stderr)) = streams else {
            let elapsed_ms = elapsed.as_millis() as u64;
            warn!(time_ms = spec.time_ms, elapsed_ms, "Execution timed out, killing container");
            self.kill(sandbox.id()).await;
            return Ok(RunResult {
                status: Status::TimeLimitExceeded,
                time_ms: elapsed_ms.max(spec.time_ms.saturating_add(1)),
                ..Default::default()
            });
        };

        let code = self
            .docker
            .inspect_exec(exec_id)
            .await?
            .exit_code
            .map(normalize_code)
            .unwrap_or(SIGKILL);
        let usage = self
            .read_file(sandbox.id(), USAGE_FILE)
            .await?
            .and_then(|text| parse_usage(&text))
            .unwrap_or_default();
        let (time_ms, memory_kb) = (usage.time_ms(), usage.memory_kb);

        let status = if code == 0 {
            Status::Accepted
        } else if code == SIGKILL && memory_kb.saturating_mul(10) >= spec.memory_mb.saturating_mul(1024 * 9) {
            Status::MemoryLimitExceeded
        } else {
            Status::RuntimeError
        };

        let mut files = BTreeMap::new();
        for entry in &spec.copy_out {
            let (name, optional) = match entry.strip_suffix('?') {
                Some(name) => (name, true),
                None => (entry.as_str(), false),
            };
            match self.read_file(sandbox.id(), name).await? {
                Some(content) => {
                    files.insert(name.to_string(), content);
                }
                None if optional => {}
                None => warn!(file = %name, "Expected output file is missing"),
            }
        }

        Ok(RunResult {
            status,
            code,
            time_ms,
            memory_kb,
            stdout: deliver(spec.stdout.as_deref(), stdout).await?,
            stderr: deliver(spec.stderr.as_deref(), stderr).await?,
            files,
        })
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    async fn run(&self, spec: RunSpec) -> Result<RunResult> {
        debug!(execute = %spec.execute, time_ms = spec.time_ms, memory_mb = spec.memory_mb, "Running");
        let sandbox = self.create_box(self.image_of(&spec), spec.memory_mb).await?;
        let outcome = self.run_in(&sandbox, &spec).await;
        sandbox.release().await;
        outcome
    }

    async fn run_piped(&self, a: RunSpec, b: RunSpec) -> Result<(RunResult, RunResult)> {
        debug!(a = %a.execute, b = %b.execute, "Running piped");
        let box_a = self.create_box(self.image_of(&a), a.memory_mb).await?;
        let box_b = self.create_box(self.image_of(&b), b.memory_mb).await?;
        self.copy_in(box_a.id(), &a.copy_in).await?;
        self.copy_in(box_b.id(), &b.copy_in).await?;

        let session_a = self.attach(box_a.id(), timed(&a.execute), &a.env).await?;
        let session_b = self.attach(box_b.id(), timed(&b.execute), &b.env).await?;

        let started = Instant::now();
        let (out_a, out_b) = tokio::join!(
            tokio::time::timeout(wall(a.time_ms), pump(session_a.output, session_b.input)),
            tokio::time::timeout(wall(b.time_ms), pump(session_b.output, session_a.input)),
        );

        let result_a = self
            .settle(&box_a, &session_a.exec_id, &a, out_a.ok().map(|stderr| (String::new(), stderr)), started.elapsed())
            .await;
        let result_b = self
            .settle(&box_b, &session_b.exec_id, &b, out_b.ok().map(|stderr| (String::new(), stderr)), started.elapsed())
            .await;
        box_a.release().await;
        box_b.release().await;
        Ok((result_a?, result_b?))
    }
}

#[async_trait]
impl Compiler for DockerEngine {
    async fn compile(
        &self,
        lang: &LanguageSpec,
        source: FileSource,
        copy_in: CopyIn,
    ) -> Result<Executable, CompileFailure> {
        if let FileSource::Content(code) = &source {
            if code.len() > MAX_SOURCE_CODE_BYTES {
                return Err(CompileFailure::Compile {
                    stdout: String::new(),
                    stderr: format!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES),
                });
            }
        }

        let image = self.languages.image_for(&lang.key).to_string();
        let build = self.create_box(&image, COMPILE_MEMORY_MB).await?;
        self.write_file(build.id(), &lang.code_file, &source).await?;
        self.copy_in(build.id(), &copy_in).await?;

        if let Some(command) = &lang.compile {
            let start_time = Instant::now();
            let cmd = vec!["sh".to_string(), "-c".to_string(), command.clone()];
            let output = tokio::time::timeout(Duration::from_millis(COMPILE_TIME_MS), self.exec(build.id(), cmd, &[]))
                .await
                .map_err(|_| CompileFailure::Compile {
                    stdout: String::new(),
                    stderr: "Compile timed out.".to_string(),
                })??;

            let compilation_time_ms = start_time.elapsed().as_millis() as u64;
            if output.code != Some(0) {
                warn!(
                    compilation_time_ms,
                    language = %lang.key,
                    error_preview = output.stderr.lines().next().unwrap_or(""),
                    "Compilation failed"
                );
                build.release().await;
                return Err(CompileFailure::Compile {
                    stdout: output.stdout,
                    stderr: output.stderr,
                });
            }
            info!(compilation_time_ms, language = %lang.key, "Compilation succeeded");
        }

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let options = CommitContainerOptions {
            container: build.id().to_string(),
            repo: BUILD_REPO.to_string(),
            tag: tag.clone(),
            pause: true,
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .context("Failed to commit build container")?;
        build.release().await;

        let artifact = format!("{}:{}", BUILD_REPO, tag);
        let docker = self.docker.clone();
        let image = artifact.clone();
        Ok(Executable {
            execute: lang.execute.clone(),
            artifact: Some(artifact),
            copy_in: CopyIn::new(),
            time_multiplier: lang.time_limit_rate,
            cleanup: Some(Box::new(move || {
                async move {
                    let options = RemoveImageOptions {
                        force: true,
                        ..Default::default()
                    };
                    docker
                        .remove_image(&image, Some(options), None)
                        .await
                        .with_context(|| format!("Failed to remove image {}", image))?;
                    anyhow::Ok(())
                }
                .boxed()
            })),
        })
    }
}

/// Drain an exec's output into (stdout, stderr)
async fn collect(mut output: ExecOutputStream) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Some(msg) = output.next().await {
        match msg {
            Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
            Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
            Ok(_) => {}
            Err(e) => {
                stderr.push_str(&format!("\n[Execution error: {}]", e));
                break;
            }
        }
    }
    (stdout, stderr)
}

/// Forward an exec's stdout into its peer's stdin; returns the exec's stderr
async fn pump(mut output: ExecOutputStream, mut peer: ExecInput) -> String {
    let mut stderr = String::new();
    let mut peer_open = true;
    while let Some(msg) = output.next().await {
        match msg {
            Ok(LogOutput::StdOut { message }) if peer_open => {
                if peer.write_all(&message).await.is_err() || peer.flush().await.is_err() {
                    peer_open = false;
                }
            }
            Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
            Ok(_) => {}
            Err(e) => {
                stderr.push_str(&format!("\n[Execution error: {}]", e));
                break;
            }
        }
    }
    let _ = peer.shutdown().await;
    stderr
}

/// Write captured output to the requested host file, or hand it back
async fn deliver(path: Option<&Path>, text: String) -> Result<String> {
    match path {
        Some(path) => {
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(String::new())
        }
        None => Ok(text),
    }
}

fn resolve(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("{}/{}", WORK_DIR, name)
    }
}

fn shell_with_arg(script: &str, arg: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        "sh".to_string(),
        arg.to_string(),
    ]
}

/// Wrap a command line in GNU time, usage going to `USAGE_FILE`
fn timed(execute: &str) -> Vec<String> {
    [
        "/usr/bin/time",
        "-f",
        "%U %S %M %e",
        "-o",
        USAGE_FILE,
        "sh",
        "-c",
        execute,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn wall(time_ms: u64) -> Duration {
    Duration::from_millis(time_ms.saturating_add(WALL_GRACE_MS))
}

/// Shell-style `128 + n` exit codes become the signal number
fn normalize_code(code: i64) -> i32 {
    if (129..160).contains(&code) {
        (code - 128) as i32
    } else {
        code as i32
    }
}

/// Resource usage as reported by GNU time
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Usage {
    cpu_ms: u64,
    wall_ms: u64,
    memory_kb: u64,
}

impl Usage {
    /// Wall time, or CPU time when threads push it past the wall clock
    fn time_ms(&self) -> u64 {
        self.wall_ms.max(self.cpu_ms)
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

/// Parse GNU time's `%U %S %M %e` line
///
/// The last non-empty line wins; earlier lines carry notes such as
/// "Command exited with non-zero status".
fn parse_usage(text: &str) -> Option<Usage> {
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    let mut parts = line.split_whitespace();
    let user: f64 = parts.next()?.parse().ok()?;
    let system: f64 = parts.next()?.parse().ok()?;
    let memory_kb: u64 = parts.next()?.parse().ok()?;
    let elapsed: f64 = parts.next()?.parse().ok()?;
    Some(Usage {
        cpu_ms: seconds_to_ms(user + system),
        wall_ms: seconds_to_ms(elapsed),
        memory_kb,
    })
}
