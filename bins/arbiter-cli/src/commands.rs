// CLI commands for checking test data and talking to the judge queue
use anyhow::{bail, Context, Result};
use arbiter_common::config::JudgeSettings;
use arbiter_common::redis;
use arbiter_common::types::{JudgeEvent, JudgeRequest, ProblemConfig, Progress, Verdict};
use arbiter_core::cases::{self, CaseArgs};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn load_settings() -> Result<JudgeSettings> {
    JudgeSettings::load_default().map_err(|e| anyhow::anyhow!(e))
}

async fn connect(settings: &JudgeSettings) -> Result<::redis::aio::ConnectionManager> {
    let client = ::redis::Client::open(settings.redis_url.as_str())
        .with_context(|| format!("Invalid Redis URL: {}", settings.redis_url))?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")
}

/// Normalize a test-data directory and print the result
pub fn check(dir: &Path, key: Option<&str>) -> Result<()> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let settings = load_settings()?;
    let args = CaseArgs {
        key,
        ..Default::default()
    };

    match cases::read_cases(Some(dir), serde_yaml::Mapping::new(), &args, &settings) {
        Ok(config) => {
            print!("{}", render_config(&config, dir));
            println!("\n✅ Test data OK");
            Ok(())
        }
        Err(e) => {
            println!("❌ {}", e.describe());
            bail!("Test data rejected")
        }
    }
}

/// Subtask/case table for a normalized problem
pub fn render_config(config: &ProblemConfig, root: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "📋 {} problem, {} case(s), {} subtask(s)\n",
        config.judge_type,
        config.count,
        config.subtasks.len()
    );
    for subtask in &config.subtasks {
        let deps = if subtask.depends_on.is_empty() {
            String::new()
        } else {
            let ids: Vec<String> = subtask.depends_on.iter().map(u32::to_string).collect();
            format!(" (after {})", ids.join(", "))
        };
        let _ = writeln!(
            out,
            "Subtask {} [{}] score {}{}",
            subtask.id, subtask.policy, subtask.score, deps
        );
        let _ = writeln!(
            out,
            "  {:<5} {:<24} {:<24} {:>8} {:>8} {:>8}",
            "CASE", "INPUT", "OUTPUT", "TIME", "MEMORY", "SCORE"
        );
        for case in &subtask.cases {
            let _ = writeln!(
                out,
                "  {:<5} {:<24} {:<24} {:>6}ms {:>6}MB {:>8.2}",
                case.id,
                display(case.input.as_deref(), root),
                display(case.output.as_deref(), root),
                case.time_ms,
                case.memory_mb,
                case.score
            );
        }
    }
    out
}

fn display(path: Option<&Path>, root: &Path) -> String {
    match path {
        Some(path) => path.strip_prefix(root).unwrap_or(path).display().to_string(),
        None => "-".to_string(),
    }
}

pub struct Submission {
    pub lang: String,
    pub file: PathBuf,
    pub data: Option<PathBuf>,
    pub input: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub self_test: bool,
    pub wait: bool,
}

/// Build the request a submission describes
pub fn build_request(submission: &Submission) -> Result<JudgeRequest> {
    let code = fs::read_to_string(&submission.file)
        .with_context(|| format!("Failed to read {}", submission.file.display()))?;
    let mut request = JudgeRequest::new(&submission.lang, code);
    request.data_dir = submission.data.clone();
    request.self_submission = submission.self_test;
    if let Some(input) = &submission.input {
        request.input =
            Some(fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?);
    }
    if let Some(config) = &submission.config {
        let content = fs::read_to_string(config).with_context(|| format!("Failed to read {}", config.display()))?;
        request.config = serde_json::from_str(&content)
            .with_context(|| format!("{} must hold a JSON object", config.display()))?;
    }
    Ok(request)
}

/// Push a submission and optionally follow it to the verdict
pub async fn submit(submission: Submission) -> Result<()> {
    let settings = load_settings()?;
    let request = build_request(&submission)?;
    let mut conn = connect(&settings).await?;

    redis::push_request(&mut conn, &request)
        .await
        .context("Failed to push request")?;
    println!("🚀 Submitted {} ({})", request.id, request.lang);

    if !submission.wait {
        println!("\n💡 Fetch the result with: arbiter-cli result {}", request.id);
        return Ok(());
    }

    let mut offset = 0;
    loop {
        let events = redis::read_events(&mut conn, &request.id, offset).await?;
        offset += events.len() as isize;
        for event in &events {
            println!("{}", format_event(event));
            if matches!(event, JudgeEvent::End(_)) {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Print the stored record of a request
pub async fn show_result(id: &uuid::Uuid) -> Result<()> {
    let settings = load_settings()?;
    let mut conn = connect(&settings).await?;
    match redis::get_record(&mut conn, id).await? {
        Some(record) => {
            println!("{}", format_verdict(&record.verdict));
            println!(
                "  judged in {} ms",
                (record.finished_at - record.started_at).num_milliseconds()
            );
        }
        None => println!("⏳ No result for {} yet", id),
    }
    Ok(())
}

pub fn format_event(event: &JudgeEvent) -> String {
    match event {
        JudgeEvent::Progress(progress) => format_progress(progress),
        JudgeEvent::End(verdict) => format_verdict(verdict),
    }
}

fn format_progress(progress: &Progress) -> String {
    let mut line = match &progress.case {
        Some(case) if case.case_id > 0 => format!(
            "  #{:<3} {:<22} {:>6} ms {:>8} KB  score {}",
            case.case_id, case.status, case.time_ms, case.memory_kb, case.score
        ),
        Some(case) => format!("  {}: {}", case.status, case.message),
        None => format!("  {}", progress.status),
    };
    if let Some(percent) = progress.progress {
        let _ = write!(line, " [{}%]", percent);
    }
    if let Some(message) = &progress.message {
        let _ = write!(line, " {}", message);
    }
    if let Some(text) = &progress.compiler_text {
        let _ = write!(line, "\n{}", text);
    }
    line
}

fn format_verdict(verdict: &Verdict) -> String {
    let icon = if verdict.status.is_accepted() { "✅" } else { "❌" };
    format!(
        "{} {} score {} time {} ms memory {} KB",
        icon, verdict.status, verdict.score, verdict.time_ms, verdict.memory_kb
    )
}
