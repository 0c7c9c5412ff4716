/// Arbiter Judging Core
///
/// **Pipeline:**
/// 1. `cases::read_cases` normalizes test data into a `ProblemConfig`
/// 2. `judge::run` compiles, then dispatches every case through the batch
///    or interactive pipeline on a bounded `pool::WorkerPool`
/// 3. `scoring` folds case results into subtask states and the verdict
/// 4. `report::Reporter` streams progress and exactly one terminal event
///
/// Process execution lives behind the `sandbox::Sandbox` and
/// `sandbox::Compiler` traits; this crate never spawns anything itself.

pub mod cases;
pub mod discovery;
pub mod error;
pub mod judge;
pub mod pool;
pub mod report;
pub mod sandbox;
pub mod scoring;
pub mod signals;
pub mod testlib;

#[cfg(test)]
mod testing;

pub use error::{FormatError, JudgeError, Result};

/// Upper bound for any message attached to a case result or progress event
pub const MAX_MESSAGE_CHARS: usize = 100_000;

/// Keep at most `max` characters of `text`
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Compiler diagnostics as shown to the user: both streams, trimmed, empty ones dropped
pub fn compiler_text(stdout: &str, stderr: &str) -> String {
    let text = [stdout.trim(), stderr.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    truncate(&text, MAX_MESSAGE_CHARS)
}
