// Verdict line written by testlib-style interactors on stderr

use arbiter_common::Status;
use lazy_static::lazy_static;
use regex::Regex;

const MAX_MESSAGE_CHARS: usize = 1024;

lazy_static! {
    static ref POINTS_RE: Regex = Regex::new(r"^points\s+([0-9.eE+-]+)\s*(.*)$").unwrap();
    static ref PARTIAL_RE: Regex =
        Regex::new(r"^partially correct\s*\(?\s*([0-9.]+)\s*\)?\s*(.*)$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub status: Status,
    pub score: f64,
    pub message: String,
}

fn truncate(text: &str) -> String {
    text.trim().chars().take(MAX_MESSAGE_CHARS).collect()
}

fn scored(score: f64, full_score: f64, message: &str) -> Parsed {
    let score = if score.is_finite() { score.clamp(0.0, full_score) } else { 0.0 };
    let status = if score >= full_score {
        Status::Accepted
    } else {
        Status::WrongAnswer
    };
    Parsed {
        status,
        score,
        message: truncate(message),
    }
}

/// Interpret an interactor's stderr as a verdict worth at most `full_score`
///
/// Anything unrecognised, including empty output, is a wrong answer with
/// the raw text as message.
pub fn parse(output: &str, full_score: f64) -> Parsed {
    let text = output.trim_start();
    let first = text.lines().next().unwrap_or("").trim_end();

    if let Some(rest) = first.strip_prefix("ok") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Parsed {
                status: Status::Accepted,
                score: full_score,
                message: truncate(rest),
            };
        }
    }
    if let Some(caps) = POINTS_RE.captures(first) {
        let points: f64 = caps[1].parse().unwrap_or(0.0);
        return scored(points, full_score, &caps[2]);
    }
    if let Some(caps) = PARTIAL_RE.captures(first) {
        let percent: f64 = caps[1].parse().unwrap_or(0.0);
        return scored(full_score * percent / 100.0, full_score, &caps[2]);
    }
    if first.starts_with("FAIL") {
        return Parsed {
            status: Status::SystemError,
            score: 0.0,
            message: truncate(text),
        };
    }
    let message = first
        .strip_prefix("wrong answer")
        .or_else(|| first.strip_prefix("unexpected eof"))
        .map(truncate)
        .unwrap_or_else(|| truncate(text));
    Parsed {
        status: Status::WrongAnswer,
        score: 0.0,
        message,
    }
}
