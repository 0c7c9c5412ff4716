// Time and memory limit parsing
// Accepts the notations used in test-data configs: "1s", "500ms", "1.5s", "256m", "1g", "512k"

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TIME_RE: Regex = Regex::new(r"(?i)^([0-9]+(?:\.[0-9]*)?)\s*([mu]?)s?$").unwrap();
    static ref MEMORY_RE: Regex = Regex::new(r"(?i)^([0-9]+(?:\.[0-9]*)?)\s*([kmg])b?$").unwrap();
}

/// Parse a time limit into milliseconds
///
/// A bare number is already milliseconds; otherwise the unit is
/// seconds (`s`), milliseconds (`ms`) or microseconds (`us`).
pub fn parse_time_ms(value: &str) -> Result<u64, String> {
    let value = value.trim();
    if let Ok(ms) = value.parse::<u64>() {
        return Ok(ms);
    }
    let caps = TIME_RE
        .captures(value)
        .ok_or_else(|| format!("{} is not a valid time.", value))?;
    let number: f64 = caps[1]
        .parse()
        .map_err(|_| format!("{} is not a valid time.", value))?;
    let ms = match caps[2].to_ascii_lowercase().as_str() {
        "m" => number,
        "u" => number / 1000.0,
        _ => number * 1000.0,
    };
    Ok(ms.round() as u64)
}

/// Parse a memory limit into megabytes (rounded up)
///
/// A bare number is already megabytes.
pub fn parse_memory_mb(value: &str) -> Result<u64, String> {
    let value = value.trim();
    if let Ok(mb) = value.parse::<u64>() {
        return Ok(mb);
    }
    let caps = MEMORY_RE
        .captures(value)
        .ok_or_else(|| format!("{} is not a valid memory size.", value))?;
    let number: f64 = caps[1]
        .parse()
        .map_err(|_| format!("{} is not a valid memory size.", value))?;
    let mb = match caps[2].to_ascii_lowercase().as_str() {
        "k" => number / 1024.0,
        "g" => number * 1024.0,
        _ => number,
    };
    Ok(mb.ceil() as u64)
}
