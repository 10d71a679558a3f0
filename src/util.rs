use std::io;

use chrono::{DateTime, Utc};
use tracing_subscriber::{EnvFilter, fmt};

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .without_time()
        .with_writer(io::stderr)
        .try_init();
}

pub fn char_len(input: &str) -> usize {
    input.chars().count()
}

/// Cuts `input` to at most `max_len` characters, replacing the tail with
/// `...` when anything is dropped.
pub fn truncate(input: &str, max_len: usize) -> String {
    if char_len(input) <= max_len {
        return input.to_string();
    }
    if max_len <= 3 {
        return input.chars().take(max_len).collect();
    }
    let kept: String = input.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Collapses line breaks and tabs so free text fits on one terminal row.
pub fn single_line(input: &str) -> String {
    if !input.contains(['\n', '\r', '\t']) {
        return input.to_string();
    }
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn minutes_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed_secs = (now - timestamp).num_milliseconds() as f64 / 1000.0;
    (elapsed_secs / 60.0).round_ties_even() as i64
}

pub fn format_age(minutes: i64) -> String {
    format!("{} min ago", minutes.max(0))
}
