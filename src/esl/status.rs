// src/esl/status.rs
//! Parsing of the `api status` report.
//!
//! ```text
//! UP 0 years, 2 days, 4 hours, 11 minutes, 3 seconds, 512 milliseconds, 80 microseconds
//! FreeSWITCH (Version 1.10.9 -release 64bit) is ready
//! 812 session(s) since startup
//! 5 session(s) - peak 37, last 5min 12
//! 1 session(s) per Sec out of max 30, peak 9, last 5min 2
//! 100 session(s) max
//! min idle cpu 0.00/90.00
//! ```

use chrono::Utc;

use super::EslError;
use crate::models::CapacitySnapshot;

pub fn parse_status(body: &str) -> Result<CapacitySnapshot, EslError> {
    let mut current = None;
    let mut cps = None;
    let mut max = None;
    let mut idle = None;

    for line in body.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("min idle cpu") {
            idle = rest
                .trim()
                .split('/')
                .nth(1)
                .and_then(|v| v.trim().parse::<f64>().ok());
        } else if line.contains("session(s) - peak") {
            current = leading_number(line);
        } else if line.contains("session(s) per Sec") {
            cps = leading_number(line);
        } else if line.ends_with("session(s) max") {
            max = leading_number(line);
        }
    }

    let missing = |field: &str| EslError::Malformed(format!("status report has no {}", field));

    Ok(CapacitySnapshot {
        current_sessions: current.ok_or_else(|| missing("current sessions"))?,
        max_sessions: max.ok_or_else(|| missing("max sessions"))?,
        calls_per_second: cps.ok_or_else(|| missing("calls per second"))?,
        cpu_idle: idle.ok_or_else(|| missing("idle cpu"))? / 100.0,
        sampled_at: Utc::now(),
    })
}

fn leading_number(line: &str) -> Option<u32> {
    line.split_whitespace().next()?.parse().ok()
}
