// src/models/capacity.rs
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time load reading from the media engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacitySnapshot {
    pub current_sessions: u32,
    pub max_sessions: u32,
    pub calls_per_second: u32,
    /// Fraction of CPU left idle, `0.0..=1.0`.
    pub cpu_idle: f64,
    pub sampled_at: DateTime<Utc>,
}

impl CapacitySnapshot {
    pub fn free_sessions(&self) -> u32 {
        self.max_sessions.saturating_sub(self.current_sessions)
    }
}
