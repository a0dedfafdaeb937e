//! Progress tracking for remote snapshot copies.
//!
//! The store only reports a percentage. The watch keeps the best value seen
//! and the instant it last moved; a copy is stalled once that instant is
//! older than the configured timeout.

use std::time::Duration;
use tokio::time::Instant;

/// Stall clock for one copy operation
#[derive(Debug, Clone)]
pub struct StallWatch {
    started_at: Instant,
    last_progress_at: Instant,
    best_percent: u8,
    timeout: Duration,
}

impl StallWatch {
    /// Start the clock now
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            last_progress_at: now,
            best_percent: 0,
            timeout,
        }
    }

    /// Record an observed percentage. Only a strict increase over the best
    /// value seen so far counts as progress and restarts the clock.
    pub fn observe(&mut self, percent: u8) -> bool {
        if percent > self.best_percent {
            self.best_percent = percent;
            self.last_progress_at = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn best_percent(&self) -> u8 {
        self.best_percent
    }

    /// Time since the last observed advance (or since start)
    pub fn since_progress(&self) -> Duration {
        self.last_progress_at.elapsed()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_stalled(&self) -> bool {
        self.since_progress() >= self.timeout
    }
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
