//! Step accounting for flow runs.
//!
//! Counts completed, skipped and failed steps and the time spent in each
//! bucket, plus lightweight timing helpers.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Outcome buckets tracked per flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcomeKind {
    Completed,
    Skipped,
    Failed,
}

/// Aggregated step counts and timings.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowMetrics {
    pub completed_steps: u64,
    pub completed_time_ms: u64,

    pub skipped_steps: u64,
    pub skipped_time_ms: u64,

    pub failed_steps: u64,
    pub failed_time_ms: u64,

    pub total_steps: u64,
    pub total_time_ms: u64,
}

impl FlowMetrics {
    /// Record one step outcome and update cumulative totals.
    pub fn record(&mut self, outcome: StepOutcomeKind, elapsed_ms: u64) {
        match outcome {
            StepOutcomeKind::Completed => {
                self.completed_steps += 1;
                self.completed_time_ms += elapsed_ms;
            }
            StepOutcomeKind::Skipped => {
                self.skipped_steps += 1;
                self.skipped_time_ms += elapsed_ms;
            }
            StepOutcomeKind::Failed => {
                self.failed_steps += 1;
                self.failed_time_ms += elapsed_ms;
            }
        }

        self.total_steps += 1;
        self.total_time_ms += elapsed_ms;
    }
}

/// Start a step timer on the tokio clock, so paused-time tests see virtual time.
pub fn start_step_timer() -> Instant {
    Instant::now()
}

pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
