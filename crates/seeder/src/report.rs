//! Run outcome

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use kvparity_core::RunId;
use kvparity_workload::{DeviationMetric, DidNotConverge, StopReason};

/// What a seeding run did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier attached to the run's log lines
    pub run_id: RunId,
    /// Targets every batch was broadcast to
    pub targets: usize,
    /// Operations acknowledged by every target
    pub operations: u64,
    /// Batches broadcast
    pub batches: u64,
    /// Metric when the run stopped
    pub metric: DeviationMetric,
    /// Why the run stopped; `None` when it was cancelled
    pub stop_reason: Option<StopReason>,
    /// Set when the ceiling was hit before the target deviation
    pub warning: Option<DidNotConverge>,
    /// Whether a cancel request ended the run early
    pub cancelled: bool,
    /// Wall time of the run
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Whether the run reached its target deviation
    pub fn converged(&self) -> bool {
        self.stop_reason == Some(StopReason::Converged)
    }

    /// JSON form of the report
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} operations in {} batches to {} target(s), {} live keys, deviation {:.4}, {} ms",
            self.run_id,
            self.operations,
            self.batches,
            self.targets,
            self.metric.live_keys,
            self.metric.deviation,
            self.elapsed.as_millis()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if let Some(warning) = &self.warning {
            write!(f, "\nwarning: {}", warning)?;
        }
        Ok(())
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}
