//! Deviation metric and stop controller
//!
//! The metric measures how far the run still is from its declared keyspace:
//! `deviation = |live_keys - keys| / keys`, which starts at 1 for an empty
//! run and falls toward 0 as the keyspace fills. The controller stops the run
//! once the deviation is at or below the requested target, or once its
//! iteration ceiling is hit.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use kvparity_core::{Error, Result, WorkloadConfig};

use crate::run_state::RunState;

/// Coverage of the run so far. Recomputed after every batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationMetric {
    /// Remaining distance from the declared key count, in `[0, 1]`
    pub deviation: f64,
    /// Fraction of the `keys * dbcount` slot space ever targeted
    pub touched_fraction: f64,
    /// Fraction of enabled value types created at least once
    pub type_coverage: f64,
    /// Keys believed present on every target
    pub live_keys: u64,
    /// Operations emitted
    pub operations: u64,
}

impl DeviationMetric {
    /// Metric of `state` under `config`
    pub fn compute(state: &RunState, config: &WorkloadConfig) -> Self {
        let keys = config.keys.max(1) as f64;
        let live = state.live_keys() as f64;
        let slots = keys * f64::from(config.dbcount.max(1));
        let enabled = config.enabled_types();
        let covered = enabled
            .iter()
            .filter(|t| state.created_types().contains(t))
            .count();
        Self {
            deviation: ((live - keys).abs() / keys).min(1.0),
            touched_fraction: (state.touched_keys() as f64 / slots).min(1.0),
            type_coverage: if enabled.is_empty() {
                0.0
            } else {
                covered as f64 / enabled.len() as f64
            },
            live_keys: state.live_keys() as u64,
            operations: state.operations(),
        }
    }
}

/// Pure convergence test: the metric has reached `target_deviation`
pub fn converged(metric: &DeviationMetric, target_deviation: f64) -> bool {
    metric.deviation <= target_deviation
}

/// Reject a target deviation outside `[0, 1]`
pub fn validate_target(target_deviation: f64) -> Result<()> {
    if (0.0..=1.0).contains(&target_deviation) {
        Ok(())
    } else {
        Err(Error::invalid_config(format!(
            "target_deviation must be within [0, 1], got {}",
            target_deviation
        )))
    }
}

/// Why the controller stopped the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The deviation reached the target
    Converged,
    /// The iteration ceiling or the operation ceiling was hit first
    Ceiling,
}

/// Non-fatal warning: the run stopped before reaching its target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidNotConverge {
    /// Requested deviation
    pub target_deviation: f64,
    /// Deviation when the run stopped
    pub final_deviation: f64,
    /// `should_stop` evaluations performed
    pub iterations: u64,
}

impl fmt::Display for DidNotConverge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "did not converge: deviation {:.4} above target {:.4} after {} iterations",
            self.final_deviation, self.target_deviation, self.iterations
        )
    }
}

/// Decides when generation stops
#[derive(Debug, Clone)]
pub struct DeviationController {
    max_iterations: u64,
    iterations: u64,
    stopped: Option<StopReason>,
    warning: Option<DidNotConverge>,
}

impl DeviationController {
    /// Controller with an explicit iteration ceiling
    pub fn new(max_iterations: u64) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            iterations: 0,
            stopped: None,
            warning: None,
        }
    }

    /// Controller whose ceiling covers the whole operation budget of `config`
    pub fn for_config(config: &WorkloadConfig) -> Self {
        let batch = config.batch_size.max(1) as u64;
        let ceiling = config.op_ceiling();
        let batches = ceiling / batch + u64::from(ceiling % batch != 0);
        Self::new(batches.saturating_add(1))
    }

    /// Whether generation should stop given the latest metric.
    ///
    /// Each call counts as one iteration. Once it returns `true` it keeps
    /// returning `true`.
    pub fn should_stop(&mut self, metric: &DeviationMetric, target_deviation: f64) -> bool {
        if self.stopped.is_some() {
            return true;
        }
        self.iterations += 1;
        if converged(metric, target_deviation) {
            self.stopped = Some(StopReason::Converged);
            return true;
        }
        if self.iterations >= self.max_iterations {
            self.stop_at_ceiling(metric, target_deviation);
            return true;
        }
        false
    }

    /// Record that the generator ran out of operations before convergence
    pub fn generator_exhausted(&mut self, metric: &DeviationMetric, target_deviation: f64) {
        if self.stopped.is_none() {
            if converged(metric, target_deviation) {
                self.stopped = Some(StopReason::Converged);
            } else {
                self.stop_at_ceiling(metric, target_deviation);
            }
        }
    }

    /// Why the run stopped, once it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Convergence warning, if the ceiling was hit first
    pub fn warning(&self) -> Option<&DidNotConverge> {
        self.warning.as_ref()
    }

    /// Evaluations performed
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Iteration ceiling
    pub fn max_iterations(&self) -> u64 {
        self.max_iterations
    }

    fn stop_at_ceiling(&mut self, metric: &DeviationMetric, target_deviation: f64) {
        let warning = DidNotConverge {
            target_deviation,
            final_deviation: metric.deviation,
            iterations: self.iterations,
        };
        warn!(
            target: "kvparity::workload",
            target_deviation,
            final_deviation = metric.deviation,
            iterations = self.iterations,
            operations = metric.operations,
            "Run hit its ceiling before reaching the target deviation"
        );
        self.stopped = Some(StopReason::Ceiling);
        self.warning = Some(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(deviation: f64) -> DeviationMetric {
        DeviationMetric {
            deviation,
            touched_fraction: 0.0,
            type_coverage: 0.0,
            live_keys: 0,
            operations: 0,
        }
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target(0.0).is_ok());
        assert!(validate_target(1.0).is_ok());
        assert!(validate_target(-0.1).is_err());
        assert!(validate_target(1.5).is_err());
        assert!(validate_target(f64::NAN).is_err());
    }

    #[test]
    fn test_stops_on_convergence() {
        let mut controller = DeviationController::new(10);
        assert!(!controller.should_stop(&metric(0.5), 0.1));
        assert!(controller.should_stop(&metric(0.1), 0.1));
        assert_eq!(controller.stop_reason(), Some(StopReason::Converged));
        assert!(controller.warning().is_none());
    }

    #[test]
    fn test_ceiling_warns() {
        let mut controller = DeviationController::new(3);
        assert!(!controller.should_stop(&metric(0.9), 0.1));
        assert!(!controller.should_stop(&metric(0.8), 0.1));
        assert!(controller.should_stop(&metric(0.7), 0.1));
        assert_eq!(controller.stop_reason(), Some(StopReason::Ceiling));
        let warning = controller.warning().unwrap();
        assert_eq!(warning.final_deviation, 0.7);
        assert_eq!(warning.iterations, 3);
        assert!(warning.to_string().contains("did not converge"));
    }

    #[test]
    fn test_stop_is_sticky() {
        let mut controller = DeviationController::new(1);
        assert!(controller.should_stop(&metric(1.0), 0.0));
        assert!(controller.should_stop(&metric(0.0), 0.0));
        assert_eq!(controller.iterations(), 1);
    }

    #[test]
    fn test_generator_exhausted() {
        let mut controller = DeviationController::new(100);
        controller.generator_exhausted(&metric(0.4), 0.1);
        assert_eq!(controller.stop_reason(), Some(StopReason::Ceiling));
        assert!(controller.warning().is_some());
    }

    #[test]
    fn test_for_config_covers_budget() {
        let config = WorkloadConfig::default()
            .with_keys(1000)
            .with_batch_size(100)
            .with_max_ops_multiplier(20);
        assert_eq!(DeviationController::for_config(&config).max_iterations(), 201);
    }

    #[test]
    fn test_metric_of_empty_run() {
        let config = WorkloadConfig::default();
        let state = RunState::new(&config);
        let m = DeviationMetric::compute(&state, &config);
        assert_eq!(m.deviation, 1.0);
        assert_eq!(m.live_keys, 0);
        assert_eq!(m.type_coverage, 0.0);
    }
}
