//! Property tests for the workload generator and controller

use proptest::prelude::*;
use std::collections::HashMap;

use kvparity_core::{Operation, OperationSpec, ValueType, WorkloadConfig};
use kvparity_workload::{next_batch, DeviationController, RunState, StopReason};

fn config_strategy() -> impl Strategy<Value = WorkloadConfig> {
    (
        1u64..300,
        1u16..4,
        any::<u64>(),
        any::<bool>(),
        prop::sample::subsequence(ValueType::ALL.to_vec(), 0..5),
        1usize..64,
    )
        .prop_map(|(keys, dbcount, seed, nondeterministic, unsupported, batch)| {
            let mut config = WorkloadConfig::default()
                .with_keys(keys)
                .with_dbcount(dbcount)
                .with_seed(seed)
                .with_non_deterministic_actions(nondeterministic)
                .with_batch_size(batch)
                .with_max_ops_multiplier(5);
            for t in unsupported {
                config = config.without_type(t);
            }
            config
        })
}

fn generate(config: &WorkloadConfig, batches: usize) -> Vec<OperationSpec> {
    let mut state = RunState::new(config);
    (0..batches)
        .flat_map(|_| next_batch(&mut state, config, config.batch_size))
        .collect()
}

/// Server-side view replayed from the emitted operations: `None` for keys
/// whose presence is uncertain after `EXPIRE` or `SPOP`.
#[derive(Default)]
struct Model {
    keys: HashMap<(u16, String), Option<ValueType>>,
}

impl Model {
    fn check_and_apply(&mut self, spec: &OperationSpec) -> Result<(), String> {
        let slot = (spec.db, spec.key.clone());
        let current = self.keys.get(&slot).copied();
        match &spec.op {
            Operation::Del => {
                self.keys.remove(&slot);
            }
            Operation::Expire { .. } => match current {
                Some(Some(_)) => {
                    self.keys.insert(slot, None);
                }
                _ => return Err(format!("EXPIRE on a key not known to exist: {:?}", spec)),
            },
            op => {
                let t = op.value_type().ok_or("typed op without type")?;
                match current {
                    None if op.creates_key() => {}
                    Some(Some(existing)) if existing == t => {}
                    other => {
                        return Err(format!(
                            "{} on key in state {:?}: {:?}",
                            op.name(),
                            other,
                            spec
                        ))
                    }
                }
                if matches!(op, Operation::SPop) {
                    self.keys.insert(slot, None);
                } else {
                    self.keys.insert(slot, Some(t));
                }
            }
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_same_seed_same_sequence(config in config_strategy().prop_filter("valid", |c| c.validate().is_ok())) {
        let a = serde_json::to_vec(&generate(&config, 8)).unwrap();
        let b = serde_json::to_vec(&generate(&config, 8)).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_every_op_is_type_consistent(config in config_strategy().prop_filter("valid", |c| c.validate().is_ok())) {
        let mut model = Model::default();
        for spec in generate(&config, 20) {
            if let Err(msg) = model.check_and_apply(&spec) {
                prop_assert!(false, "{}", msg);
            }
        }
    }

    #[test]
    fn prop_sequence_is_contiguous_and_bounded(config in config_strategy().prop_filter("valid", |c| c.validate().is_ok())) {
        let ops = generate(&config, 1000);
        prop_assert!(ops.len() as u64 <= config.op_ceiling());
        for (i, spec) in ops.iter().enumerate() {
            prop_assert_eq!(spec.seq, i as u64);
        }
    }

    #[test]
    fn prop_controller_always_terminates(
        config in config_strategy().prop_filter("valid", |c| c.validate().is_ok()),
        target in 0.0f64..=1.0,
    ) {
        let mut state = RunState::new(&config);
        let mut controller = DeviationController::for_config(&config);
        let mut rounds = 0u64;
        loop {
            let metric = state.metric(&config);
            if controller.should_stop(&metric, target) {
                break;
            }
            if next_batch(&mut state, &config, config.batch_size).is_empty() {
                controller.generator_exhausted(&state.metric(&config), target);
                break;
            }
            rounds += 1;
            prop_assert!(rounds <= controller.max_iterations());
        }
        prop_assert!(controller.stop_reason().is_some());
        if controller.stop_reason() == Some(StopReason::Ceiling) {
            prop_assert!(controller.warning().is_some());
        }
    }
}

#[test]
fn test_different_seeds_differ() {
    let config = WorkloadConfig::default().with_keys(100);
    let a = generate(&config.clone().with_seed(1), 2);
    let b = generate(&config.with_seed(2), 2);
    assert_ne!(a, b);
}

#[test]
fn test_default_workload_converges() {
    let config = WorkloadConfig::default()
        .with_keys(1000)
        .without_type(ValueType::Json);
    let mut state = RunState::new(&config);
    let mut controller = DeviationController::for_config(&config);
    while !controller.should_stop(&state.metric(&config), 0.1) {
        assert!(!next_batch(&mut state, &config, config.batch_size).is_empty());
    }
    assert_eq!(controller.stop_reason(), Some(StopReason::Converged));
    assert!(state.live_keys() >= 900);
    assert_eq!(state.metric(&config).type_coverage, 1.0);
}
