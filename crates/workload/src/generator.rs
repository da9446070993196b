//! Seeded operation generator
//!
//! Every slot consumes randomness in the same order:
//!
//! 1. action class (create / mutate / delete), weighted by keyspace fill
//! 2. key slot (uniform, or a live key with probability `hot_key_bias`)
//! 3. value type from the enabled types
//! 4. operation kind for the resolved type
//! 5. operation parameters
//!
//! Steps 1 to 3 are drawn even when the outcome makes them irrelevant, so the
//! sequence depends only on the seed and the configuration.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tracing::debug;

use kvparity_core::{Operation, OperationSpec, ValueType, WorkloadConfig};

use crate::run_state::{key_name, KeySlot, RunState};

const SET_MEMBERS: u32 = 32;
const HASH_FIELDS: u32 = 8;
const HASH_COUNTERS: u32 = 4;
const ZSET_MEMBERS: u32 = 32;
const MAX_ELEMENTS: usize = 4;
const LIST_KEEP: i64 = 16;
const EXPIRE_SECONDS: std::ops::RangeInclusive<u64> = 1..=30;

/// JSON path incremented by `JSON.NUMINCRBY`; every generated document has it
pub const JSON_COUNTER_PATH: &str = "$.counter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Mutate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Create,
    Mutate(u8),
    Del,
    Expire,
}

/// Produce up to `batch_size` operations, advancing `state`.
///
/// A delete-then-create pair is never split across batches, so a batch may
/// exceed `batch_size` by one. Returns fewer operations (possibly none) once
/// the operation ceiling is reached.
///
/// `config` is expected to have passed [`WorkloadConfig::validate`]; a
/// config with no keys, no databases or no enabled types yields nothing.
pub fn next_batch(state: &mut RunState, config: &WorkloadConfig, batch_size: usize) -> Vec<OperationSpec> {
    let ceiling = config.op_ceiling();
    let enabled = config.enabled_types();
    if config.keys == 0 || config.dbcount == 0 || enabled.is_empty() {
        state.mark_exhausted();
        return Vec::new();
    }
    let mut batch = Vec::with_capacity(batch_size + 1);

    while batch.len() < batch_size {
        if state.operations() >= ceiling {
            state.mark_exhausted();
            break;
        }
        let planned = plan_slot(state, config, &enabled);
        if state.operations() + planned.len() as u64 > ceiling {
            state.mark_exhausted();
            break;
        }
        for (slot, op) in planned {
            apply(state, slot, &op);
            batch.push(OperationSpec {
                seq: state.next_seq(),
                db: slot.0,
                key: key_name(slot.1),
                op,
            });
        }
    }

    debug!(
        target: "kvparity::workload",
        ops = batch.len(),
        total = state.operations(),
        live = state.live_keys(),
        "Generated batch"
    );
    batch
}

/// Operations for one slot, not yet applied to `state`
fn plan_slot(state: &mut RunState, config: &WorkloadConfig, enabled: &[ValueType]) -> Vec<(KeySlot, Operation)> {
    let action = draw_action(state, config);
    let slot = draw_slot(state, config, action);
    let drawn_type = enabled[state.rng.gen_range(0..enabled.len())];
    let current = state.type_of(slot);
    let volatile = state.is_volatile(slot);

    let value_type = match (action, current) {
        (Action::Mutate, Some(t)) if enabled.contains(&t) => t,
        _ => drawn_type,
    };
    let kind = draw_kind(state, config, action, value_type, current.is_some());

    let mut ops = Vec::with_capacity(2);
    match kind {
        Kind::Del => ops.push((slot, Operation::Del)),
        Kind::Expire => ops.push((slot, Operation::Expire {
            seconds: state.rng.gen_range(EXPIRE_SECONDS),
        })),
        Kind::Create | Kind::Mutate(_) => {
            let clash = volatile || current.is_some_and(|t| t != value_type);
            if clash {
                ops.push((slot, Operation::Del));
            }
            let op = match kind {
                Kind::Mutate(n) if !clash && current.is_some() => mutator(state, config, value_type, n),
                _ => creator(state, config, value_type),
            };
            ops.push((slot, op));
        }
    }
    ops
}

fn draw_action(state: &mut RunState, config: &WorkloadConfig) -> Action {
    let keys = config.keys as f64;
    let deficit = (keys - state.live_keys() as f64) / keys;
    let p_create = (0.2 + deficit).clamp(0.05, 0.9);
    let p_delete = (0.05 - deficit).clamp(0.02, 0.5);
    let roll: f64 = state.rng.gen();
    if roll < p_create {
        Action::Create
    } else if roll < p_create + p_delete {
        Action::Delete
    } else {
        Action::Mutate
    }
}

fn draw_slot(state: &mut RunState, config: &WorkloadConfig, action: Action) -> KeySlot {
    let hot = state.rng.gen_bool(config.hot_key_bias);
    let db = state.rng.gen_range(0..config.dbcount);
    let index = state.rng.gen_range(0..config.keys);
    if action != Action::Create && hot && state.live_keys() > 0 {
        let position = state.rng.gen_range(0..state.live_keys());
        state.live_at(position)
    } else {
        (db, index)
    }
}

fn draw_kind(
    state: &mut RunState,
    config: &WorkloadConfig,
    action: Action,
    value_type: ValueType,
    exists: bool,
) -> Kind {
    let nondeterministic = config.allow_non_deterministic_actions;
    match action {
        Action::Delete => {
            let expire = state.rng.gen_bool(0.5);
            if nondeterministic && exists && expire {
                Kind::Expire
            } else {
                Kind::Del
            }
        }
        Action::Create => Kind::Create,
        Action::Mutate => {
            let kinds = mutator_count(value_type, nondeterministic);
            Kind::Mutate(state.rng.gen_range(0..kinds))
        }
    }
}

/// Mutators per type: String {Append, Set}, List {RPush, LPush, LTrim},
/// Set {SAdd, SPop}, Hash {HSet, HIncrBy}, ZSet {ZAdd, ZIncrBy},
/// Json {JsonNumIncrBy, JsonSet}; `SPop` only when non-deterministic
/// actions are allowed.
fn mutator_count(value_type: ValueType, nondeterministic: bool) -> u8 {
    match value_type {
        ValueType::List => 3,
        ValueType::Set if !nondeterministic => 1,
        _ => 2,
    }
}

fn mutator(state: &mut RunState, config: &WorkloadConfig, value_type: ValueType, n: u8) -> Operation {
    let rng = &mut state.rng;
    match (value_type, n) {
        (ValueType::String, 0) => Operation::Append {
            value: payload(rng, config.value_size),
        },
        (ValueType::List, 1) => Operation::LPush {
            values: elements(rng, config.value_size),
        },
        (ValueType::List, 2) => Operation::LTrim {
            start: 0,
            stop: rng.gen_range(0..LIST_KEEP),
        },
        (ValueType::Set, 1) => Operation::SPop,
        (ValueType::Hash, 1) => Operation::HIncrBy {
            field: format!("n{}", rng.gen_range(0..HASH_COUNTERS)),
            delta: rng.gen_range(-100..=100),
        },
        (ValueType::ZSet, 1) => Operation::ZIncrBy {
            member: format!("z{}", rng.gen_range(0..ZSET_MEMBERS)),
            delta: quarter(rng, 40),
        },
        (ValueType::Json, 0) => Operation::JsonNumIncrBy {
            path: JSON_COUNTER_PATH.to_string(),
            delta: rng.gen_range(-50..=50),
        },
        _ => creator(state, config, value_type),
    }
}

fn creator(state: &mut RunState, config: &WorkloadConfig, value_type: ValueType) -> Operation {
    let rng = &mut state.rng;
    match value_type {
        ValueType::String => Operation::Set {
            value: payload(rng, config.value_size),
        },
        ValueType::List => Operation::RPush {
            values: elements(rng, config.value_size),
        },
        ValueType::Set => {
            let count = rng.gen_range(1..=MAX_ELEMENTS);
            Operation::SAdd {
                members: (0..count)
                    .map(|_| format!("m{}", rng.gen_range(0..SET_MEMBERS)))
                    .collect(),
            }
        }
        ValueType::Hash => {
            let count = rng.gen_range(1..=MAX_ELEMENTS);
            Operation::HSet {
                fields: (0..count)
                    .map(|_| {
                        let field = format!("f{}", rng.gen_range(0..HASH_FIELDS));
                        (field, payload(rng, config.value_size))
                    })
                    .collect(),
            }
        }
        ValueType::ZSet => {
            let count = rng.gen_range(1..=MAX_ELEMENTS);
            Operation::ZAdd {
                members: (0..count)
                    .map(|_| {
                        let score = quarter(rng, 400);
                        (score, format!("z{}", rng.gen_range(0..ZSET_MEMBERS)))
                    })
                    .collect(),
            }
        }
        ValueType::Json => {
            let tags: Vec<String> = (0..rng.gen_range(0..=3))
                .map(|_| payload(rng, config.value_size.min(8)))
                .collect();
            Operation::JsonSet {
                document: json!({
                    "counter": rng.gen_range(-1000i64..=1000),
                    "name": payload(rng, config.value_size),
                    "tags": tags,
                    "nested": {
                        "flag": rng.gen_bool(0.5),
                        "score": quarter(rng, 400),
                    },
                }),
            }
        }
    }
}

fn apply(state: &mut RunState, slot: KeySlot, op: &Operation) {
    match op {
        Operation::Del => state.record_delete(slot),
        Operation::Expire { .. } | Operation::SPop => state.record_volatile(slot),
        other => {
            if let Some(value_type) = other.value_type() {
                state.record_write(slot, value_type);
            }
        }
    }
}

/// Alphanumeric payload of 1..=`max_len` bytes
fn payload<R: Rng>(rng: &mut R, max_len: usize) -> String {
    let len = rng.gen_range(1..=max_len.max(1));
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

fn elements<R: Rng>(rng: &mut R, max_len: usize) -> Vec<String> {
    let count = rng.gen_range(1..=MAX_ELEMENTS);
    (0..count).map(|_| payload(rng, max_len)).collect()
}

/// Multiple of 0.25 in `[-span/4, span/4]`; exact in binary floating point
fn quarter<R: Rng>(rng: &mut R, span: i64) -> f64 {
    rng.gen_range(-span..=span) as f64 / 4.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkloadConfig {
        WorkloadConfig::default().with_keys(100).with_seed(7)
    }

    #[test]
    fn test_batch_size_and_sequence() {
        let config = config();
        let mut state = RunState::new(&config);
        let batch = next_batch(&mut state, &config, 50);
        assert!(batch.len() == 50 || batch.len() == 51);
        for (i, spec) in batch.iter().enumerate() {
            assert_eq!(spec.seq, i as u64);
        }
        assert_eq!(state.operations(), batch.len() as u64);
    }

    #[test]
    fn test_empty_keyspace_yields_nothing() {
        let configs = [
            config().with_keys(0),
            config().with_dbcount(0),
            ValueType::ALL
                .iter()
                .fold(config(), |c, t| c.without_type(*t)),
        ];
        for config in configs {
            let mut state = RunState::new(&config);
            assert!(next_batch(&mut state, &config, 10).is_empty());
            assert!(state.is_exhausted());
        }
    }

    #[test]
    fn test_first_batch_mostly_creates() {
        let config = config();
        let mut state = RunState::new(&config);
        let batch = next_batch(&mut state, &config, 20);
        let creates = batch.iter().filter(|s| s.op.creates_key()).count();
        assert!(creates > batch.len() / 2);
    }

    #[test]
    fn test_ceiling_is_never_exceeded() {
        let config = WorkloadConfig::default()
            .with_keys(10)
            .with_max_ops_multiplier(3);
        let mut state = RunState::new(&config);
        let mut total = 0;
        for _ in 0..100 {
            total += next_batch(&mut state, &config, 7).len();
        }
        assert!(total as u64 <= config.op_ceiling());
        assert!(state.is_exhausted());
        assert!(next_batch(&mut state, &config, 7).is_empty());
    }

    #[test]
    fn test_no_nondeterministic_ops_unless_allowed() {
        let config = config();
        let mut state = RunState::new(&config);
        for _ in 0..20 {
            for spec in next_batch(&mut state, &config, 100) {
                assert!(!spec.op.is_non_deterministic(), "{:?}", spec);
            }
        }
    }

    #[test]
    fn test_nondeterministic_ops_when_allowed() {
        let config = config().with_non_deterministic_actions(true);
        let mut state = RunState::new(&config);
        let mut seen = false;
        for _ in 0..20 {
            seen |= next_batch(&mut state, &config, 100)
                .iter()
                .any(|s| s.op.is_non_deterministic());
        }
        assert!(seen);
    }

    #[test]
    fn test_unsupported_types_never_generated() {
        let config = config()
            .without_type(ValueType::Json)
            .without_type(ValueType::ZSet);
        let mut state = RunState::new(&config);
        for _ in 0..20 {
            for spec in next_batch(&mut state, &config, 100) {
                let t = spec.op.value_type();
                assert_ne!(t, Some(ValueType::Json));
                assert_ne!(t, Some(ValueType::ZSet));
            }
        }
    }

    #[test]
    fn test_keys_within_namespace() {
        let config = config().with_dbcount(3);
        let mut state = RunState::new(&config);
        for spec in next_batch(&mut state, &config, 500) {
            assert!(spec.db < 3);
            let index: u64 = spec.key.strip_prefix("kp:").unwrap().parse().unwrap();
            assert!(index < config.keys);
        }
    }

    #[test]
    fn test_quarter_is_exact() {
        let mut state = RunState::with_seed(3);
        for _ in 0..100 {
            let q = quarter(&mut state.rng, 40);
            assert_eq!((q * 4.0).fract(), 0.0);
            assert!((-10.0..=10.0).contains(&q));
        }
    }

    #[test]
    fn test_json_documents_carry_counter() {
        let mut state = RunState::with_seed(5);
        let config = config();
        match creator(&mut state, &config, ValueType::Json) {
            Operation::JsonSet { document } => assert!(document["counter"].is_i64()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
