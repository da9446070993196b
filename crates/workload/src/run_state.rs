//! Generator-side model of the keyspace
//!
//! `RunState` is the generator's belief about what every target holds after
//! acknowledging all operations emitted so far. It is owned by the generation
//! task and only mutated by [`crate::generator`].

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap, HashSet};

use kvparity_core::{ValueType, WorkloadConfig};

use crate::deviation::DeviationMetric;

/// A key slot: logical database plus index in `[0, keys)`
pub type KeySlot = (u16, u64);

/// Wire name of the key at `index`
pub fn key_name(index: u64) -> String {
    format!("kp:{}", index)
}

/// Seeded generator state for one run
#[derive(Debug, Clone)]
pub struct RunState {
    pub(crate) rng: StdRng,
    seq: u64,
    types: HashMap<KeySlot, ValueType>,
    live: Vec<KeySlot>,
    positions: HashMap<KeySlot, usize>,
    volatile: HashSet<KeySlot>,
    touched: HashSet<KeySlot>,
    created: BTreeSet<ValueType>,
    exhausted: bool,
}

impl RunState {
    /// Fresh state seeded from `config.seed`
    pub fn new(config: &WorkloadConfig) -> Self {
        Self::with_seed(config.seed)
    }

    /// Fresh state with an explicit seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seq: 0,
            types: HashMap::new(),
            live: Vec::new(),
            positions: HashMap::new(),
            volatile: HashSet::new(),
            touched: HashSet::new(),
            created: BTreeSet::new(),
            exhausted: false,
        }
    }

    /// Operations emitted so far
    pub fn operations(&self) -> u64 {
        self.seq
    }

    /// Whether the operation ceiling stopped generation
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Type the key is known to hold, if it is live
    pub fn type_of(&self, slot: KeySlot) -> Option<ValueType> {
        self.types.get(&slot).copied()
    }

    /// Whether the key's presence is unknown (TTL set or popped)
    pub fn is_volatile(&self, slot: KeySlot) -> bool {
        self.volatile.contains(&slot)
    }

    /// Keys believed present on every target
    pub fn live_keys(&self) -> usize {
        self.live.len()
    }

    /// Distinct keys any operation targeted
    pub fn touched_keys(&self) -> usize {
        self.touched.len()
    }

    /// Value types created at least once
    pub fn created_types(&self) -> &BTreeSet<ValueType> {
        &self.created
    }

    /// Coverage snapshot against the configured keyspace
    pub fn metric(&self, config: &WorkloadConfig) -> DeviationMetric {
        DeviationMetric::compute(self, config)
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub(crate) fn live_at(&self, position: usize) -> KeySlot {
        self.live[position]
    }

    pub(crate) fn record_write(&mut self, slot: KeySlot, value_type: ValueType) {
        self.touched.insert(slot);
        self.volatile.remove(&slot);
        self.created.insert(value_type);
        self.types.insert(slot, value_type);
        if !self.positions.contains_key(&slot) {
            self.positions.insert(slot, self.live.len());
            self.live.push(slot);
        }
    }

    pub(crate) fn record_delete(&mut self, slot: KeySlot) {
        self.touched.insert(slot);
        self.volatile.remove(&slot);
        self.forget(slot);
    }

    pub(crate) fn record_volatile(&mut self, slot: KeySlot) {
        self.touched.insert(slot);
        self.forget(slot);
        self.volatile.insert(slot);
    }

    fn forget(&mut self, slot: KeySlot) {
        self.types.remove(&slot);
        if let Some(position) = self.positions.remove(&slot) {
            self.live.swap_remove(position);
            if let Some(moved) = self.live.get(position).copied() {
                self.positions.insert(moved, position);
            }
        }
    }
}
