//! Keyspace of the in-process server

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

/// A stored value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Byte string
    String(Vec<u8>),
    /// List, head first
    List(VecDeque<Vec<u8>>),
    /// Member set
    Set(BTreeSet<Vec<u8>>),
    /// Field map
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    /// Member to score
    ZSet(BTreeMap<Vec<u8>, f64>),
    /// JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Reply to `TYPE`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
            Value::Json(_) => "ReJSON-RL",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::ZSet(z) => z.is_empty(),
            Value::String(_) | Value::Json(_) => false,
        }
    }
}

/// A key's value and optional expiry deadline
#[derive(Debug, Clone)]
pub struct Entry {
    /// Stored value
    pub value: Value,
    /// Deadline after which the key reads as absent
    pub expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// All logical databases plus the change counter reported by `INFO`
#[derive(Debug)]
pub struct Store {
    dbs: Vec<BTreeMap<Vec<u8>, Entry>>,
    dirty: u64,
}

impl Store {
    /// Empty store with `databases` logical databases
    pub fn new(databases: u16) -> Self {
        Self {
            dbs: (0..databases.max(1)).map(|_| BTreeMap::new()).collect(),
            dirty: 0,
        }
    }

    /// Number of logical databases
    pub fn databases(&self) -> usize {
        self.dbs.len()
    }

    /// Writes since startup
    pub fn dirty(&self) -> u64 {
        self.dirty
    }

    /// Count a completed write
    pub fn touch(&mut self) {
        self.dirty += 1;
    }

    /// Live entry for `key`, expiring it first if its deadline passed
    pub fn get(&mut self, db: usize, key: &[u8]) -> Option<&Entry> {
        self.expire_if_due(db, key);
        self.dbs[db].get(key)
    }

    /// Mutable live entry for `key`
    pub fn get_mut(&mut self, db: usize, key: &[u8]) -> Option<&mut Entry> {
        self.expire_if_due(db, key);
        self.dbs[db].get_mut(key)
    }

    /// Store `value` under `key`, clearing any TTL
    pub fn set(&mut self, db: usize, key: &[u8], value: Value) {
        self.dbs[db].insert(
            key.to_vec(),
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Remove `key`; whether it was live
    pub fn remove(&mut self, db: usize, key: &[u8]) -> bool {
        self.expire_if_due(db, key);
        self.dbs[db].remove(key).is_some()
    }

    /// Drop `key` if it holds an empty collection
    pub fn drop_if_empty(&mut self, db: usize, key: &[u8]) {
        if self.dbs[db]
            .get(key)
            .is_some_and(|e| e.value.is_empty_collection())
        {
            self.dbs[db].remove(key);
        }
    }

    /// Set the expiry of a live key; whether the key exists
    pub fn expire(&mut self, db: usize, key: &[u8], ttl: Option<Duration>) -> bool {
        match self.get_mut(db, key) {
            Some(entry) => {
                entry.expires_at = ttl.map(|d| Instant::now() + d);
                true
            }
            None => false,
        }
    }

    /// Live keys of `db` in sorted order
    pub fn keys(&mut self, db: usize) -> Vec<Vec<u8>> {
        self.purge(db);
        self.dbs[db].keys().cloned().collect()
    }

    /// Live key count of `db`
    pub fn len(&mut self, db: usize) -> usize {
        self.purge(db);
        self.dbs[db].len()
    }

    /// Keys of `db` carrying a TTL
    pub fn volatile_len(&mut self, db: usize) -> usize {
        self.purge(db);
        self.dbs[db].values().filter(|e| e.expires_at.is_some()).count()
    }

    /// Remove every key; number removed
    pub fn flush(&mut self) -> usize {
        let mut removed = 0;
        for db in &mut self.dbs {
            removed += db.len();
            db.clear();
        }
        removed
    }

    fn purge(&mut self, db: usize) {
        let now = Instant::now();
        self.dbs[db].retain(|_, e| !e.is_expired(now));
    }

    fn expire_if_due(&mut self, db: usize, key: &[u8]) {
        let now = Instant::now();
        if self.dbs[db].get(key).is_some_and(|e| e.is_expired(now)) {
            self.dbs[db].remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_expiry() {
        let mut store = Store::new(1);
        store.set(0, b"k", Value::String(b"v".to_vec()));
        assert!(store.expire(0, b"k", Some(Duration::ZERO)));
        assert!(store.get(0, b"k").is_none());
        assert_eq!(store.len(0), 0);
    }

    #[test]
    fn test_set_clears_ttl() {
        let mut store = Store::new(1);
        store.set(0, b"k", Value::String(b"v".to_vec()));
        store.expire(0, b"k", Some(Duration::from_secs(60)));
        store.set(0, b"k", Value::String(b"w".to_vec()));
        assert!(store.get(0, b"k").unwrap().expires_at.is_none());
    }

    #[test]
    fn test_empty_collection_is_dropped() {
        let mut store = Store::new(1);
        store.set(0, b"l", Value::List(VecDeque::new()));
        store.drop_if_empty(0, b"l");
        assert!(store.get(0, b"l").is_none());
    }

    #[test]
    fn test_keys_sorted_per_db() {
        let mut store = Store::new(2);
        store.set(1, b"b", Value::String(vec![]));
        store.set(1, b"a", Value::String(vec![]));
        store.set(0, b"c", Value::String(vec![]));
        assert_eq!(store.keys(1), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(store.flush(), 3);
    }
}
