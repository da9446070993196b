//! Captured keyspace model
//!
//! A [`Snapshot`] maps `(db, key)` to a [`KeyState`]: the value type, the
//! value in canonical form, and a coarse TTL bucket. Canonical values are
//! order-independent where the server's ordering is unspecified (sets, hash
//! fields, sorted-set members) so two captures of equal keyspaces compare
//! equal regardless of enumeration order.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

use kvparity_core::ValueType;

/// Bytes that serialize as text when UTF-8, otherwise as `base64:`-prefixed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    /// Display form used in reports
    pub fn display(&self) -> String {
        match std::str::from_utf8(&self.0) {
            Ok(s) => s.to_string(),
            Err(_) => format!(
                "base64:{}",
                base64::engine::general_purpose::STANDARD.encode(&self.0)
            ),
        }
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Blob(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self {
        Blob(v)
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display())
    }
}

/// Normalized value representation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CanonicalValue {
    /// String bytes
    String(Blob),
    /// List elements in order
    List(Vec<Blob>),
    /// Sorted member set
    Set(BTreeSet<Blob>),
    /// Sorted field map
    Hash(BTreeMap<Blob, Blob>),
    /// Member to score, scores normalized through `f64`
    ZSet(BTreeMap<Blob, f64>),
    /// JSON document re-serialized with sorted object keys
    Json(String),
}

impl CanonicalValue {
    /// Value type this value belongs to
    pub fn value_type(&self) -> ValueType {
        match self {
            CanonicalValue::String(_) => ValueType::String,
            CanonicalValue::List(_) => ValueType::List,
            CanonicalValue::Set(_) => ValueType::Set,
            CanonicalValue::Hash(_) => ValueType::Hash,
            CanonicalValue::ZSet(_) => ValueType::ZSet,
            CanonicalValue::Json(_) => ValueType::Json,
        }
    }

    /// Element count (1 for strings and JSON documents)
    pub fn len(&self) -> usize {
        match self {
            CanonicalValue::String(_) | CanonicalValue::Json(_) => 1,
            CanonicalValue::List(l) => l.len(),
            CanonicalValue::Set(s) => s.len(),
            CanonicalValue::Hash(h) => h.len(),
            CanonicalValue::ZSet(z) => z.len(),
        }
    }

    /// Whether a collection value has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 64-bit content digest; equal values have equal digests
    pub fn digest(&self) -> u64 {
        let mut buf = Vec::new();
        buf.push(self.value_type() as u8);
        let mut put = |bytes: &[u8]| {
            buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            buf.extend_from_slice(bytes);
        };
        match self {
            CanonicalValue::String(b) => put(&b.0),
            CanonicalValue::Json(s) => put(s.as_bytes()),
            CanonicalValue::List(items) => items.iter().for_each(|b| put(&b.0)),
            CanonicalValue::Set(items) => items.iter().for_each(|b| put(&b.0)),
            CanonicalValue::Hash(map) => map.iter().for_each(|(k, v)| {
                put(&k.0);
                put(&v.0);
            }),
            CanonicalValue::ZSet(map) => map.iter().for_each(|(k, v)| {
                put(&k.0);
                put(&v.to_bits().to_le_bytes());
            }),
        }
        xxh3_64(&buf)
    }
}

/// Coarse remaining time to live
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlBucket {
    /// Persistent key
    NoTtl,
    /// Expires within the short threshold; may vanish at any moment
    Short,
    /// Expires later
    Long,
}

impl TtlBucket {
    /// Bucket for a `PTTL` reply in milliseconds (`-1` for no TTL)
    pub fn from_pttl(pttl_ms: i64, short_threshold_ms: u64) -> TtlBucket {
        if pttl_ms < 0 {
            TtlBucket::NoTtl
        } else if (pttl_ms as u64) < short_threshold_ms {
            TtlBucket::Short
        } else {
            TtlBucket::Long
        }
    }

    /// Whether the key carries any TTL
    pub fn has_ttl(&self) -> bool {
        !matches!(self, TtlBucket::NoTtl)
    }
}

/// Captured state of one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyState {
    /// Value type reported by `TYPE`
    pub value_type: ValueType,
    /// Canonical value
    pub value: CanonicalValue,
    /// TTL bucket
    pub ttl: TtlBucket,
}

impl KeyState {
    /// Persistent key state
    pub fn new(value: CanonicalValue) -> Self {
        Self {
            value_type: value.value_type(),
            value,
            ttl: TtlBucket::NoTtl,
        }
    }

    /// Same state with a TTL bucket
    pub fn with_ttl(mut self, ttl: TtlBucket) -> Self {
        self.ttl = ttl;
        self
    }

    /// Short form for diffs, e.g. `hash[3] #1a2b3c4d5e6f7a8b ttl=no_ttl`
    pub fn summary(&self) -> String {
        format!(
            "{}[{}] #{:016x} ttl={:?}",
            self.value_type.name().to_ascii_lowercase(),
            self.value.len(),
            self.value.digest(),
            self.ttl
        )
    }
}

/// Snapshot key: logical database and key bytes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct KeyRef {
    /// Logical database
    pub db: u16,
    /// Key bytes
    pub key: Blob,
}

impl KeyRef {
    /// Key reference from a database index and key bytes
    pub fn new(db: u16, key: impl Into<Blob>) -> Self {
        Self { db, key: key.into() }
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db{}:{}", self.db, self.key)
    }
}

/// How a capture bounded its reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMeta {
    /// Target address
    pub target: String,
    /// Capture completion time
    pub captured_at: DateTime<Utc>,
    /// Full pagination passes performed
    pub passes: u32,
    /// Whether the generation token was unchanged across the final pass
    pub stable: bool,
}

/// Point-in-time keyspace of one target
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Capture metadata
    pub meta: SnapshotMeta,
    /// Keys in `(db, key)` order
    #[serde(serialize_with = "entries_as_list")]
    pub entries: BTreeMap<KeyRef, KeyState>,
}

impl Snapshot {
    /// Snapshot over `entries` with fresh metadata
    pub fn new(target: impl Into<String>, entries: BTreeMap<KeyRef, KeyState>) -> Self {
        Self {
            meta: SnapshotMeta {
                target: target.into(),
                captured_at: Utc::now(),
                passes: 1,
                stable: true,
            },
            entries,
        }
    }

    /// Number of captured keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys were captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// State of one key
    pub fn get(&self, db: u16, key: &str) -> Option<&KeyState> {
        self.entries.get(&KeyRef::new(db, key))
    }

    /// Digest over every key and value; equal keyspaces have equal digests
    pub fn digest(&self) -> u64 {
        let mut buf = Vec::with_capacity(self.entries.len() * 24);
        for (key, state) in &self.entries {
            buf.extend_from_slice(&key.db.to_le_bytes());
            buf.extend_from_slice(&(key.key.0.len() as u64).to_le_bytes());
            buf.extend_from_slice(&key.key.0);
            buf.extend_from_slice(&state.value.digest().to_le_bytes());
            buf.push(u8::from(state.ttl.has_ttl()));
        }
        xxh3_64(&buf)
    }

    /// Pretty JSON export
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Serialize)]
struct EntryView<'a> {
    db: u16,
    key: &'a Blob,
    #[serde(flatten)]
    state: &'a KeyState,
}

fn entries_as_list<S: Serializer>(
    entries: &BTreeMap<KeyRef, KeyState>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(entries.len()))?;
    for (key, state) in entries {
        seq.serialize_element(&EntryView {
            db: key.db,
            key: &key.key,
            state,
        })?;
    }
    seq.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(items: &[&str]) -> Vec<Blob> {
        items.iter().map(|s| Blob::from(*s)).collect()
    }

    #[test]
    fn test_blob_display() {
        assert_eq!(Blob::from("abc").display(), "abc");
        assert_eq!(Blob(vec![0xff, 0x00]).display(), "base64:/wA=");
    }

    #[test]
    fn test_ttl_bucket() {
        assert_eq!(TtlBucket::from_pttl(-1, 1000), TtlBucket::NoTtl);
        assert_eq!(TtlBucket::from_pttl(999, 1000), TtlBucket::Short);
        assert_eq!(TtlBucket::from_pttl(1000, 1000), TtlBucket::Long);
        assert!(TtlBucket::Short.has_ttl());
    }

    #[test]
    fn test_digest_distinguishes_types() {
        let list = CanonicalValue::List(blobs(&["a"]));
        let set = CanonicalValue::Set(blobs(&["a"]).into_iter().collect());
        assert_ne!(list.digest(), set.digest());
    }

    #[test]
    fn test_digest_distinguishes_element_boundaries() {
        let a = CanonicalValue::List(blobs(&["ab", "c"]));
        let b = CanonicalValue::List(blobs(&["a", "bc"]));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_json_export_is_a_list() {
        let mut entries = BTreeMap::new();
        entries.insert(
            KeyRef::new(0, "k"),
            KeyState::new(CanonicalValue::String(Blob::from("v"))),
        );
        let snapshot = Snapshot::new("127.0.0.1:1", entries);
        let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        let first = &value["entries"][0];
        assert_eq!(first["db"], 0);
        assert_eq!(first["key"], "k");
        assert_eq!(first["value_type"], "STRING");
        assert_eq!(first["value"]["type"], "string");
        assert_eq!(first["ttl"], "no_ttl");
    }

    #[test]
    fn test_key_ref_orders_by_db_then_key() {
        let mut keys = vec![KeyRef::new(1, "a"), KeyRef::new(0, "b"), KeyRef::new(0, "a")];
        keys.sort();
        assert_eq!(keys[0].to_string(), "db0:a");
        assert_eq!(keys[2].to_string(), "db1:a");
    }
}
