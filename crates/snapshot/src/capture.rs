//! Snapshot capture
//!
//! Keys are enumerated per logical database with cursor `SCAN`, then read
//! with a type-appropriate accessor. Collections are read incrementally
//! (`LRANGE` chunks, `SSCAN`, `HSCAN`, `ZSCAN`), never in one blocking call.
//! A key that disappears between enumeration and read is treated as absent.
//!
//! Under [`CutoffPolicy::Stable`] a generation token is read before and after
//! each full pass; if it advanced, the pass is discarded and repeated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use kvparity_core::{Error, Result, Target, ValueType};
use kvparity_pool::{PooledConnection, TargetPool};
use kvparity_wire::Frame;

use crate::snapshot::{Blob, CanonicalValue, KeyRef, KeyState, Snapshot, TtlBucket};

/// How a capture decides its cutoff point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CutoffPolicy {
    /// Repeat the pass until the generation token is unchanged across it
    Stable {
        /// Passes before keeping the last one as unstable
        max_passes: u32,
    },
    /// One pass, no token check
    SinglePass,
}

impl Default for CutoffPolicy {
    fn default() -> Self {
        CutoffPolicy::Stable { max_passes: 3 }
    }
}

/// Capture settings (`[capture]` section of `kvparity.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// `COUNT` hint for `SCAN` and the collection scans
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    /// Elements per `LRANGE` call
    #[serde(default = "default_list_chunk")]
    pub list_chunk: usize,
    /// TTLs below this many milliseconds land in [`TtlBucket::Short`]
    #[serde(default = "default_short_ttl_ms")]
    pub short_ttl_ms: u64,
    /// Databases to scan; discovered from `INFO keyspace` when unset
    #[serde(default)]
    pub databases: Option<u16>,
    /// Cutoff policy
    #[serde(default)]
    pub cutoff: CutoffPolicy,
}

fn default_scan_count() -> usize {
    100
}

fn default_list_chunk() -> usize {
    100
}

fn default_short_ttl_ms() -> u64 {
    5_000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            scan_count: default_scan_count(),
            list_chunk: default_list_chunk(),
            short_ttl_ms: default_short_ttl_ms(),
            databases: None,
            cutoff: CutoffPolicy::default(),
        }
    }
}

impl CaptureConfig {
    /// Set the cutoff policy
    pub fn with_cutoff(mut self, cutoff: CutoffPolicy) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Scan exactly `databases` logical databases
    pub fn with_databases(mut self, databases: u16) -> Self {
        self.databases = Some(databases);
        self
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<()> {
        if self.scan_count == 0 || self.list_chunk == 0 {
            return Err(Error::invalid_config(
                "capture.scan_count and capture.list_chunk must be at least 1",
            ));
        }
        if self.databases == Some(0) {
            return Err(Error::invalid_config("capture.databases must be at least 1"));
        }
        if let CutoffPolicy::Stable { max_passes: 0 } = self.cutoff {
            return Err(Error::invalid_config("capture.cutoff.max_passes must be at least 1"));
        }
        Ok(())
    }
}

/// Server-side change marker compared across a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationToken {
    /// `rdb_changes_since_last_save` from `INFO persistence`
    Changes(u64),
    /// Key count per scanned database
    Sizes(Vec<u64>),
}

/// Reads snapshots from targets
#[derive(Debug, Clone, Default)]
pub struct Capturer {
    config: CaptureConfig,
}

impl Capturer {
    /// Capturer with the given settings
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Capture settings
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture the target behind `pool` using the configured cutoff policy
    pub async fn capture(&self, pool: &Arc<TargetPool>) -> Result<Snapshot> {
        self.capture_with(pool, self.config.cutoff).await
    }

    /// Capture the target behind `pool` with an explicit cutoff policy
    pub async fn capture_with(&self, pool: &Arc<TargetPool>, policy: CutoffPolicy) -> Result<Snapshot> {
        let target = pool.target().clone();
        let mut conn = pool.acquire().await?;
        let databases = self.databases(&mut conn, &target).await?;
        info!(
            target: "kvparity::capture",
            endpoint = %target,
            databases = databases.len(),
            "Capture started"
        );

        let max_passes = match policy {
            CutoffPolicy::Stable { max_passes } => max_passes.max(1),
            CutoffPolicy::SinglePass => 1,
        };
        let mut pass = 0;
        let (entries, stable) = loop {
            pass += 1;
            let before = match policy {
                CutoffPolicy::Stable { .. } => Some(self.token(&mut conn, &target, &databases).await?),
                CutoffPolicy::SinglePass => None,
            };
            let entries = self.pass(&mut conn, &target, &databases).await?;
            let Some(before) = before else {
                break (entries, true);
            };
            let after = self.token(&mut conn, &target, &databases).await?;
            if before == after {
                break (entries, true);
            }
            if pass >= max_passes {
                warn!(
                    target: "kvparity::capture",
                    endpoint = %target,
                    passes = pass,
                    "Keyspace kept changing during capture; keeping last pass"
                );
                break (entries, false);
            }
            debug!(
                target: "kvparity::capture",
                endpoint = %target,
                pass,
                "Generation token advanced; rescanning"
            );
        };

        let mut snapshot = Snapshot::new(target.to_string(), entries);
        snapshot.meta.passes = pass;
        snapshot.meta.stable = stable;
        info!(
            target: "kvparity::capture",
            endpoint = %target,
            keys = snapshot.len(),
            passes = pass,
            stable,
            "Capture finished"
        );
        Ok(snapshot)
    }

    async fn databases(&self, conn: &mut PooledConnection, target: &Target) -> Result<Vec<u16>> {
        if let Some(n) = self.config.databases {
            return Ok((0..n).collect());
        }
        let info = conn.call(0, args(&["INFO", "keyspace"])).await?;
        let text = info
            .as_text()
            .ok_or_else(|| Error::protocol(target, "INFO reply is not text"))?;
        let mut dbs: Vec<u16> = text
            .lines()
            .filter_map(|line| line.strip_prefix("db"))
            .filter_map(|rest| rest.split(':').next())
            .filter_map(|n| n.parse().ok())
            .collect();
        if dbs.is_empty() {
            dbs.push(0);
        }
        dbs.sort_unstable();
        dbs.dedup();
        Ok(dbs)
    }

    async fn token(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        databases: &[u16],
    ) -> Result<GenerationToken> {
        let info = conn.call(0, args(&["INFO", "persistence"])).await?;
        let changes = info.as_text().and_then(|text| {
            text.lines()
                .find_map(|line| line.strip_prefix("rdb_changes_since_last_save:"))
                .and_then(|v| v.trim().parse().ok())
        });
        if let Some(changes) = changes {
            return Ok(GenerationToken::Changes(changes));
        }
        let mut sizes = Vec::with_capacity(databases.len());
        for db in databases {
            let size = conn.call(*db, args(&["DBSIZE"])).await?;
            sizes.push(db_size(target, &size)?);
        }
        Ok(GenerationToken::Sizes(sizes))
    }

    async fn pass(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        databases: &[u16],
    ) -> Result<BTreeMap<KeyRef, KeyState>> {
        let mut entries = BTreeMap::new();
        for &db in databases {
            for key in self.scan_keys(conn, target, db).await? {
                if let Some(state) = self.read_key(conn, target, db, &key).await? {
                    entries.insert(KeyRef::new(db, key), state);
                }
            }
        }
        Ok(entries)
    }

    async fn scan_keys(&self, conn: &mut PooledConnection, target: &Target, db: u16) -> Result<BTreeSet<Vec<u8>>> {
        let count = self.config.scan_count.to_string();
        let mut cursor = b"0".to_vec();
        let mut keys = BTreeSet::new();
        loop {
            let reply = conn
                .call(db, vec![b"SCAN".to_vec(), cursor, b"COUNT".to_vec(), count.clone().into_bytes()])
                .await?;
            let (next, items) = scan_page(target, "SCAN", reply)?;
            for item in items {
                keys.insert(bytes_of(target, "SCAN", &item)?);
            }
            if next == b"0" {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn read_key(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<KeyState>> {
        let reply = conn.call(db, vec![b"TYPE".to_vec(), key.to_vec()]).await?;
        let type_name = reply
            .as_text()
            .ok_or_else(|| Error::protocol(target, "TYPE reply is not text"))?;
        if type_name == "none" {
            return Ok(None);
        }
        let value_type = ValueType::from_type_reply(&type_name).ok_or_else(|| {
            Error::protocol(target, format!("unsupported value type '{}'", type_name))
        })?;

        let value = match value_type {
            ValueType::String => self.read_string(conn, target, db, key).await?,
            ValueType::List => self.read_list(conn, target, db, key).await?,
            ValueType::Set => self.read_set(conn, target, db, key).await?,
            ValueType::Hash => self.read_hash(conn, target, db, key).await?,
            ValueType::ZSet => self.read_zset(conn, target, db, key).await?,
            ValueType::Json => self.read_json(conn, target, db, key).await?,
        };
        let Some(value) = value else {
            return Ok(None);
        };

        let pttl = conn
            .call(db, vec![b"PTTL".to_vec(), key.to_vec()])
            .await?
            .as_int()
            .ok_or_else(|| Error::protocol(target, "PTTL reply is not an integer"))?;
        if pttl == -2 {
            return Ok(None);
        }
        Ok(Some(
            KeyState::new(value).with_ttl(TtlBucket::from_pttl(pttl, self.config.short_ttl_ms)),
        ))
    }

    async fn read_string(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<CanonicalValue>> {
        let reply = conn.call(db, vec![b"GET".to_vec(), key.to_vec()]).await?;
        if reply.is_null() {
            return Ok(None);
        }
        Ok(Some(CanonicalValue::String(Blob(bytes_of(target, "GET", &reply)?))))
    }

    async fn read_list(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<CanonicalValue>> {
        let len = conn
            .call(db, vec![b"LLEN".to_vec(), key.to_vec()])
            .await?
            .as_int()
            .ok_or_else(|| Error::protocol(target, "LLEN reply is not an integer"))?;
        let chunk = self.config.list_chunk as i64;
        let mut items = Vec::with_capacity(len.max(0) as usize);
        let mut start = 0i64;
        while start < len {
            let stop = start + chunk - 1;
            let reply = conn
                .call(
                    db,
                    vec![
                        b"LRANGE".to_vec(),
                        key.to_vec(),
                        start.to_string().into_bytes(),
                        stop.to_string().into_bytes(),
                    ],
                )
                .await?;
            let page = reply
                .into_array()
                .ok_or_else(|| Error::protocol(target, "LRANGE reply is not an array"))?;
            if page.is_empty() {
                break;
            }
            for item in &page {
                items.push(Blob(bytes_of(target, "LRANGE", item)?));
            }
            start += chunk;
        }
        Ok(non_empty(CanonicalValue::List(items)))
    }

    async fn read_set(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<CanonicalValue>> {
        let mut members = BTreeSet::new();
        for item in self.collection_scan(conn, target, db, "SSCAN", key).await? {
            members.insert(Blob(bytes_of(target, "SSCAN", &item)?));
        }
        Ok(non_empty(CanonicalValue::Set(members)))
    }

    async fn read_hash(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<CanonicalValue>> {
        let mut fields = BTreeMap::new();
        for (field, value) in pairs(target, "HSCAN", self.collection_scan(conn, target, db, "HSCAN", key).await?)? {
            fields.insert(
                Blob(bytes_of(target, "HSCAN", &field)?),
                Blob(bytes_of(target, "HSCAN", &value)?),
            );
        }
        Ok(non_empty(CanonicalValue::Hash(fields)))
    }

    async fn read_zset(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<CanonicalValue>> {
        let mut members = BTreeMap::new();
        for (member, score) in pairs(target, "ZSCAN", self.collection_scan(conn, target, db, "ZSCAN", key).await?)? {
            let score = score
                .as_f64()
                .ok_or_else(|| Error::protocol(target, "ZSCAN score is not a number"))?;
            members.insert(Blob(bytes_of(target, "ZSCAN", &member)?), score);
        }
        Ok(non_empty(CanonicalValue::ZSet(members)))
    }

    async fn read_json(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        key: &[u8],
    ) -> Result<Option<CanonicalValue>> {
        let reply = conn
            .call(db, vec![b"JSON.GET".to_vec(), key.to_vec(), b"$".to_vec()])
            .await?;
        if reply.is_null() {
            return Ok(None);
        }
        let raw = bytes_of(target, "JSON.GET", &reply)?;
        Ok(Some(CanonicalValue::Json(canonical_json(target, &raw)?)))
    }

    /// All elements of an `SSCAN`/`HSCAN`/`ZSCAN` iteration, flattened
    async fn collection_scan(
        &self,
        conn: &mut PooledConnection,
        target: &Target,
        db: u16,
        command: &str,
        key: &[u8],
    ) -> Result<Vec<Frame>> {
        let count = self.config.scan_count.to_string();
        let mut cursor = b"0".to_vec();
        let mut items = Vec::new();
        loop {
            let reply = conn
                .call(
                    db,
                    vec![
                        command.as_bytes().to_vec(),
                        key.to_vec(),
                        cursor,
                        b"COUNT".to_vec(),
                        count.clone().into_bytes(),
                    ],
                )
                .await?;
            let (next, page) = scan_page(target, command, reply)?;
            items.extend(page);
            if next == b"0" {
                break;
            }
            cursor = next;
        }
        Ok(items)
    }
}

fn args(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|p| p.as_bytes().to_vec()).collect()
}

fn non_empty(value: CanonicalValue) -> Option<CanonicalValue> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Split a `[cursor, items]` scan reply
fn scan_page(target: &Target, command: &str, reply: Frame) -> Result<(Vec<u8>, Vec<Frame>)> {
    let malformed = || Error::protocol(target, format!("{} reply is not [cursor, items]", command));
    let mut parts = reply.into_array().ok_or_else(malformed)?;
    if parts.len() != 2 {
        return Err(malformed());
    }
    let items = parts.pop().ok_or_else(malformed)?;
    let items: Vec<Frame> = match items {
        Frame::Map(pairs) => pairs.into_iter().flat_map(|(k, v)| [k, v]).collect(),
        other => other.into_array().ok_or_else(malformed)?,
    };
    let cursor = parts
        .pop()
        .and_then(|c| c.as_bytes().map(<[u8]>::to_vec))
        .ok_or_else(malformed)?;
    Ok((cursor, items))
}

fn pairs(target: &Target, command: &str, flat: Vec<Frame>) -> Result<Vec<(Frame, Frame)>> {
    Frame::Array(flat)
        .into_pairs()
        .ok_or_else(|| Error::protocol(target, format!("{} returned an odd number of elements", command)))
}

fn bytes_of(target: &Target, command: &str, frame: &Frame) -> Result<Vec<u8>> {
    frame
        .as_bytes()
        .map(<[u8]>::to_vec)
        .or_else(|| match frame {
            Frame::Integer(i) => Some(i.to_string().into_bytes()),
            Frame::Double(d) => Some(kvparity_wire::format_double(*d).into_bytes()),
            _ => None,
        })
        .ok_or_else(|| Error::protocol(target, format!("{} returned a non-string element", command)))
}

fn db_size(target: &Target, reply: &Frame) -> Result<u64> {
    let size = reply
        .as_int()
        .ok_or_else(|| Error::protocol(target, "DBSIZE reply is not an integer"))?;
    Ok(size.max(0) as u64)
}

/// Re-serialize a `JSON.GET key $` reply with sorted keys, unwrapping the
/// single-element array the `$` path produces
pub fn canonical_json(target: &Target, raw: &[u8]) -> Result<String> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| Error::protocol(target, format!("JSON.GET returned invalid JSON: {}", e)))?;
    let value = match value {
        serde_json::Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    serde_json::to_string(&value)
        .map_err(|e| Error::protocol(target, format!("JSON re-serialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvparity_core::{Capabilities, Endpoint};

    fn target() -> Target {
        Target::new(Endpoint::localhost(1), Capabilities::resp2_fallback())
    }

    #[test]
    fn test_canonical_json_sorts_and_unwraps() {
        let out = canonical_json(&target(), br#"[{"b":1,"a":{"d":2,"c":3}}]"#).unwrap();
        assert_eq!(out, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_keeps_legacy_form() {
        let out = canonical_json(&target(), br#"{"x":[1,2]}"#).unwrap();
        assert_eq!(out, r#"{"x":[1,2]}"#);
    }

    #[test]
    fn test_scan_page_accepts_resp3_map() {
        let reply = Frame::Array(vec![
            Frame::bulk("0"),
            Frame::Map(vec![(Frame::bulk("f"), Frame::bulk("v"))]),
        ]);
        let (cursor, items) = scan_page(&target(), "HSCAN", reply).unwrap();
        assert_eq!(cursor, b"0");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_scan_page_rejects_garbage() {
        assert!(scan_page(&target(), "SCAN", Frame::Integer(3)).is_err());
        assert!(scan_page(&target(), "SCAN", Frame::Array(vec![Frame::bulk("0")])).is_err());
    }

    #[test]
    fn test_db_size_rejects_non_integer() {
        assert_eq!(db_size(&target(), &Frame::Integer(7)).unwrap(), 7);
        let err = db_size(&target(), &Frame::bulk("seven")).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("DBSIZE"));
    }

    #[test]
    fn test_zset_score_forms_agree() {
        assert_eq!(Frame::bulk("1.5").as_f64(), Frame::Double(1.5).as_f64());
    }

    #[test]
    fn test_config_validation() {
        assert!(CaptureConfig::default().validate().is_ok());
        assert!(CaptureConfig::default()
            .with_cutoff(CutoffPolicy::Stable { max_passes: 0 })
            .validate()
            .is_err());
        assert!(CaptureConfig::default().with_databases(0).validate().is_err());
    }
}
