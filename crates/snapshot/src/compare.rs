//! Snapshot comparison
//!
//! Two snapshots are consistent when every key in their union carries the
//! same type and canonical value on both sides and the same coarse TTL
//! state. A key present on one side only counts as a mismatch unless that
//! side had it in the short TTL bucket, in which case it may simply have
//! expired between the two captures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::snapshot::{CanonicalValue, KeyRef, KeyState, Snapshot, TtlBucket};

/// Comparison settings (`[compare]` section of `kvparity.toml`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Tolerate one-sided keys whose present side is about to expire
    #[serde(default = "default_true")]
    pub tolerate_expiring: bool,
    /// Require both sides to agree on whether a TTL is set
    #[serde(default = "default_true")]
    pub compare_ttl: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            tolerate_expiring: true,
            compare_ttl: true,
        }
    }
}

/// What differs about one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Present on the right only
    MissingLeft,
    /// Present on the left only
    MissingRight,
    /// Value types differ
    TypeDiffers,
    /// Same type, different canonical value
    ValueDiffers,
    /// One side has a TTL, the other does not
    TtlDiffers,
}

impl MismatchKind {
    fn label(&self) -> &'static str {
        match self {
            MismatchKind::MissingLeft => "missing on left",
            MismatchKind::MissingRight => "missing on right",
            MismatchKind::TypeDiffers => "type differs",
            MismatchKind::ValueDiffers => "value differs",
            MismatchKind::TtlDiffers => "ttl differs",
        }
    }
}

/// One inconsistent key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    /// Logical database
    pub db: u16,
    /// Key
    pub key: String,
    /// State on the left snapshot
    pub left: Option<KeyState>,
    /// State on the right snapshot
    pub right: Option<KeyState>,
    /// Every difference found, in a fixed order
    pub kinds: Vec<MismatchKind>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.kinds.iter().map(MismatchKind::label).collect();
        let side = |state: &Option<KeyState>| {
            state
                .as_ref()
                .map_or_else(|| "-".to_string(), KeyState::summary)
        };
        write!(
            f,
            "db{}:{}: {} (left: {}, right: {})",
            self.db,
            self.key,
            kinds.join(", "),
            side(&self.left),
            side(&self.right)
        )
    }
}

/// Result of comparing two snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    /// Left snapshot's target
    pub left: String,
    /// Right snapshot's target
    pub right: String,
    /// Keys in the union of both snapshots
    pub keys_compared: usize,
    /// One-sided keys forgiven because they were about to expire
    pub tolerated: usize,
    /// Mismatches ordered by `(db, key)`
    pub mismatches: Vec<Mismatch>,
}

impl DiffReport {
    /// Whether no mismatch survived tolerance filtering
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Keys of all mismatches, in order
    pub fn keys(&self) -> Vec<&str> {
        self.mismatches.iter().map(|m| m.key.as_str()).collect()
    }

    /// Text diff listing at most `limit` mismatches
    pub fn render(&self, limit: usize) -> String {
        let mut out = format!(
            "{} vs {}: {} keys compared, {} mismatched, {} tolerated\n",
            self.left,
            self.right,
            self.keys_compared,
            self.mismatches.len(),
            self.tolerated
        );
        for m in self.mismatches.iter().take(limit) {
            out.push_str("  ");
            out.push_str(&m.to_string());
            out.push('\n');
        }
        if self.mismatches.len() > limit {
            out.push_str(&format!("  ... {} more\n", self.mismatches.len() - limit));
        }
        out
    }

    /// JSON form of the report
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(usize::MAX))
    }
}

/// Compare two snapshots. Never fails; differences are returned as data.
pub fn compare(left: &Snapshot, right: &Snapshot, options: &CompareOptions) -> (bool, DiffReport) {
    let keys: BTreeSet<&KeyRef> = left.entries.keys().chain(right.entries.keys()).collect();
    let mut tolerated = 0;
    let mut mismatches = Vec::new();

    for key in &keys {
        let l = left.entries.get(*key);
        let r = right.entries.get(*key);
        let kinds = match (l, r) {
            (Some(l), Some(r)) => differences(l, r, options),
            (Some(present), None) | (None, Some(present))
                if options.tolerate_expiring && present.ttl == TtlBucket::Short =>
            {
                tolerated += 1;
                continue;
            }
            (Some(_), None) => vec![MismatchKind::MissingRight],
            (None, Some(_)) => vec![MismatchKind::MissingLeft],
            (None, None) => continue,
        };
        if !kinds.is_empty() {
            mismatches.push(Mismatch {
                db: key.db,
                key: key.key.display(),
                left: l.cloned(),
                right: r.cloned(),
                kinds,
            });
        }
    }

    let report = DiffReport {
        left: left.meta.target.clone(),
        right: right.meta.target.clone(),
        keys_compared: keys.len(),
        tolerated,
        mismatches,
    };
    (report.is_consistent(), report)
}

fn differences(l: &KeyState, r: &KeyState, options: &CompareOptions) -> Vec<MismatchKind> {
    let mut kinds = Vec::new();
    if l.value_type != r.value_type {
        kinds.push(MismatchKind::TypeDiffers);
    } else if !same_value(&l.value, &r.value) {
        kinds.push(MismatchKind::ValueDiffers);
    }
    if options.compare_ttl && l.ttl.has_ttl() != r.ttl.has_ttl() {
        kinds.push(MismatchKind::TtlDiffers);
    }
    kinds
}

/// Value equality where NaN scores equal themselves
fn same_value(a: &CanonicalValue, b: &CanonicalValue) -> bool {
    match (a, b) {
        (CanonicalValue::ZSet(a), CanonicalValue::ZSet(b)) => {
            a.len() == b.len()
                && a.iter().zip(b).all(|((ma, sa), (mb, sb))| {
                    ma == mb && (sa == sb || (sa.is_nan() && sb.is_nan()))
                })
        }
        _ => a == b,
    }
}
