//! Operation specifications emitted by the workload generator
//!
//! An [`OperationSpec`] is the unit of traffic: one key, one logical
//! database, one wire command. Specs are:
//! - **Self-contained**: every parameter needed for dispatch is in the variant
//! - **Serializable**: two runs can be compared byte-for-byte as JSON
//! - **Pure data**: generated once, never mutated, consumed once by dispatch

use serde::{Deserialize, Serialize};

use crate::types::ValueType;

/// A single generated operation against one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Position in the run's operation sequence
    pub seq: u64,
    /// Logical database the key lives in
    pub db: u16,
    /// Key the operation targets
    pub key: String,
    /// What to do to the key
    pub op: Operation,
}

/// Operation kinds, one wire command each
///
/// | Type | Creating | Mutating |
/// |------|----------|----------|
/// | String | `Set` | `Append` |
/// | List | `RPush` | `LPush`, `LTrim` |
/// | Set | `SAdd` | `SPop` (non-deterministic) |
/// | Hash | `HSet` | `HIncrBy` |
/// | ZSet | `ZAdd` | `ZIncrBy` |
/// | Json | `JsonSet` | `JsonNumIncrBy` |
/// | any | | `Del`, `Expire` (non-deterministic) |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// `SET key value`
    Set { value: String },
    /// `APPEND key value`
    Append { value: String },
    /// `RPUSH key v...`
    RPush { values: Vec<String> },
    /// `LPUSH key v...`
    LPush { values: Vec<String> },
    /// `LTRIM key start stop`
    LTrim { start: i64, stop: i64 },
    /// `SADD key m...`
    SAdd { members: Vec<String> },
    /// `SPOP key`
    SPop,
    /// `HSET key f v...`
    HSet { fields: Vec<(String, String)> },
    /// `HINCRBY key field delta`
    HIncrBy { field: String, delta: i64 },
    /// `ZADD key score member...`
    ZAdd { members: Vec<(f64, String)> },
    /// `ZINCRBY key delta member`
    ZIncrBy { member: String, delta: f64 },
    /// `JSON.SET key $ document`
    JsonSet { document: serde_json::Value },
    /// `JSON.NUMINCRBY key path delta`
    JsonNumIncrBy { path: String, delta: i64 },
    /// `DEL key`
    Del,
    /// `EXPIRE key seconds`
    Expire { seconds: u64 },
}

impl Operation {
    /// Command name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "SET",
            Operation::Append { .. } => "APPEND",
            Operation::RPush { .. } => "RPUSH",
            Operation::LPush { .. } => "LPUSH",
            Operation::LTrim { .. } => "LTRIM",
            Operation::SAdd { .. } => "SADD",
            Operation::SPop => "SPOP",
            Operation::HSet { .. } => "HSET",
            Operation::HIncrBy { .. } => "HINCRBY",
            Operation::ZAdd { .. } => "ZADD",
            Operation::ZIncrBy { .. } => "ZINCRBY",
            Operation::JsonSet { .. } => "JSON.SET",
            Operation::JsonNumIncrBy { .. } => "JSON.NUMINCRBY",
            Operation::Del => "DEL",
            Operation::Expire { .. } => "EXPIRE",
        }
    }

    /// Value type the operation requires (or produces).
    ///
    /// `None` for type-agnostic operations (`Del`, `Expire`).
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Operation::Set { .. } | Operation::Append { .. } => Some(ValueType::String),
            Operation::RPush { .. } | Operation::LPush { .. } | Operation::LTrim { .. } => {
                Some(ValueType::List)
            }
            Operation::SAdd { .. } | Operation::SPop => Some(ValueType::Set),
            Operation::HSet { .. } | Operation::HIncrBy { .. } => Some(ValueType::Hash),
            Operation::ZAdd { .. } | Operation::ZIncrBy { .. } => Some(ValueType::ZSet),
            Operation::JsonSet { .. } | Operation::JsonNumIncrBy { .. } => Some(ValueType::Json),
            Operation::Del | Operation::Expire { .. } => None,
        }
    }

    /// Whether the operation creates the key when it is absent
    pub fn creates_key(&self) -> bool {
        !matches!(
            self,
            Operation::LTrim { .. }
                | Operation::SPop
                | Operation::JsonNumIncrBy { .. }
                | Operation::Del
                | Operation::Expire { .. }
        )
    }

    /// Whether the outcome depends on server clocks or server-side randomness
    pub fn is_non_deterministic(&self) -> bool {
        matches!(self, Operation::SPop | Operation::Expire { .. })
    }
}

impl OperationSpec {
    /// Command arguments, command name first
    pub fn args(&self) -> Vec<Vec<u8>> {
        let mut args: Vec<Vec<u8>> = Vec::with_capacity(4);
        args.push(self.op.name().as_bytes().to_vec());
        args.push(self.key.as_bytes().to_vec());

        match &self.op {
            Operation::Set { value } | Operation::Append { value } => {
                args.push(value.as_bytes().to_vec());
            }
            Operation::RPush { values } | Operation::LPush { values } => {
                args.extend(values.iter().map(|v| v.as_bytes().to_vec()));
            }
            Operation::LTrim { start, stop } => {
                args.push(start.to_string().into_bytes());
                args.push(stop.to_string().into_bytes());
            }
            Operation::SAdd { members } => {
                args.extend(members.iter().map(|m| m.as_bytes().to_vec()));
            }
            Operation::HSet { fields } => {
                for (field, value) in fields {
                    args.push(field.as_bytes().to_vec());
                    args.push(value.as_bytes().to_vec());
                }
            }
            Operation::HIncrBy { field, delta } => {
                args.push(field.as_bytes().to_vec());
                args.push(delta.to_string().into_bytes());
            }
            Operation::ZAdd { members } => {
                for (score, member) in members {
                    args.push(score.to_string().into_bytes());
                    args.push(member.as_bytes().to_vec());
                }
            }
            Operation::ZIncrBy { member, delta } => {
                args.push(delta.to_string().into_bytes());
                args.push(member.as_bytes().to_vec());
            }
            Operation::JsonSet { document } => {
                args.push(b"$".to_vec());
                args.push(document.to_string().into_bytes());
            }
            Operation::JsonNumIncrBy { path, delta } => {
                args.push(path.as_bytes().to_vec());
                args.push(delta.to_string().into_bytes());
            }
            Operation::Expire { seconds } => {
                args.push(seconds.to_string().into_bytes());
            }
            Operation::SPop | Operation::Del => {}
        }

        args
    }

    /// Human-readable rendering, e.g. `HSET kp:12 f1 v1` (used in logs)
    pub fn render(&self) -> String {
        self.args()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
