//! Core types for kvparity
//!
//! This module defines the foundational types:
//! - RunId: Unique identifier for a seeding run
//! - ValueType: Type discriminator for server-side values
//! - Endpoint: Network address of a target
//! - Capabilities: Result of the protocol handshake
//! - Target: Endpoint plus negotiated capabilities

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a seeding run
///
/// Attached to every log line emitted during a run so interleaved runs
/// against shared targets can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a RunId from a string representation
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value type of a key as reported by `TYPE`
///
/// Ordering is fixed; the generator draws types by index into
/// [`ValueType::ALL`], so reordering variants changes generated workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    /// Binary-safe string
    String,
    /// List of elements
    List,
    /// Unordered set of members
    Set,
    /// Field/value map
    Hash,
    /// Sorted set of scored members
    ZSet,
    /// JSON document
    Json,
}

impl ValueType {
    /// Every value type, in draw order
    pub const ALL: [ValueType; 6] = [
        ValueType::String,
        ValueType::List,
        ValueType::Set,
        ValueType::Hash,
        ValueType::ZSet,
        ValueType::Json,
    ];

    /// Name used in configuration and reports
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "STRING",
            ValueType::List => "LIST",
            ValueType::Set => "SET",
            ValueType::Hash => "HASH",
            ValueType::ZSet => "ZSET",
            ValueType::Json => "JSON",
        }
    }

    /// Parse the reply of the `TYPE` command.
    ///
    /// Returns `None` for `none` (key absent) and for types this engine
    /// does not generate.
    pub fn from_type_reply(reply: &str) -> Option<Self> {
        match reply.to_ascii_lowercase().as_str() {
            "string" => Some(ValueType::String),
            "list" => Some(ValueType::List),
            "set" => Some(ValueType::Set),
            "hash" => Some(ValueType::Hash),
            "zset" => Some(ValueType::ZSet),
            "rejson-rl" | "json" => Some(ValueType::Json),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ValueType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_config(format!("unknown value type '{}'", s)))
    }
}

/// Network address of a target server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the loopback interface
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Accepts `host:port` or a bare port (loopback implied).
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(port) = s.parse::<u16>() {
            return Ok(Endpoint::localhost(port));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_config(format!("endpoint '{}' is not host:port", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::invalid_config(format!("endpoint '{}' has an invalid port", s)))?;
        if host.is_empty() {
            return Err(Error::invalid_config(format!("endpoint '{}' has no host", s)));
        }
        Ok(Endpoint::new(host, port))
    }
}

/// Capabilities negotiated by the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Negotiated protocol version (2 or 3)
    pub protocol: u8,
    /// Server name (`server` field)
    pub server: Option<String>,
    /// Server version (`version` field)
    pub version: Option<String>,
    /// Server mode (`mode` field, e.g. "standalone")
    pub mode: Option<String>,
    /// Every scalar field of the handshake reply, rendered as text
    pub flags: BTreeMap<String, String>,
}

impl Capabilities {
    /// Capabilities assumed when the server rejects the handshake command
    pub fn resp2_fallback() -> Self {
        Self {
            protocol: 2,
            server: None,
            version: None,
            mode: None,
            flags: BTreeMap::new(),
        }
    }

    /// Build capabilities from the flattened handshake map
    pub fn from_flags(flags: BTreeMap<String, String>) -> Result<Self> {
        let protocol = match flags.get("proto") {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| Error::invalid_config(format!("handshake proto '{}' is not a number", p)))?,
            None => 2,
        };
        Ok(Self {
            protocol,
            server: flags.get("server").cloned(),
            version: flags.get("version").cloned(),
            mode: flags.get("mode").cloned(),
            flags,
        })
    }

    /// Look up a raw handshake field
    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }
}

/// A server instance under test
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    endpoint: Endpoint,
    capabilities: Capabilities,
}

impl Target {
    /// Create a target from an endpoint and its negotiated capabilities
    pub fn new(endpoint: Endpoint, capabilities: Capabilities) -> Self {
        Self {
            endpoint,
            capabilities,
        }
    }

    /// Network address
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Negotiated protocol version
    pub fn protocol(&self) -> u8 {
        self.capabilities.protocol
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.endpoint.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_run_id_roundtrip_string() {
        let id = RunId::new();
        assert_eq!(RunId::from_string(&id.to_string()), Some(id));
        assert_eq!(RunId::from_string("not-a-uuid"), None);
    }

    #[test]
    fn test_value_type_from_type_reply() {
        assert_eq!(ValueType::from_type_reply("string"), Some(ValueType::String));
        assert_eq!(ValueType::from_type_reply("zset"), Some(ValueType::ZSet));
        assert_eq!(ValueType::from_type_reply("ReJSON-RL"), Some(ValueType::Json));
        assert_eq!(ValueType::from_type_reply("none"), None);
        assert_eq!(ValueType::from_type_reply("stream"), None);
    }

    #[test]
    fn test_value_type_from_str_case_insensitive() {
        assert_eq!("json".parse::<ValueType>().unwrap(), ValueType::Json);
        assert_eq!("ZSet".parse::<ValueType>().unwrap(), ValueType::ZSet);
        assert!("stream".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_type_serde_uses_upper_case() {
        let json = serde_json::to_string(&ValueType::Json).unwrap();
        assert_eq!(json, "\"JSON\"");
        let back: ValueType = serde_json::from_str("\"HASH\"").unwrap();
        assert_eq!(back, ValueType::Hash);
    }

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "localhost:6379".parse().unwrap();
        assert_eq!(ep, Endpoint::new("localhost", 6379));

        let ep: Endpoint = "5556".parse().unwrap();
        assert_eq!(ep, Endpoint::localhost(5556));

        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":6379".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::localhost(7000).to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_capabilities_from_flags() {
        let flags: BTreeMap<String, String> = [
            ("server", "redis"),
            ("version", "6.2.11"),
            ("proto", "3"),
            ("mode", "standalone"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let caps = Capabilities::from_flags(flags).unwrap();
        assert_eq!(caps.protocol, 3);
        assert_eq!(caps.server.as_deref(), Some("redis"));
        assert_eq!(caps.flag("mode"), Some("standalone"));
        assert_eq!(caps.flag("role"), None);
    }

    #[test]
    fn test_capabilities_missing_proto_defaults_to_resp2() {
        let caps = Capabilities::from_flags(BTreeMap::new()).unwrap();
        assert_eq!(caps.protocol, 2);
    }

    #[test]
    fn test_target_display_is_endpoint() {
        let target = Target::new(Endpoint::localhost(5555), Capabilities::resp2_fallback());
        assert_eq!(target.to_string(), "127.0.0.1:5555");
        assert_eq!(target.protocol(), 2);
    }
}
