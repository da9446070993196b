//! Frame model shared by RESP2 and RESP3
//!
//! RESP3 is a superset of RESP2. Decoding keeps the RESP3 shape; accessors
//! below normalize the differences callers care about (a RESP2 `HGETALL`
//! flat array and a RESP3 map both answer [`Frame::into_pairs`]).

use bytes::Bytes;

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+OK`
    Simple(String),
    /// `-ERR ...` or RESP3 blob error `!`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`
    Bulk(Bytes),
    /// RESP2 `$-1` / `*-1`, RESP3 `_`
    Null,
    /// `*n`
    Array(Vec<Frame>),
    /// RESP3 `,1.5`
    Double(f64),
    /// RESP3 `#t`
    Boolean(bool),
    /// RESP3 `(123456789012345678901234567890`
    BigNumber(String),
    /// RESP3 `=15\r\ntxt:Some string`
    Verbatim {
        /// Three-letter format hint (`txt`, `mkd`)
        format: String,
        /// Payload without the format prefix
        text: Bytes,
    },
    /// RESP3 `%n`
    Map(Vec<(Frame, Frame)>),
    /// RESP3 `~n`
    Set(Vec<Frame>),
    /// RESP3 `>n`
    Push(Vec<Frame>),
}

impl Frame {
    /// Bulk frame from anything byte-like
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// `+OK`
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// Error frame
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    /// Whether this is a null reply
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Error message, if this is an error reply
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Frame::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Raw bytes of a string-like frame
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Simple(s) | Frame::BigNumber(s) => Some(s.as_bytes()),
            Frame::Bulk(b) => Some(b),
            Frame::Verbatim { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Text of a string-like frame (lossy for non-UTF-8 payloads)
    pub fn as_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Integer value; accepts integer frames and decimal strings
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            Frame::Boolean(b) => Some(i64::from(*b)),
            other => other
                .as_bytes()
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.trim().parse().ok()),
        }
    }

    /// Floating point value; accepts doubles, integers and decimal strings
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Frame::Double(d) => Some(*d),
            Frame::Integer(i) => Some(*i as f64),
            other => other
                .as_bytes()
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(parse_double),
        }
    }

    /// Elements of an aggregate frame (array, set or push)
    pub fn into_array(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(items) | Frame::Set(items) | Frame::Push(items) => Some(items),
            _ => None,
        }
    }

    /// Key/value pairs of a map frame, or of a flat even-length array
    pub fn into_pairs(self) -> Option<Vec<(Frame, Frame)>> {
        match self {
            Frame::Map(pairs) => Some(pairs),
            Frame::Array(items) if items.len() % 2 == 0 => {
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    pairs.push((k, v));
                }
                Some(pairs)
            }
            _ => None,
        }
    }

    /// Rewrite RESP3-only frame kinds into their RESP2 equivalents
    pub fn into_resp2(self) -> Frame {
        match self {
            Frame::Double(d) => Frame::Bulk(Bytes::from(format_double(d))),
            Frame::Boolean(b) => Frame::Integer(i64::from(b)),
            Frame::BigNumber(s) => Frame::Bulk(Bytes::from(s)),
            Frame::Verbatim { text, .. } => Frame::Bulk(text),
            Frame::Map(pairs) => Frame::Array(
                pairs
                    .into_iter()
                    .flat_map(|(k, v)| [k.into_resp2(), v.into_resp2()])
                    .collect(),
            ),
            Frame::Array(items) | Frame::Set(items) | Frame::Push(items) => {
                Frame::Array(items.into_iter().map(Frame::into_resp2).collect())
            }
            other => other,
        }
    }
}

/// Parse a protocol double, including `inf`, `-inf` and `nan`
pub fn parse_double(s: &str) -> Option<f64> {
    match s.trim() {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

/// Format a double the way servers print scores
pub fn format_double(d: f64) -> String {
    if d.is_infinite() {
        if d > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if d.is_nan() {
        "nan".to_string()
    } else {
        d.to_string()
    }
}
