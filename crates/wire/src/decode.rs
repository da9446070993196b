//! Incremental frame decoder
//!
//! [`decode`] inspects a byte buffer that may hold a partial frame. It
//! returns `Ok(None)` when more input is needed, and never consumes input
//! on a partial frame, so callers simply append to their buffer and retry.

use bytes::Bytes;
use thiserror::Error;

use crate::frame::{parse_double, Frame};

/// Largest accepted bulk payload (matches the server-side default)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest accepted aggregate nesting
pub const MAX_DEPTH: usize = 64;

/// Decoding errors. Every variant means the peer violated the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unknown type prefix
    #[error("invalid frame prefix byte 0x{0:02x}")]
    InvalidPrefix(u8),

    /// Length or integer line is not a number
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Negative length other than the null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Bulk payload over [`MAX_BULK_LEN`]
    #[error("bulk payload of {0} bytes exceeds limit")]
    TooLarge(usize),

    /// Aggregate nesting over [`MAX_DEPTH`]
    #[error("frame nesting exceeds {} levels", MAX_DEPTH)]
    TooDeep,

    /// Double line is not a number
    #[error("invalid double: {0}")]
    InvalidDouble(String),

    /// Boolean line is neither `t` nor `f`
    #[error("invalid boolean: {0}")]
    InvalidBoolean(String),

    /// Payload not followed by CRLF
    #[error("missing CRLF terminator")]
    MissingTerminator,

    /// Verbatim string without a `fmt:` prefix
    #[error("invalid verbatim string")]
    InvalidVerbatim,
}

/// Decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, or `None` if the
/// buffer does not yet hold a complete frame.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
    let mut cursor = Cursor { buf, pos: 0 };
    Ok(cursor.frame(0)?.map(|frame| (frame, cursor.pos)))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest: &'a [u8] = &self.buf[self.pos..];
        let idx = rest.windows(2).position(|w| w == b"\r\n")?;
        self.pos += idx + 2;
        Some(&rest[..idx])
    }

    fn take(&mut self, len: usize) -> Result<Option<&'a [u8]>, DecodeError> {
        if len > MAX_BULK_LEN {
            return Err(DecodeError::TooLarge(len));
        }
        let end = self.pos + len;
        if self.buf.len() < end + 2 {
            return Ok(None);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(DecodeError::MissingTerminator);
        }
        let data: &'a [u8] = &self.buf[self.pos..end];
        self.pos = end + 2;
        Ok(Some(data))
    }

    fn frame(&mut self, depth: usize) -> Result<Option<Frame>, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        let Some(&prefix) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let Some(line) = self.line() else {
            return Ok(None);
        };

        let frame = match prefix {
            b'+' => Frame::Simple(text(line)),
            b'-' => Frame::Error(text(line)),
            b':' => Frame::Integer(parse_int(line)?),
            b'(' => Frame::BigNumber(text(line)),
            b'_' => Frame::Null,
            b',' => {
                let s = text(line);
                Frame::Double(parse_double(&s).ok_or(DecodeError::InvalidDouble(s))?)
            }
            b'#' => match line {
                b"t" => Frame::Boolean(true),
                b"f" => Frame::Boolean(false),
                other => return Err(DecodeError::InvalidBoolean(text(other))),
            },
            b'$' | b'!' | b'=' => {
                let len = parse_int(line)?;
                if len == -1 && prefix == b'$' {
                    return Ok(Some(Frame::Null));
                }
                let len = to_len(len)?;
                let Some(data) = self.take(len)? else {
                    return Ok(None);
                };
                match prefix {
                    b'$' => Frame::Bulk(Bytes::copy_from_slice(data)),
                    b'!' => Frame::Error(text(data)),
                    _ => {
                        if data.len() < 4 || data[3] != b':' {
                            return Err(DecodeError::InvalidVerbatim);
                        }
                        Frame::Verbatim {
                            format: text(&data[..3]),
                            text: Bytes::copy_from_slice(&data[4..]),
                        }
                    }
                }
            }
            b'*' | b'~' | b'>' => {
                let count = parse_int(line)?;
                if count == -1 && prefix == b'*' {
                    return Ok(Some(Frame::Null));
                }
                let count = to_len(count)?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    match self.frame(depth + 1)? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                match prefix {
                    b'*' => Frame::Array(items),
                    b'~' => Frame::Set(items),
                    _ => Frame::Push(items),
                }
            }
            b'%' | b'|' => {
                let count = to_len(parse_int(line)?)?;
                let mut pairs = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let Some(k) = self.frame(depth + 1)? else {
                        return Ok(None);
                    };
                    let Some(v) = self.frame(depth + 1)? else {
                        return Ok(None);
                    };
                    pairs.push((k, v));
                }
                if prefix == b'|' {
                    // Attributes annotate the frame that follows; we drop them.
                    return self.frame(depth + 1);
                }
                Frame::Map(pairs)
            }
            other => return Err(DecodeError::InvalidPrefix(other)),
        };

        Ok(Some(frame))
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError::InvalidInteger(text(line)))
}

fn to_len(n: i64) -> Result<usize, DecodeError> {
    usize::try_from(n).map_err(|_| DecodeError::InvalidLength(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Frame {
        let (frame, used) = decode(input).unwrap().expect("complete frame");
        assert_eq!(used, input.len());
        frame
    }

    #[test]
    fn test_simple_error_integer() {
        assert_eq!(decode_all(b"+OK\r\n"), Frame::Simple("OK".into()));
        assert_eq!(
            decode_all(b"-WRONGTYPE Operation\r\n"),
            Frame::Error("WRONGTYPE Operation".into())
        );
        assert_eq!(decode_all(b":-42\r\n"), Frame::Integer(-42));
    }

    #[test]
    fn test_bulk_and_null_bulk() {
        assert_eq!(decode_all(b"$5\r\nhello\r\n"), Frame::bulk("hello"));
        assert_eq!(decode_all(b"$0\r\n\r\n"), Frame::bulk(""));
        assert_eq!(decode_all(b"$-1\r\n"), Frame::Null);
        assert_eq!(decode_all(b"*-1\r\n"), Frame::Null);
    }

    #[test]
    fn test_bulk_is_binary_safe() {
        assert_eq!(
            decode_all(b"$4\r\na\r\nb\r\n"),
            Frame::bulk(&b"a\r\nb"[..])
        );
    }

    #[test]
    fn test_nested_array() {
        let frame = decode_all(b"*2\r\n$3\r\n100\r\n*1\r\n$2\r\nk1\r\n");
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::bulk("100"),
                Frame::Array(vec![Frame::bulk("k1")])
            ])
        );
    }

    #[test]
    fn test_resp3_hello_map() {
        let input = b"%2\r\n$6\r\nserver\r\n$5\r\nredis\r\n$5\r\nproto\r\n:3\r\n";
        let frame = decode_all(input);
        let pairs = frame.into_pairs().unwrap();
        assert_eq!(pairs[0].1, Frame::bulk("redis"));
        assert_eq!(pairs[1].1, Frame::Integer(3));
    }

    #[test]
    fn test_resp3_scalars() {
        assert_eq!(decode_all(b"_\r\n"), Frame::Null);
        assert_eq!(decode_all(b",3.25\r\n"), Frame::Double(3.25));
        assert_eq!(decode_all(b",-inf\r\n"), Frame::Double(f64::NEG_INFINITY));
        assert_eq!(decode_all(b"#t\r\n"), Frame::Boolean(true));
        assert_eq!(
            decode_all(b"(3492890328409238509324850943850943825024385\r\n"),
            Frame::BigNumber("3492890328409238509324850943850943825024385".into())
        );
        assert_eq!(
            decode_all(b"!21\r\nSYNTAX invalid syntax\r\n"),
            Frame::Error("SYNTAX invalid syntax".into())
        );
    }

    #[test]
    fn test_verbatim() {
        let frame = decode_all(b"=15\r\ntxt:Some string\r\n");
        assert_eq!(
            frame,
            Frame::Verbatim {
                format: "txt".into(),
                text: bytes::Bytes::from_static(b"Some string"),
            }
        );
        assert_eq!(frame.as_text().as_deref(), Some("Some string"));
    }

    #[test]
    fn test_set_and_push() {
        assert_eq!(
            decode_all(b"~1\r\n+a\r\n"),
            Frame::Set(vec![Frame::Simple("a".into())])
        );
        assert_eq!(
            decode_all(b">1\r\n+a\r\n"),
            Frame::Push(vec![Frame::Simple("a".into())])
        );
    }

    #[test]
    fn test_attribute_is_skipped() {
        let input = b"|1\r\n+key-popularity\r\n:1\r\n:7\r\n";
        assert_eq!(decode_all(input), Frame::Integer(7));
    }

    #[test]
    fn test_partial_input_needs_more() {
        let full = b"*2\r\n$3\r\nfoo\r\n:1\r\n";
        for cut in 0..full.len() {
            assert_eq!(decode(&full[..cut]).unwrap(), None, "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes_not_consumed() {
        let (frame, used) = decode(b"+OK\r\n+NEXT\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::ok());
        assert_eq!(used, 5);
    }

    #[test]
    fn test_invalid_prefix() {
        assert_eq!(decode(b"?x\r\n"), Err(DecodeError::InvalidPrefix(b'?')));
    }

    #[test]
    fn test_invalid_length() {
        assert_eq!(decode(b"$-5\r\n"), Err(DecodeError::InvalidLength(-5)));
        assert!(matches!(
            decode(b"*abc\r\n"),
            Err(DecodeError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_missing_terminator() {
        assert_eq!(
            decode(b"$3\r\nfooXY"),
            Err(DecodeError::MissingTerminator)
        );
    }

    #[test]
    fn test_too_deep() {
        let mut input = Vec::new();
        for _ in 0..=MAX_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert_eq!(decode(&input), Err(DecodeError::TooDeep));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode(&input);
            }

            #[test]
            fn consumed_length_never_exceeds_input(input in proptest::collection::vec(any::<u8>(), 0..256)) {
                if let Ok(Some((_, used))) = decode(&input) {
                    prop_assert!(used <= input.len());
                }
            }
        }
    }
}
