//! Frame and command encoding
//!
//! Clients always send commands as arrays of bulk strings. Servers (the
//! in-process test target) encode replies for the protocol version the
//! connection negotiated: RESP3-only kinds are downgraded for RESP2 peers.

use crate::frame::{format_double, Frame};

/// Append a command (array of bulk strings) to `out`
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        write_blob(b'$', arg.as_ref(), out);
    }
}

/// Append a reply frame to `out` for a peer speaking `protocol`
pub fn encode_frame(frame: &Frame, protocol: u8, out: &mut Vec<u8>) {
    if protocol < 3 {
        match frame {
            Frame::Null => out.extend_from_slice(b"$-1\r\n"),
            Frame::Simple(_) | Frame::Error(_) | Frame::Integer(_) | Frame::Bulk(_) => {
                write_resp3(frame, out)
            }
            Frame::Array(items) => {
                write_header(b'*', items.len(), out);
                for item in items {
                    encode_frame(item, protocol, out);
                }
            }
            other => encode_frame(&other.clone().into_resp2(), protocol, out),
        }
    } else {
        write_resp3(frame, out);
    }
}

fn write_resp3(frame: &Frame, out: &mut Vec<u8>) {
    match frame {
        Frame::Simple(s) => write_line(b'+', s.as_bytes(), out),
        Frame::Error(s) => write_line(b'-', s.as_bytes(), out),
        Frame::Integer(i) => write_line(b':', i.to_string().as_bytes(), out),
        Frame::Bulk(b) => write_blob(b'$', b, out),
        Frame::Null => out.extend_from_slice(b"_\r\n"),
        Frame::Double(d) => write_line(b',', format_double(*d).as_bytes(), out),
        Frame::Boolean(b) => write_line(b'#', if *b { b"t" } else { b"f" }, out),
        Frame::BigNumber(s) => write_line(b'(', s.as_bytes(), out),
        Frame::Verbatim { format, text } => {
            let mut payload = Vec::with_capacity(4 + text.len());
            payload.extend_from_slice(format.as_bytes());
            payload.push(b':');
            payload.extend_from_slice(text);
            write_blob(b'=', &payload, out);
        }
        Frame::Array(items) => write_aggregate(b'*', items, out),
        Frame::Set(items) => write_aggregate(b'~', items, out),
        Frame::Push(items) => write_aggregate(b'>', items, out),
        Frame::Map(pairs) => {
            write_header(b'%', pairs.len(), out);
            for (k, v) in pairs {
                write_resp3(k, out);
                write_resp3(v, out);
            }
        }
    }
}

fn write_aggregate(prefix: u8, items: &[Frame], out: &mut Vec<u8>) {
    write_header(prefix, items.len(), out);
    for item in items {
        write_resp3(item, out);
    }
}

fn write_header(prefix: u8, len: usize, out: &mut Vec<u8>) {
    write_line(prefix, len.to_string().as_bytes(), out);
}

fn write_line(prefix: u8, line: &[u8], out: &mut Vec<u8>) {
    out.push(prefix);
    out.extend_from_slice(line);
    out.extend_from_slice(b"\r\n");
}

fn write_blob(prefix: u8, data: &[u8], out: &mut Vec<u8>) {
    write_header(prefix, data.len(), out);
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}
