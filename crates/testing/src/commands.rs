//! Command execution for the in-process server
//!
//! Replies are built as RESP3 frames; the connection downgrades them for
//! RESP2 peers when encoding.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use kvparity_wire::{format_double, parse_double, Frame};

use crate::server::ServerOptions;
use crate::store::{Store, Value};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const SERVER_NAME: &str = "kvparity-memory";

type Reply = std::result::Result<Frame, String>;

/// Per-connection state
#[derive(Debug, Clone)]
pub struct Session {
    /// Negotiated protocol version
    pub protocol: u8,
    /// Selected logical database
    pub db: usize,
    /// Connection id reported by `HELLO`
    pub id: u64,
}

impl Session {
    /// Fresh RESP2 session on db 0
    pub fn new(id: u64) -> Self {
        Self {
            protocol: 2,
            db: 0,
            id,
        }
    }
}

/// Execute one command and produce its reply
pub fn execute(store: &mut Store, session: &mut Session, options: &ServerOptions, args: &[Vec<u8>]) -> Frame {
    let Some(name) = args.first() else {
        return Frame::error("ERR empty command");
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    match dispatch(store, session, options, &name, &args[1..]) {
        Ok(frame) => frame,
        Err(msg) => Frame::Error(msg),
    }
}

fn dispatch(
    store: &mut Store,
    session: &mut Session,
    options: &ServerOptions,
    name: &str,
    args: &[Vec<u8>],
) -> Reply {
    let db = session.db;
    match name {
        "HELLO" if options.hello => hello(session, args),
        "PING" => Ok(match args.first() {
            Some(msg) => Frame::bulk(msg.clone()),
            None => Frame::Simple("PONG".into()),
        }),
        "SELECT" => {
            arity(name, args, 1)?;
            let index = int_arg(&args[0])?;
            if index < 0 || index as usize >= store.databases() {
                return Err("ERR DB index is out of range".into());
            }
            session.db = index as usize;
            Ok(Frame::ok())
        }
        "INFO" => Ok(info(store, session)),
        "DBSIZE" => Ok(Frame::Integer(store.len(db) as i64)),
        "FLUSHALL" => {
            store.flush();
            store.touch();
            Ok(Frame::ok())
        }
        "SCAN" => {
            min_arity(name, args, 1)?;
            let keys = store.keys(db);
            let (next, page) = page(&keys, &args[0], &args[1..])?;
            Ok(scan_reply(next, page.iter().map(|k| Frame::bulk(k.clone())).collect()))
        }
        "TYPE" => {
            arity(name, args, 1)?;
            let name = store
                .get(db, &args[0])
                .map_or("none", |e| e.value.type_name());
            Ok(Frame::Simple(name.into()))
        }
        "PTTL" => {
            arity(name, args, 1)?;
            let ttl = match store.get(db, &args[0]) {
                None => -2,
                Some(entry) => match entry.expires_at {
                    None => -1,
                    Some(at) => at
                        .saturating_duration_since(std::time::Instant::now())
                        .as_millis() as i64,
                },
            };
            Ok(Frame::Integer(ttl))
        }
        "DEL" => {
            min_arity(name, args, 1)?;
            let removed = args.iter().filter(|k| store.remove(db, k)).count();
            if removed > 0 {
                store.touch();
            }
            Ok(Frame::Integer(removed as i64))
        }
        "EXPIRE" => {
            arity(name, args, 2)?;
            let seconds = int_arg(&args[1])?;
            let applied = if seconds <= 0 {
                store.remove(db, &args[0])
            } else {
                store.expire(db, &args[0], Some(Duration::from_secs(seconds as u64)))
            };
            if applied {
                store.touch();
            }
            Ok(Frame::Integer(i64::from(applied)))
        }
        "PERSIST" => {
            arity(name, args, 1)?;
            let had_ttl = store
                .get(db, &args[0])
                .is_some_and(|e| e.expires_at.is_some());
            if had_ttl {
                store.expire(db, &args[0], None);
                store.touch();
            }
            Ok(Frame::Integer(i64::from(had_ttl)))
        }
        "SET" => {
            arity(name, args, 2)?;
            store.set(db, &args[0], Value::String(args[1].clone()));
            store.touch();
            Ok(Frame::ok())
        }
        "GET" => {
            arity(name, args, 1)?;
            match store.get(db, &args[0]).map(|e| &e.value) {
                None => Ok(Frame::Null),
                Some(Value::String(s)) => Ok(Frame::bulk(s.clone())),
                Some(_) => Err(WRONGTYPE.into()),
            }
        }
        "APPEND" => {
            arity(name, args, 2)?;
            let len = match store.get_mut(db, &args[0]).map(|e| &mut e.value) {
                None => {
                    store.set(db, &args[0], Value::String(args[1].clone()));
                    args[1].len()
                }
                Some(Value::String(s)) => {
                    s.extend_from_slice(&args[1]);
                    s.len()
                }
                Some(_) => return Err(WRONGTYPE.into()),
            };
            store.touch();
            Ok(Frame::Integer(len as i64))
        }
        "RPUSH" | "LPUSH" => {
            min_arity(name, args, 2)?;
            let list = list_mut(store, db, &args[0], true)?.ok_or(WRONGTYPE)?;
            for value in &args[1..] {
                if name == "RPUSH" {
                    list.push_back(value.clone());
                } else {
                    list.push_front(value.clone());
                }
            }
            let len = list.len();
            store.touch();
            Ok(Frame::Integer(len as i64))
        }
        "LTRIM" => {
            arity(name, args, 3)?;
            let start = int_arg(&args[1])?;
            let stop = int_arg(&args[2])?;
            if let Some(list) = list_mut(store, db, &args[0], false)? {
                let (from, to) = range(start, stop, list.len());
                let kept: VecDeque<_> = list.drain(..).skip(from).take(to - from).collect();
                *list = kept;
                store.drop_if_empty(db, &args[0]);
                store.touch();
            }
            Ok(Frame::ok())
        }
        "LLEN" => {
            arity(name, args, 1)?;
            Ok(Frame::Integer(
                list_mut(store, db, &args[0], false)?.map_or(0, |l| l.len()) as i64,
            ))
        }
        "LRANGE" => {
            arity(name, args, 3)?;
            let start = int_arg(&args[1])?;
            let stop = int_arg(&args[2])?;
            let items = match list_mut(store, db, &args[0], false)? {
                None => Vec::new(),
                Some(list) => {
                    let (from, to) = range(start, stop, list.len());
                    list.range(from..to).map(|v| Frame::bulk(v.clone())).collect()
                }
            };
            Ok(Frame::Array(items))
        }
        "SADD" => {
            min_arity(name, args, 2)?;
            let set = set_mut(store, db, &args[0], true)?.ok_or(WRONGTYPE)?;
            let added = args[1..].iter().filter(|m| set.insert(m.to_vec())).count();
            store.touch();
            Ok(Frame::Integer(added as i64))
        }
        "SPOP" => {
            min_arity(name, args, 1)?;
            // Pops the smallest member; real servers pick at random.
            let popped = match store.get_mut(db, &args[0]).map(|e| &mut e.value) {
                None => None,
                Some(Value::Set(set)) => set.pop_first(),
                Some(_) => return Err(WRONGTYPE.into()),
            };
            store.drop_if_empty(db, &args[0]);
            match popped {
                Some(member) => {
                    store.touch();
                    Ok(Frame::bulk(member))
                }
                None => Ok(Frame::Null),
            }
        }
        "SSCAN" => {
            min_arity(name, args, 2)?;
            let members: Vec<Vec<u8>> = match store.get(db, &args[0]).map(|e| &e.value) {
                None => Vec::new(),
                Some(Value::Set(set)) => set.iter().cloned().collect(),
                Some(_) => return Err(WRONGTYPE.into()),
            };
            let (next, page) = page(&members, &args[1], &args[2..])?;
            Ok(scan_reply(next, page.iter().map(|m| Frame::bulk(m.clone())).collect()))
        }
        "HSET" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(wrong_arity(name));
            }
            let hash = hash_mut(store, db, &args[0], true)?.ok_or(WRONGTYPE)?;
            let added = args[1..]
                .chunks(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count();
            store.touch();
            Ok(Frame::Integer(added as i64))
        }
        "HGET" => {
            arity(name, args, 2)?;
            Ok(match hash_mut(store, db, &args[0], false)? {
                Some(hash) => hash.get(&args[1]).map_or(Frame::Null, |v| Frame::bulk(v.clone())),
                None => Frame::Null,
            })
        }
        "HINCRBY" => {
            arity(name, args, 3)?;
            let delta = int_arg(&args[2])?;
            let hash = hash_mut(store, db, &args[0], true)?.ok_or(WRONGTYPE)?;
            let current = match hash.get(&args[1]) {
                None => 0,
                Some(v) => std::str::from_utf8(v)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or("ERR hash value is not an integer")?,
            };
            let next = current
                .checked_add(delta)
                .ok_or("ERR increment or decrement would overflow")?;
            hash.insert(args[1].clone(), next.to_string().into_bytes());
            store.touch();
            Ok(Frame::Integer(next))
        }
        "HSCAN" => {
            min_arity(name, args, 2)?;
            let fields: Vec<(Vec<u8>, Vec<u8>)> = match hash_mut(store, db, &args[0], false)? {
                None => Vec::new(),
                Some(hash) => hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            };
            let (next, page) = page(&fields, &args[1], &args[2..])?;
            let flat = page
                .iter()
                .flat_map(|(f, v)| [Frame::bulk(f.clone()), Frame::bulk(v.clone())])
                .collect();
            Ok(scan_reply(next, flat))
        }
        "ZADD" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(wrong_arity(name));
            }
            let mut pairs = Vec::with_capacity(args.len() / 2);
            for pair in args[1..].chunks(2) {
                pairs.push((float_arg(&pair[0])?, pair[1].clone()));
            }
            let zset = zset_mut(store, db, &args[0], true)?.ok_or(WRONGTYPE)?;
            let added = pairs
                .into_iter()
                .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
                .count();
            store.touch();
            Ok(Frame::Integer(added as i64))
        }
        "ZINCRBY" => {
            arity(name, args, 3)?;
            let delta = float_arg(&args[1])?;
            let zset = zset_mut(store, db, &args[0], true)?.ok_or(WRONGTYPE)?;
            let score = zset.entry(args[2].clone()).or_insert(0.0);
            *score += delta;
            let score = *score;
            store.touch();
            Ok(Frame::Double(score))
        }
        "ZSCAN" => {
            min_arity(name, args, 2)?;
            let members: Vec<(Vec<u8>, f64)> = match zset_mut(store, db, &args[0], false)? {
                None => Vec::new(),
                Some(zset) => zset.iter().map(|(m, s)| (m.clone(), *s)).collect(),
            };
            let (next, page) = page(&members, &args[1], &args[2..])?;
            let flat = page
                .iter()
                .flat_map(|(m, s)| [Frame::bulk(m.clone()), Frame::bulk(format_double(*s))])
                .collect();
            Ok(scan_reply(next, flat))
        }
        "JSON.SET" | "JSON.GET" | "JSON.NUMINCRBY" if options.json => json(store, db, name, args),
        _ => Err(format!(
            "ERR unknown command '{}'",
            name.to_ascii_lowercase()
        )),
    }
}

fn hello(session: &mut Session, args: &[Vec<u8>]) -> Reply {
    if let Some(version) = args.first() {
        match int_arg(version)? {
            v @ 2..=3 => session.protocol = v as u8,
            _ => return Err("NOPROTO unsupported protocol version".into()),
        }
    }
    Ok(Frame::Map(vec![
        (Frame::bulk("server"), Frame::bulk(SERVER_NAME)),
        (Frame::bulk("version"), Frame::bulk(env!("CARGO_PKG_VERSION"))),
        (Frame::bulk("proto"), Frame::Integer(i64::from(session.protocol))),
        (Frame::bulk("id"), Frame::Integer(session.id as i64)),
        (Frame::bulk("mode"), Frame::bulk("standalone")),
        (Frame::bulk("role"), Frame::bulk("master")),
        (Frame::bulk("modules"), Frame::Array(Vec::new())),
    ]))
}

fn info(store: &mut Store, session: &Session) -> Frame {
    let mut text = String::new();
    text.push_str("# Server\r\n");
    text.push_str(&format!("redis_version:{}\r\n", env!("CARGO_PKG_VERSION")));
    text.push_str("\r\n# Persistence\r\n");
    text.push_str(&format!("rdb_changes_since_last_save:{}\r\n", store.dirty()));
    text.push_str("\r\n# Keyspace\r\n");
    for db in 0..store.databases() {
        let keys = store.len(db);
        if keys > 0 {
            let expires = store.volatile_len(db);
            text.push_str(&format!("db{}:keys={},expires={},avg_ttl=0\r\n", db, keys, expires));
        }
    }
    if session.protocol >= 3 {
        Frame::Verbatim {
            format: "txt".into(),
            text: Bytes::from(text),
        }
    } else {
        Frame::bulk(text)
    }
}

fn json(store: &mut Store, db: usize, name: &str, args: &[Vec<u8>]) -> Reply {
    match name {
        "JSON.SET" => {
            arity(name, args, 3)?;
            if !is_root(&args[1]) {
                return Err("ERR only the root path is supported".into());
            }
            let doc: serde_json::Value = serde_json::from_slice(&args[2])
                .map_err(|e| format!("ERR invalid JSON: {}", e))?;
            if let Some(entry) = store.get(db, &args[0]) {
                if !matches!(entry.value, Value::Json(_)) {
                    return Err(WRONGTYPE.into());
                }
            }
            store.set(db, &args[0], Value::Json(doc));
            store.touch();
            Ok(Frame::ok())
        }
        "JSON.GET" => {
            min_arity(name, args, 1)?;
            let doc = match store.get(db, &args[0]).map(|e| &e.value) {
                None => return Ok(Frame::Null),
                Some(Value::Json(doc)) => doc.clone(),
                Some(_) => return Err(WRONGTYPE.into()),
            };
            let rendered = match args.get(1).map(|p| p.as_slice()) {
                Some(b"$") => serde_json::Value::Array(vec![doc]).to_string(),
                _ => doc.to_string(),
            };
            Ok(Frame::bulk(rendered))
        }
        _ => {
            arity(name, args, 3)?;
            let path = String::from_utf8_lossy(&args[1]).into_owned();
            let delta = float_arg(&args[2])?;
            let int_delta = std::str::from_utf8(&args[2])
                .ok()
                .and_then(|s| s.parse::<i64>().ok());
            let doc = match store.get_mut(db, &args[0]).map(|e| &mut e.value) {
                None => return Err("ERR could not perform this operation on a key that doesn't exist".into()),
                Some(Value::Json(doc)) => doc,
                Some(_) => return Err(WRONGTYPE.into()),
            };
            let slot = match path.strip_prefix("$.") {
                Some(field) => doc.get_mut(field),
                None if path == "$" => Some(doc),
                None => return Err("ERR unsupported path".into()),
            };
            let updated = match slot {
                Some(slot) if slot.is_number() => {
                    let next = match (slot.as_i64(), int_delta) {
                        (Some(cur), Some(d)) => cur
                            .checked_add(d)
                            .map(serde_json::Value::from)
                            .ok_or("ERR result is out of range")?,
                        _ => serde_json::Value::from(slot.as_f64().unwrap_or(0.0) + delta),
                    };
                    *slot = next.clone();
                    next
                }
                _ => serde_json::Value::Null,
            };
            if !updated.is_null() {
                store.touch();
            }
            Ok(Frame::bulk(serde_json::Value::Array(vec![updated]).to_string()))
        }
    }
}

fn is_root(path: &[u8]) -> bool {
    path == b"$" || path == b"."
}

fn list_mut<'a>(
    store: &'a mut Store,
    db: usize,
    key: &[u8],
    create: bool,
) -> std::result::Result<Option<&'a mut VecDeque<Vec<u8>>>, String> {
    typed_mut(store, db, key, create, || Value::List(VecDeque::new()), |v| match v {
        Value::List(l) => Some(l),
        _ => None,
    })
}

fn set_mut<'a>(
    store: &'a mut Store,
    db: usize,
    key: &[u8],
    create: bool,
) -> std::result::Result<Option<&'a mut BTreeSet<Vec<u8>>>, String> {
    typed_mut(store, db, key, create, || Value::Set(BTreeSet::new()), |v| match v {
        Value::Set(s) => Some(s),
        _ => None,
    })
}

fn hash_mut<'a>(
    store: &'a mut Store,
    db: usize,
    key: &[u8],
    create: bool,
) -> std::result::Result<Option<&'a mut BTreeMap<Vec<u8>, Vec<u8>>>, String> {
    typed_mut(store, db, key, create, || Value::Hash(BTreeMap::new()), |v| match v {
        Value::Hash(h) => Some(h),
        _ => None,
    })
}

fn zset_mut<'a>(
    store: &'a mut Store,
    db: usize,
    key: &[u8],
    create: bool,
) -> std::result::Result<Option<&'a mut BTreeMap<Vec<u8>, f64>>, String> {
    typed_mut(store, db, key, create, || Value::ZSet(BTreeMap::new()), |v| match v {
        Value::ZSet(z) => Some(z),
        _ => None,
    })
}

/// Typed view of a key: `Err` on a type clash, `Ok(None)` when absent and
/// `create` is false.
fn typed_mut<'a, T>(
    store: &'a mut Store,
    db: usize,
    key: &[u8],
    create: bool,
    empty: impl FnOnce() -> Value,
    view: impl Fn(&mut Value) -> Option<&mut T>,
) -> std::result::Result<Option<&'a mut T>, String> {
    let exists = store.get(db, key).is_some();
    if !exists {
        if !create {
            return Ok(None);
        }
        store.set(db, key, empty());
    }
    match store.get_mut(db, key) {
        Some(entry) => view(&mut entry.value).map(Some).ok_or_else(|| WRONGTYPE.to_string()),
        None => Ok(None),
    }
}

/// Redis-style inclusive index range clamped to `[0, len)`, as `from..to`
fn range(start: i64, stop: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        (0, 0)
    } else {
        (start as usize, (stop + 1) as usize)
    }
}

/// One page of a cursor scan over `items`.
///
/// The cursor is an offset into the sorted collection; `0` ends the scan.
fn page<'a, T>(items: &'a [T], cursor: &[u8], options: &[Vec<u8>]) -> std::result::Result<(usize, &'a [T]), String> {
    let cursor = usize::try_from(int_arg(cursor)?).map_err(|_| "ERR invalid cursor".to_string())?;
    let mut count = 10usize;
    let mut i = 0;
    while i < options.len() {
        let option = String::from_utf8_lossy(&options[i]).to_ascii_uppercase();
        let value = options.get(i + 1).ok_or("ERR syntax error")?;
        match option.as_str() {
            "COUNT" => {
                count = usize::try_from(int_arg(value)?)
                    .ok()
                    .filter(|c| *c > 0)
                    .ok_or("ERR value is out of range, must be positive")?;
            }
            "MATCH" if value.as_slice() == b"*" => {}
            _ => return Err("ERR syntax error".into()),
        }
        i += 2;
    }
    let from = cursor.min(items.len());
    let to = from.saturating_add(count).min(items.len());
    let next = if to >= items.len() { 0 } else { to };
    Ok((next, &items[from..to]))
}

fn scan_reply(next: usize, items: Vec<Frame>) -> Frame {
    Frame::Array(vec![Frame::bulk(next.to_string()), Frame::Array(items)])
}

fn int_arg(arg: &[u8]) -> std::result::Result<i64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| "ERR value is not an integer or out of range".to_string())
}

fn float_arg(arg: &[u8]) -> std::result::Result<f64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(parse_double)
        .filter(|f| !f.is_nan())
        .ok_or_else(|| "ERR value is not a valid float".to_string())
}

fn arity(name: &str, args: &[Vec<u8>], n: usize) -> std::result::Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(wrong_arity(name))
    }
}

fn min_arity(name: &str, args: &[Vec<u8>], n: usize) -> std::result::Result<(), String> {
    if args.len() >= n {
        Ok(())
    } else {
        Err(wrong_arity(name))
    }
}

fn wrong_arity(name: &str) -> String {
    format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    )
}
