//! TCP front end of the in-process server

use bytes::{Buf, BytesMut};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use kvparity_core::Endpoint;
use kvparity_wire::{decode, encode_frame, Frame};

use crate::commands::{execute, Session};
use crate::store::Store;

/// Behavior switches for a [`MemoryServer`]
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Logical databases available to `SELECT`
    pub databases: u16,
    /// Whether `HELLO` is understood (otherwise clients fall back to RESP2)
    pub hello: bool,
    /// Whether the `JSON.*` commands are available
    pub json: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            databases: 16,
            hello: true,
            json: true,
        }
    }
}

/// Write applied to the keyspace right after a matching network request
#[derive(Debug)]
struct Trigger {
    command: String,
    action: Vec<Vec<u8>>,
    remaining: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    store: Mutex<Store>,
    options: RwLock<ServerOptions>,
    next_id: AtomicU64,
    drop_replies: AtomicUsize,
    triggers: Mutex<Vec<Trigger>>,
}

impl Shared {
    /// Fire the triggers registered for `command` in the session's database
    fn fire(&self, store: &mut Store, session: &Session, command: &[u8]) {
        let mut triggers = self.triggers.lock();
        if triggers.is_empty() {
            return;
        }
        let name = String::from_utf8_lossy(command).to_ascii_uppercase();
        for trigger in triggers.iter_mut().filter(|t| t.command == name) {
            if let Some(remaining) = trigger.remaining.as_mut() {
                if *remaining == 0 {
                    continue;
                }
                *remaining -= 1;
            }
            let mut scratch = Session::new(0);
            scratch.protocol = session.protocol;
            scratch.db = session.db;
            execute(store, &mut scratch, &self.options.read(), &trigger.action);
        }
        triggers.retain(|t| t.remaining != Some(0));
    }
}

/// In-process key-value server on an ephemeral loopback port.
///
/// Stops accepting and closes all connections when dropped.
#[derive(Debug)]
pub struct MemoryServer {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl MemoryServer {
    /// Start with default options
    pub async fn start() -> io::Result<MemoryServer> {
        Self::start_with(ServerOptions::default()).await
    }

    /// Start with explicit options
    pub async fn start_with(options: ServerOptions) -> io::Result<MemoryServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let shared = Arc::new(Shared {
            store: Mutex::new(Store::new(options.databases)),
            options: RwLock::new(options),
            next_id: AtomicU64::new(1),
            drop_replies: AtomicUsize::new(0),
            triggers: Mutex::new(Vec::new()),
        });
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        debug!(target: "kvparity::testing", port, "Memory server listening");
        Ok(MemoryServer {
            endpoint: Endpoint::localhost(port),
            shared,
            accept,
        })
    }

    /// Address clients connect to
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Listening port
    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    /// Run a command directly against the keyspace, bypassing the network
    pub fn command(&self, args: &[&str]) -> Frame {
        let args: Vec<Vec<u8>> = args.iter().map(|a| a.as_bytes().to_vec()).collect();
        let mut session = Session::new(0);
        session.protocol = 3;
        execute(&mut self.shared.store.lock(), &mut session, &self.shared.options.read(), &args)
    }

    /// Run a command against logical database `db`
    pub fn command_in(&self, db: u16, args: &[&str]) -> Frame {
        let args: Vec<Vec<u8>> = args.iter().map(|a| a.as_bytes().to_vec()).collect();
        let mut session = Session::new(0);
        session.protocol = 3;
        session.db = usize::from(db);
        execute(&mut self.shared.store.lock(), &mut session, &self.shared.options.read(), &args)
    }

    /// Live keys in logical database `db`
    pub fn dbsize(&self, db: u16) -> usize {
        self.shared.store.lock().len(usize::from(db))
    }

    /// Close the connection instead of answering the next `n` commands.
    ///
    /// The commands are still applied, as when a reply is lost in transit.
    pub fn drop_next_replies(&self, n: usize) {
        self.shared.drop_replies.store(n, Ordering::SeqCst);
    }

    /// Toggle `HELLO` support for subsequent requests, as when the target is
    /// restarted with a different configuration
    pub fn set_hello(&self, enabled: bool) {
        self.shared.options.write().hello = enabled;
    }

    /// Run `action` after every network request named `command`, in the
    /// requester's selected database.
    pub fn after_command(&self, command: &str, action: &[&str]) {
        self.add_trigger(command, action, None);
    }

    /// Like [`after_command`](Self::after_command) but only for the next
    /// `times` matching requests.
    pub fn after_command_times(&self, command: &str, times: usize, action: &[&str]) {
        if times > 0 {
            self.add_trigger(command, action, Some(times));
        }
    }

    fn add_trigger(&self, command: &str, action: &[&str], remaining: Option<usize>) {
        self.shared.triggers.lock().push(Trigger {
            command: command.to_ascii_uppercase(),
            action: action.iter().map(|a| a.as_bytes().to_vec()).collect(),
            remaining,
        });
    }
}

impl Drop for MemoryServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                    connections.spawn(serve(stream, Arc::clone(&shared), id));
                }
                Err(e) => {
                    debug!(target: "kvparity::testing", error = %e, "Accept failed");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>, id: u64) {
    let _ = stream.set_nodelay(true);
    let mut session = Session::new(id);
    let mut buffer = BytesMut::with_capacity(4096);
    let mut out = Vec::with_capacity(4096);
    loop {
        let request = loop {
            match decode(&buffer) {
                Ok(Some((frame, used))) => {
                    buffer.advance(used);
                    break frame;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(target: "kvparity::testing", id, error = %e, "Malformed request");
                    return;
                }
            }
            match stream.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        let reply = match request_args(request) {
            Some(args) => {
                let mut store = shared.store.lock();
                let reply = execute(&mut store, &mut session, &shared.options.read(), &args);
                if let Some(name) = args.first() {
                    shared.fire(&mut store, &session, name);
                }
                reply
            }
            None => Frame::error("ERR protocol error: expected an array of bulk strings"),
        };

        let dropped = shared
            .drop_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            debug!(target: "kvparity::testing", id, "Dropping reply and connection");
            return;
        }

        out.clear();
        encode_frame(&reply, session.protocol, &mut out);
        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn request_args(frame: Frame) -> Option<Vec<Vec<u8>>> {
    frame
        .into_array()?
        .into_iter()
        .map(|f| f.as_bytes().map(<[u8]>::to_vec))
        .collect()
}
