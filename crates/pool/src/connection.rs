//! Single connection to a target
//!
//! A [`Connection`] owns one TCP stream and a read buffer. Requests are
//! strictly request/reply: [`Connection::request`] writes one command and
//! suspends until its reply is decoded. Out-of-band RESP3 push frames are
//! skipped.

use bytes::{Buf, BytesMut};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use kvparity_core::{Capabilities, Endpoint, Error, OperationSpec, Result};
use kvparity_wire::{decode, encode_command, Frame};

use crate::config::PoolConfig;

const READ_CHUNK: usize = 16 * 1024;

/// One open connection to a target
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    stream: TcpStream,
    buffer: BytesMut,
    out: Vec<u8>,
    protocol: u8,
    db: u16,
    op_timeout: Duration,
    broken: bool,
}

impl Connection {
    /// Open a TCP connection without handshaking
    pub async fn connect(endpoint: &Endpoint, config: &PoolConfig) -> Result<Connection> {
        let addr = endpoint.to_string();
        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::connectivity(endpoint, "connect timed out"))?
            .map_err(|e| Error::connectivity(endpoint, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::connectivity(endpoint, e))?;
        Ok(Connection {
            endpoint: endpoint.clone(),
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            out: Vec::with_capacity(256),
            protocol: 2,
            db: 0,
            op_timeout: config.op_timeout(),
            broken: false,
        })
    }

    /// Open a connection and negotiate `protocol`
    pub async fn open(endpoint: &Endpoint, config: &PoolConfig) -> Result<(Connection, Capabilities)> {
        let mut conn = Connection::connect(endpoint, config).await?;
        let caps = conn.handshake(config.protocol).await?;
        Ok((conn, caps))
    }

    /// Negotiate the protocol version with `HELLO`.
    ///
    /// A server that rejects `HELLO` (or the requested version) is spoken to
    /// in RESP2.
    pub async fn handshake(&mut self, protocol: u8) -> Result<Capabilities> {
        let reply = self.request(&["HELLO".to_string(), protocol.to_string()]).await?;
        if let Some(msg) = reply.error_message() {
            debug!(
                target: "kvparity::pool",
                endpoint = %self.endpoint,
                reply = msg,
                "HELLO rejected, falling back to RESP2"
            );
            self.protocol = 2;
            return Ok(Capabilities::resp2_fallback());
        }
        let pairs = reply
            .into_pairs()
            .ok_or_else(|| Error::protocol(&self.endpoint, "HELLO reply is not a map"))?;
        let mut flags = BTreeMap::new();
        for (key, value) in pairs {
            let Some(key) = key.as_text() else { continue };
            let value = match &value {
                Frame::Integer(i) => i.to_string(),
                other => match other.as_text() {
                    Some(text) => text,
                    None => continue,
                },
            };
            flags.insert(key.to_ascii_lowercase(), value);
        }
        let caps = Capabilities::from_flags(flags)
            .map_err(|e| Error::protocol(&self.endpoint, e))?;
        self.protocol = caps.protocol;
        Ok(caps)
    }

    /// Send one command and wait for its reply.
    ///
    /// Error replies are returned as [`Frame::Error`]; transport failures
    /// and timeouts are connectivity errors and mark the connection broken.
    pub async fn request<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Frame> {
        if self.broken {
            return Err(Error::connectivity(&self.endpoint, "connection is broken"));
        }
        let result = tokio::time::timeout(self.op_timeout, self.round_trip(args)).await;
        match result {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => {
                self.broken = true;
                Err(e)
            }
            Err(_) => {
                self.broken = true;
                Err(Error::connectivity(
                    &self.endpoint,
                    format!("no reply within {}ms", self.op_timeout.as_millis()),
                ))
            }
        }
    }

    /// Send one command; an error reply becomes [`Error::Protocol`]
    pub async fn call<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Frame> {
        let frame = self.request(args).await?;
        match frame {
            Frame::Error(msg) => Err(Error::protocol(
                &self.endpoint,
                format!("{} replied: {}", command_name(args), msg),
            )),
            other => Ok(other),
        }
    }

    /// Switch the logical database if it differs from the current one
    pub async fn select(&mut self, db: u16) -> Result<()> {
        if db != self.db {
            self.call(&["SELECT".to_string(), db.to_string()]).await?;
            self.db = db;
        }
        Ok(())
    }

    /// Apply one generated operation
    pub async fn execute(&mut self, spec: &OperationSpec) -> Result<Frame> {
        self.select(spec.db).await?;
        self.call(&spec.args()).await
    }

    /// Liveness probe
    pub async fn ping(&mut self) -> Result<()> {
        self.call(&["PING"]).await.map(|_| ())
    }

    /// Target address
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Negotiated protocol version
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Currently selected logical database
    pub fn db(&self) -> u16 {
        self.db
    }

    /// Whether a transport failure left the stream in an unknown state
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    async fn round_trip<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Frame> {
        self.out.clear();
        encode_command(args, &mut self.out);
        self.stream
            .write_all(&self.out)
            .await
            .map_err(|e| Error::connectivity(&self.endpoint, e))?;
        loop {
            match self.read_frame().await? {
                Frame::Push(_) => continue,
                frame => return Ok(frame),
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match decode(&self.buffer) {
                Ok(Some((frame, used))) => {
                    self.buffer.advance(used);
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    self.broken = true;
                    return Err(Error::protocol(&self.endpoint, e));
                }
            }
            self.buffer.reserve(READ_CHUNK);
            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| Error::connectivity(&self.endpoint, e))?;
            if n == 0 {
                return Err(Error::connectivity(&self.endpoint, "connection closed by peer"));
            }
        }
    }
}

fn command_name<A: AsRef<[u8]>>(args: &[A]) -> String {
    args.first()
        .map(|a| String::from_utf8_lossy(a.as_ref()).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name() {
        assert_eq!(command_name(&["JSON.SET", "k", "$"]), "JSON.SET");
        assert_eq!(command_name::<&str>(&[]), "");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connectivity() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = PoolConfig::default();
        let err = Connection::connect(&Endpoint::localhost(port), &config)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.target(), Some(format!("127.0.0.1:{}", port).as_str()));
    }
}
