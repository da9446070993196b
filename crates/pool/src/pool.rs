//! Bounded per-target connection pool
//!
//! Each target gets a [`TargetPool`]: a semaphore bounding the number of
//! checked-out connections plus a free list of idle ones. Checking out past
//! the bound suspends the caller until a connection is released.
//!
//! A [`PooledConnection`] returns its connection to the free list on drop
//! unless the connection saw a transport failure, in which case it is
//! discarded and the next checkout opens a fresh one.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use kvparity_core::{Endpoint, Error, OperationSpec, Result, Target};
use kvparity_wire::Frame;

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::retry::Backoff;

/// Connections to a single target
#[derive(Debug)]
pub struct TargetPool {
    target: Target,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
}

impl TargetPool {
    /// Connect to `endpoint` and record the negotiated capabilities.
    ///
    /// The handshake connection seeds the free list.
    pub async fn connect(endpoint: Endpoint, config: PoolConfig) -> Result<Arc<TargetPool>> {
        let (conn, caps) = retrying(&endpoint, &config, || Connection::open(&endpoint, &config)).await?;
        info!(
            target: "kvparity::pool",
            endpoint = %endpoint,
            protocol = caps.protocol,
            server = caps.server.as_deref().unwrap_or("unknown"),
            version = caps.version.as_deref().unwrap_or("unknown"),
            "Connected to target"
        );
        Ok(Arc::new(TargetPool {
            target: Target::new(endpoint, caps),
            permits: Arc::new(Semaphore::new(config.max_connections)),
            idle: Mutex::new(vec![conn]),
            config,
        }))
    }

    /// Target served by this pool
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Pool settings
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Idle connections on the free list
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Connections that may still be checked out without blocking
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Check out a connection, waiting while the bound is reached
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::connectivity(&self.target, "pool closed"))?;
        let idle = self.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.open().await?,
        };
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Return a connection to the pool
    pub fn release(&self, mut conn: PooledConnection) {
        if let Some(inner) = conn.conn.take() {
            self.put_back(inner);
        }
    }

    async fn open(&self) -> Result<Connection> {
        let endpoint = self.target.endpoint();
        let (conn, caps) =
            retrying(endpoint, &self.config, || Connection::open(endpoint, &self.config)).await?;
        self.check_protocol(caps.protocol)?;
        debug!(target: "kvparity::pool", endpoint = %endpoint, "Opened connection");
        Ok(conn)
    }

    /// Single attempt at a replacement connection; the caller owns retries
    async fn reopen(&self) -> Result<Connection> {
        let endpoint = self.target.endpoint();
        let (conn, caps) = Connection::open(endpoint, &self.config).await?;
        self.check_protocol(caps.protocol)?;
        debug!(target: "kvparity::pool", endpoint = %endpoint, "Reopened connection");
        Ok(conn)
    }

    fn check_protocol(&self, negotiated: u8) -> Result<()> {
        if negotiated != self.target.protocol() {
            return Err(Error::protocol(
                &self.target,
                format!(
                    "protocol changed from {} to {} between connections",
                    self.target.protocol(),
                    negotiated
                ),
            ));
        }
        Ok(())
    }

    fn put_back(&self, conn: Connection) {
        if conn.is_broken() {
            debug!(target: "kvparity::pool", endpoint = %conn.endpoint(), "Discarding broken connection");
            return;
        }
        self.idle.lock().push(conn);
    }
}

/// A checked-out connection; returned to its pool on drop
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<TargetPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Apply `spec`, retrying connectivity failures on a fresh connection
    pub async fn execute(&mut self, spec: &OperationSpec) -> Result<Frame> {
        self.with_retry(spec.db, spec.args()).await
    }

    /// Issue a read-only command against `db` with retries.
    ///
    /// Only for commands that are safe to repeat.
    pub async fn call(&mut self, db: u16, args: Vec<Vec<u8>>) -> Result<Frame> {
        self.with_retry(db, args).await
    }

    async fn with_retry(&mut self, db: u16, args: Vec<Vec<u8>>) -> Result<Frame> {
        let mut backoff = Backoff::from_config(&self.pool.config);
        let mut attempt = 1;
        loop {
            match self.attempt(db, &args).await {
                Ok(frame) => return Ok(frame),
                Err(e) if e.is_retryable() && attempt <= self.pool.config.max_retries => {
                    let delay = backoff.next_delay();
                    warn!(
                        target: "kvparity::pool",
                        endpoint = %self.pool.target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying command"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.with_attempts(attempt)),
            }
        }
    }

    async fn attempt(&mut self, db: u16, args: &[Vec<u8>]) -> Result<Frame> {
        if self.conn.as_ref().map_or(true, Connection::is_broken) {
            self.conn = None;
            self.conn = Some(self.pool.reopen().await?);
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::connectivity(&self.pool.target, "no connection"))?;
        conn.select(db).await?;
        conn.call(args).await
    }

    /// Target this connection belongs to
    pub fn target(&self) -> &Target {
        &self.pool.target
    }

    /// Logical database the underlying connection has selected
    pub fn db(&self) -> Option<u16> {
        self.conn.as_ref().map(Connection::db)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}

/// Pools for every target of a run, in connect order
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pools: Vec<Arc<TargetPool>>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Handshake with every endpoint
    pub async fn connect(endpoints: &[Endpoint], config: PoolConfig) -> Result<ConnectionPool> {
        config.validate()?;
        let mut pools = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            pools.push(TargetPool::connect(endpoint.clone(), config.clone()).await?);
        }
        Ok(ConnectionPool { pools, config })
    }

    /// Targets in connect order
    pub fn targets(&self) -> Vec<Target> {
        self.pools.iter().map(|p| p.target.clone()).collect()
    }

    /// Pool settings
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Per-target pools in connect order
    pub fn pools(&self) -> &[Arc<TargetPool>] {
        &self.pools
    }

    /// Pool serving `target`
    pub fn pool_for(&self, target: &Target) -> Result<&Arc<TargetPool>> {
        self.pools
            .iter()
            .find(|p| p.target.endpoint() == target.endpoint())
            .ok_or_else(|| Error::invalid_config(format!("{} is not a pool target", target)))
    }

    /// Check out a connection to `target`
    pub async fn acquire(&self, target: &Target) -> Result<PooledConnection> {
        self.pool_for(target)?.acquire().await
    }

    /// Return a connection to its pool
    pub fn release(&self, conn: PooledConnection) {
        let pool = Arc::clone(&conn.pool);
        pool.release(conn);
    }
}

async fn retrying<T, F, Fut>(endpoint: &Endpoint, config: &PoolConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = Backoff::from_config(config);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let delay = backoff.next_delay();
                warn!(
                    target: "kvparity::pool",
                    endpoint = %endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying connect"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.with_attempts(attempt)),
        }
    }
}
