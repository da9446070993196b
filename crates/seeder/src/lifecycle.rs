//! Server process lifecycle
//!
//! A [`ServerProcess`] owns a spawned server binary. The binary, its
//! arguments and its port are all supplied through [`ServerSpec`]; the
//! literal `{port}` in any argument is replaced with the configured port.
//! Dropping a still-running process kills it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use kvparity_core::{Endpoint, Error, Result};
use kvparity_pool::{Connection, PoolConfig};

/// How to launch one server
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// Executable path
    pub program: PathBuf,
    /// Arguments; `{port}` is substituted
    pub args: Vec<String>,
    /// Host clients connect to
    pub host: String,
    /// Port the server listens on
    pub port: u16,
}

impl ServerSpec {
    /// Spec for `program` listening on `port` of localhost
    pub fn new(program: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Address clients use to reach the server
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Arguments with `{port}` substituted
    pub fn resolved_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}

/// A running server binary
#[derive(Debug)]
pub struct ServerProcess {
    spec: ServerSpec,
    child: Option<Child>,
}

impl ServerProcess {
    /// Spawn the server without waiting for it to accept connections
    pub async fn start(spec: ServerSpec) -> Result<ServerProcess> {
        let child = Command::new(&spec.program)
            .args(spec.resolved_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Lifecycle(format!("failed to spawn '{}': {}", spec.program.display(), e))
            })?;
        info!(
            target: "kvparity::seeder",
            program = %spec.program.display(),
            port = spec.port,
            pid = ?child.id(),
            "Server started"
        );
        Ok(ServerProcess {
            spec,
            child: Some(child),
        })
    }

    /// Spawn the server and wait until it answers `PING`
    pub async fn start_ready(spec: ServerSpec, timeout: Duration) -> Result<ServerProcess> {
        let process = Self::start(spec).await?;
        wait_ready(&process.endpoint(), timeout).await?;
        Ok(process)
    }

    /// Address of the server
    pub fn endpoint(&self) -> Endpoint {
        self.spec.endpoint()
    }

    /// Launch spec
    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    /// OS process id, while running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Ask the server to shut down, kill it after `grace`, and reap it
    pub async fn stop(mut self, grace: Duration) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let endpoint = self.spec.endpoint();
        let config = PoolConfig::default().with_op_timeout(grace.max(Duration::from_millis(10)));
        if let Ok(mut conn) = Connection::connect(&endpoint, &config).await {
            // The server closes the connection instead of replying.
            let _ = conn.request(&["SHUTDOWN", "NOSAVE"]).await;
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(target: "kvparity::seeder", endpoint = %endpoint, %status, "Server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Lifecycle(format!("failed to reap {}: {}", endpoint, e))),
            Err(_) => {
                warn!(
                    target: "kvparity::seeder",
                    endpoint = %endpoint,
                    grace_ms = grace.as_millis() as u64,
                    "Server ignored shutdown; killing"
                );
                child
                    .kill()
                    .await
                    .map_err(|e| Error::Lifecycle(format!("failed to kill {}: {}", endpoint, e)))
            }
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!(target: "kvparity::seeder", error = %e, "Server already exited");
            }
        }
    }
}

/// Poll `endpoint` with `PING` until it answers or `timeout` elapses
pub async fn wait_ready(endpoint: &Endpoint, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let config = PoolConfig::default();
    let mut last_error = String::from("no attempt made");
    while Instant::now() < deadline {
        match Connection::connect(endpoint, &config).await {
            Ok(mut conn) => match conn.ping().await {
                Ok(()) => {
                    debug!(target: "kvparity::seeder", endpoint = %endpoint, "Server ready");
                    return Ok(());
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(Error::Lifecycle(format!(
        "{} not ready after {} ms: {}",
        endpoint,
        timeout.as_millis(),
        last_error
    )))
}
