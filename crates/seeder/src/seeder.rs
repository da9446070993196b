//! Seeder facade
//!
//! Drives a verification run end to end:
//!
//! 1. `connect` handshakes every target and builds the connection pool
//! 2. `run` generates batches under the deviation controller and broadcasts
//!    each batch to every target, waiting for all acknowledgements
//! 3. `capture` reads a target into a snapshot kept inside the seeder and
//!    returns an opaque handle
//! 4. `compare` checks two captured snapshots (or a snapshot and a freshly
//!    captured target) for consistency

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use kvparity_core::{Endpoint, Error, Result, RunId, Target};
use kvparity_pool::{ConnectionPool, TargetPool};
use kvparity_snapshot::{compare, Capturer, DiffReport, Snapshot};
use kvparity_workload::{next_batch, validate_target, DeviationController, RunState};

use crate::config::SeederConfig;
use crate::report::RunReport;

/// Mismatches listed in the log when a comparison fails
const LOGGED_MISMATCHES: usize = 10;

/// Opaque reference to a snapshot held by a [`Seeder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotHandle(u64);

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// Requests that a running [`Seeder::run`] stop after its in-flight batch
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested and not yet consumed
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Seeds targets with an identical workload and verifies they agree
pub struct Seeder {
    pool: ConnectionPool,
    config: SeederConfig,
    capturer: Capturer,
    snapshots: Mutex<HashMap<u64, Arc<Snapshot>>>,
    next_handle: AtomicU64,
    cancel: Arc<AtomicBool>,
}

impl Seeder {
    /// Validate `config` and handshake every address
    pub async fn connect(addresses: &[Endpoint], config: SeederConfig) -> Result<Seeder> {
        config.validate()?;
        if addresses.is_empty() {
            return Err(Error::invalid_config("at least one target address is required"));
        }
        let pool = ConnectionPool::connect(addresses, config.pool.clone()).await?;
        Ok(Seeder {
            pool,
            capturer: Capturer::new(config.capture.clone()),
            config,
            snapshots: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Targets every run is broadcast to
    pub fn targets(&self) -> Vec<Target> {
        self.pool.targets()
    }

    /// Active configuration
    pub fn config(&self) -> &SeederConfig {
        &self.config
    }

    /// Handle that cancels the current or next run
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Seed every target until the deviation reaches `target_deviation`.
    ///
    /// Returns once every operation issued has been acknowledged by every
    /// target. A cancel request is honored between batches; a run cancelled
    /// before its first batch fails with [`Error::Cancelled`].
    pub async fn run(&self, target_deviation: f64) -> Result<RunReport> {
        validate_target(target_deviation)?;
        let workload = &self.config.workload;
        let run_id = RunId::new();
        let started = Instant::now();
        let mut state = RunState::new(workload);
        let mut controller = DeviationController::for_config(workload);
        let mut batches = 0u64;
        let mut cancelled = false;

        info!(
            target: "kvparity::seeder",
            run_id = %run_id,
            targets = self.pool.pools().len(),
            keys = workload.keys,
            dbcount = workload.dbcount,
            target_deviation,
            "Run started"
        );

        loop {
            if self.cancel.swap(false, Ordering::SeqCst) {
                if batches == 0 {
                    info!(target: "kvparity::seeder", run_id = %run_id, "Run cancelled before start");
                    return Err(Error::Cancelled);
                }
                cancelled = true;
                break;
            }
            let metric = state.metric(workload);
            if controller.should_stop(&metric, target_deviation) {
                break;
            }
            let batch = next_batch(&mut state, workload, workload.batch_size);
            if batch.is_empty() {
                controller.generator_exhausted(&state.metric(workload), target_deviation);
                break;
            }
            for result in self.pool.broadcast(&batch).await {
                if let Err(e) = result.outcome {
                    warn!(
                        target: "kvparity::seeder",
                        run_id = %run_id,
                        endpoint = %result.target,
                        error = %e,
                        "Run aborted"
                    );
                    return Err(e);
                }
            }
            batches += 1;
            debug!(
                target: "kvparity::seeder",
                run_id = %run_id,
                batch = batches,
                operations = state.operations(),
                live_keys = state.live_keys(),
                "Batch acknowledged"
            );
        }

        let report = RunReport {
            run_id,
            targets: self.pool.pools().len(),
            operations: state.operations(),
            batches,
            metric: state.metric(workload),
            stop_reason: if cancelled { None } else { controller.stop_reason() },
            warning: controller.warning().cloned(),
            cancelled,
            elapsed: started.elapsed(),
        };
        info!(
            target: "kvparity::seeder",
            run_id = %run_id,
            operations = report.operations,
            batches,
            deviation = report.metric.deviation,
            cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }

    /// Capture `endpoint` and keep the snapshot.
    ///
    /// The endpoint need not be one of the seeded targets; a replica, for
    /// example, is connected on demand with the same pool settings.
    pub async fn capture(&self, endpoint: &Endpoint) -> Result<SnapshotHandle> {
        let pool = self.pool_for(endpoint).await?;
        let snapshot = self.capturer.capture(&pool).await?;
        let handle = SnapshotHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        debug!(
            target: "kvparity::seeder",
            %handle,
            endpoint = %endpoint,
            keys = snapshot.len(),
            "Snapshot stored"
        );
        self.snapshots.lock().insert(handle.0, Arc::new(snapshot));
        Ok(handle)
    }

    /// Snapshot behind `handle`
    pub fn snapshot(&self, handle: SnapshotHandle) -> Result<Arc<Snapshot>> {
        self.snapshots
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or(Error::UnknownSnapshot(handle.0))
    }

    /// Drop a stored snapshot
    pub fn release(&self, handle: SnapshotHandle) -> Result<()> {
        self.snapshots
            .lock()
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(Error::UnknownSnapshot(handle.0))
    }

    /// Whether two stored snapshots are consistent
    pub async fn compare(&self, a: SnapshotHandle, b: SnapshotHandle) -> Result<bool> {
        Ok(self.compare_report(a, b).await?.is_consistent())
    }

    /// Full diff of two stored snapshots
    pub async fn compare_report(&self, a: SnapshotHandle, b: SnapshotHandle) -> Result<DiffReport> {
        let left = self.snapshot(a)?;
        let right = self.snapshot(b)?;
        let (consistent, report) = compare(&left, &right, &self.config.compare);
        if consistent {
            info!(
                target: "kvparity::seeder",
                left = %report.left,
                right = %report.right,
                keys = report.keys_compared,
                tolerated = report.tolerated,
                "Snapshots consistent"
            );
        } else {
            warn!(
                target: "kvparity::seeder",
                left = %report.left,
                right = %report.right,
                mismatches = report.mismatches.len(),
                "Snapshots differ\n{}",
                report.render(LOGGED_MISMATCHES)
            );
        }
        Ok(report)
    }

    /// Capture `endpoint` now and compare it against a stored snapshot
    pub async fn compare_with_target(&self, handle: SnapshotHandle, endpoint: &Endpoint) -> Result<bool> {
        self.snapshot(handle)?;
        let fresh = self.capture(endpoint).await?;
        let result = self.compare(handle, fresh).await;
        self.release(fresh)?;
        result
    }

    /// Remove every key from every seeded target
    pub async fn flush_all(&self) -> Result<()> {
        for pool in self.pool.pools() {
            let mut conn = pool.acquire().await?;
            conn.call(0, vec![b"FLUSHALL".to_vec()]).await?;
            info!(target: "kvparity::seeder", endpoint = %pool.target(), "Target flushed");
        }
        Ok(())
    }

    async fn pool_for(&self, endpoint: &Endpoint) -> Result<Arc<TargetPool>> {
        if let Some(pool) = self
            .pool
            .pools()
            .iter()
            .find(|p| p.target().endpoint() == endpoint)
        {
            return Ok(Arc::clone(pool));
        }
        TargetPool::connect(endpoint.clone(), self.config.pool.clone()).await
    }
}

impl fmt::Debug for Seeder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seeder")
            .field("targets", &self.pool.targets())
            .field("snapshots", &self.snapshots.lock().len())
            .finish()
    }
}
