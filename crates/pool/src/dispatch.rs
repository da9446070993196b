//! Key-affine broadcast of operation batches
//!
//! A batch is split into shards by a stable hash of `(db, key)`. Every shard
//! runs sequentially on one pooled connection, so two operations on the same
//! key reach a target in generation order. Shards of one target, and all
//! targets, run concurrently.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};
use xxhash_rust::xxh3::xxh3_64;

use kvparity_core::{OperationSpec, Result, Target};

use crate::pool::{ConnectionPool, TargetPool};

/// Outcome of a batch on one target
#[derive(Debug)]
pub struct BroadcastResult {
    /// Target the batch was applied to
    pub target: Target,
    /// Acknowledged operations, or the first failure
    pub outcome: Result<usize>,
}

/// Shard index of `(db, key)` among `shards` shards
pub fn shard_of(db: u16, key: &str, shards: usize) -> usize {
    let mut buf = Vec::with_capacity(key.len() + 2);
    buf.extend_from_slice(&db.to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    (xxh3_64(&buf) % shards.max(1) as u64) as usize
}

/// Split `batch` into at most `shards` order-preserving groups
pub fn partition(batch: &[OperationSpec], shards: usize) -> Vec<Vec<OperationSpec>> {
    let shards = shards.max(1);
    let mut groups: Vec<Vec<OperationSpec>> = vec![Vec::new(); shards];
    for spec in batch {
        groups[shard_of(spec.db, &spec.key, shards)].push(spec.clone());
    }
    groups.retain(|g| !g.is_empty());
    groups
}

impl ConnectionPool {
    /// Apply `batch` to every target and wait for all acknowledgements.
    ///
    /// Results are in target connect order. A shard that fails stops at the
    /// failing operation; other shards still run to completion.
    pub async fn broadcast(&self, batch: &[OperationSpec]) -> Vec<BroadcastResult> {
        let shards = partition(batch, self.config().max_connections);
        let mut set = JoinSet::new();
        for (index, pool) in self.pools().iter().enumerate() {
            for shard in &shards {
                let pool = Arc::clone(pool);
                let shard = shard.clone();
                set.spawn(async move { (index, run_shard(pool, shard).await) });
            }
        }

        let mut outcomes: Vec<Result<usize>> = self.pools().iter().map(|_| Ok(0)).collect();
        while let Some(joined) = set.join_next().await {
            let (index, result) = match joined {
                Ok(v) => v,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    error!(target: "kvparity::pool", error = %e, "Shard task aborted");
                    continue;
                }
            };
            let slot = &mut outcomes[index];
            match result {
                Ok(n) => {
                    if let Ok(total) = slot {
                        *total += n;
                    }
                }
                Err(e) => {
                    if slot.is_ok() {
                        *slot = Err(e);
                    }
                }
            }
        }

        self.pools()
            .iter()
            .zip(outcomes)
            .map(|(pool, outcome)| BroadcastResult {
                target: pool.target().clone(),
                outcome,
            })
            .collect()
    }
}

async fn run_shard(pool: Arc<TargetPool>, ops: Vec<OperationSpec>) -> Result<usize> {
    let mut conn = pool.acquire().await?;
    for (done, spec) in ops.iter().enumerate() {
        if let Err(e) = conn.execute(spec).await {
            error!(
                target: "kvparity::pool",
                endpoint = %pool.target(),
                seq = spec.seq,
                command = %spec.render(),
                acknowledged = done,
                error = %e,
                "Operation failed"
            );
            return Err(e);
        }
    }
    debug!(
        target: "kvparity::pool",
        endpoint = %pool.target(),
        ops = ops.len(),
        "Shard applied"
    );
    Ok(ops.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvparity_core::Operation;

    fn spec(seq: u64, db: u16, key: &str) -> OperationSpec {
        OperationSpec {
            seq,
            db,
            key: key.to_string(),
            op: Operation::Del,
        }
    }

    #[test]
    fn test_shard_is_stable() {
        for shards in 1..8 {
            assert_eq!(shard_of(0, "kp:1", shards), shard_of(0, "kp:1", shards));
            assert!(shard_of(3, "kp:1", shards) < shards);
        }
    }

    #[test]
    fn test_shard_zero_shards_is_clamped() {
        assert_eq!(shard_of(0, "k", 0), 0);
    }

    #[test]
    fn test_partition_keeps_same_key_order() {
        let batch: Vec<_> = (0..50)
            .map(|i| spec(i, (i % 2) as u16, &format!("kp:{}", i % 5)))
            .collect();
        let groups = partition(&batch, 4);

        assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), batch.len());
        for group in &groups {
            assert!(group.windows(2).all(|w| w[0].seq < w[1].seq));
        }
        for key in 0..5 {
            let name = format!("kp:{}", key);
            let holding: Vec<_> = groups
                .iter()
                .filter(|g| g.iter().any(|s| s.key == name && s.db == 0))
                .collect();
            assert!(holding.len() <= 1);
        }
    }

    #[test]
    fn test_partition_empty_batch() {
        assert!(partition(&[], 4).is_empty());
    }
}
