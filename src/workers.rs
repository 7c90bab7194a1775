//! Workers, the per-worker stat cascade, and the active-worker count.

use crate::error::{Result, TelemetryError};
use crate::miners::MinerRegistry;
use crate::store::SampleStore;
use crate::types::{unix_timestamp, Miner, StatDelta, Worker};
use std::sync::Arc;
use std::time::Duration;

/// Lookback window inside which a worker counts as active.
pub const ACTIVE_WORKER_LOOKBACK: Duration = Duration::from_secs(3 * 3600);

/// Registry of workers, keyed by (account, worker name).
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn SampleStore>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// Insert-or-fetch the worker for (account, worker name).
    ///
    /// Idempotent; repeated calls return the same logical entity.
    pub async fn get_or_create(&self, account: &str, worker_name: &str) -> Result<Worker> {
        self.store.upsert_worker(account, worker_name).await
    }

    /// Point lookup by (account, worker name).
    pub async fn get(&self, account: &str, worker_name: &str) -> Result<Option<Worker>> {
        self.store.get_worker(account, worker_name).await
    }

    /// Back-reference to the worker's owning miner.
    pub async fn miner_of(&self, worker: &Worker) -> Result<Option<Miner>> {
        self.store.get_miner(&worker.account).await
    }

    /// Apply a stat increment to the worker, cascading to its miner.
    ///
    /// Non-positive delta fields are ignored. The same delta is applied to
    /// the owning miner's counters if and only if the worker update
    /// succeeded. The two writes are not transactional: a failure between
    /// them leaves the worker ahead of the miner until a later increment or
    /// an external reconciliation catches up.
    pub async fn increment_stats(
        &self,
        account: &str,
        worker_name: &str,
        delta: StatDelta,
    ) -> Result<()> {
        let delta = delta.sanitized();
        if delta.is_noop() {
            return Ok(());
        }

        let updated = self
            .store
            .increment_worker_stats(account, worker_name, &delta)
            .await?;
        if !updated {
            return Err(TelemetryError::NotFound(format!(
                "worker {worker_name}.{account}"
            )));
        }

        MinerRegistry::new(Arc::clone(&self.store))
            .increment_stats(account, delta)
            .await
    }

    /// Count distinct workers with at least one hashrate sample inside the
    /// trailing `lookback` window. A presence metric: sample magnitude and
    /// count per worker are irrelevant.
    pub async fn active_count(&self, lookback: Duration) -> Result<u64> {
        let cutoff = unix_timestamp().saturating_sub(lookback.as_secs());
        self.store.count_active_workers(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{HashrateSample, MinerPatch};
    use tempfile::TempDir;

    async fn fixture() -> (TempDir, Arc<SqliteStore>, WorkerRegistry, MinerRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        let workers = WorkerRegistry::new(store.clone());
        let miners = MinerRegistry::new(store.clone());
        (temp_dir, store, workers, miners)
    }

    #[tokio::test]
    async fn test_get_or_create_idempotent() {
        let (_dir, _store, workers, _miners) = fixture().await;

        let first = workers.get_or_create("zil1abc", "rig0").await.unwrap();
        let second = workers.get_or_create("zil1abc", "rig0").await.unwrap();

        assert_eq!(first.account, second.account);
        assert_eq!(first.name, second.name);
    }

    #[tokio::test]
    async fn test_miner_of_back_reference() {
        let (_dir, _store, workers, miners) = fixture().await;

        miners
            .get_or_create("zil1abc", "rig0", MinerPatch::default())
            .await
            .unwrap();
        let worker = workers.get("zil1abc", "rig0").await.unwrap().unwrap();

        let miner = workers.miner_of(&worker).await.unwrap().unwrap();
        assert_eq!(miner.account, "zil1abc");

        let orphan = workers.get_or_create("zil1zzz", "rig9").await.unwrap();
        assert!(workers.miner_of(&orphan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cascade_keeps_miner_in_sync() {
        let (_dir, _store, workers, miners) = fixture().await;

        miners
            .get_or_create("zil1abc", "rig0", MinerPatch::default())
            .await
            .unwrap();
        miners
            .get_or_create("zil1abc", "rig1", MinerPatch::default())
            .await
            .unwrap();

        workers
            .increment_stats(
                "zil1abc",
                "rig0",
                StatDelta {
                    submitted: 3,
                    failed: 1,
                    finished: 2,
                    verified: 0,
                },
            )
            .await
            .unwrap();
        workers
            .increment_stats("zil1abc", "rig1", StatDelta::submitted(4))
            .await
            .unwrap();

        // Miner counters equal the sum over its workers
        let miner = miners.get("zil1abc").await.unwrap().unwrap();
        let workers_all = miners.workers_of("zil1abc").await.unwrap();
        let submitted: u64 = workers_all.iter().map(|w| w.stats.submitted).sum();
        let failed: u64 = workers_all.iter().map(|w| w.stats.failed).sum();
        let finished: u64 = workers_all.iter().map(|w| w.stats.finished).sum();

        assert_eq!(miner.stats.submitted, submitted);
        assert_eq!(miner.stats.failed, failed);
        assert_eq!(miner.stats.finished, finished);
        assert_eq!(miner.stats.submitted, 7);
    }

    #[tokio::test]
    async fn test_no_cascade_when_worker_missing() {
        let (_dir, _store, workers, miners) = fixture().await;

        miners
            .get_or_create("zil1abc", "rig0", MinerPatch::default())
            .await
            .unwrap();

        let err = workers
            .increment_stats("zil1abc", "ghost", StatDelta::submitted(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::NotFound(_)));

        // The failed worker update must not have touched the miner
        let miner = miners.get("zil1abc").await.unwrap().unwrap();
        assert_eq!(miner.stats.submitted, 0);
    }

    #[tokio::test]
    async fn test_noop_delta_skips_both_writes() {
        let (_dir, _store, workers, miners) = fixture().await;

        miners
            .get_or_create("zil1abc", "rig0", MinerPatch::default())
            .await
            .unwrap();

        workers
            .increment_stats(
                "zil1abc",
                "rig0",
                StatDelta {
                    submitted: 0,
                    failed: -1,
                    finished: -2,
                    verified: 0,
                },
            )
            .await
            .unwrap();

        let worker = workers.get("zil1abc", "rig0").await.unwrap().unwrap();
        assert_eq!(worker.stats.submitted, 0);
        let miner = miners.get("zil1abc").await.unwrap().unwrap();
        assert_eq!(miner.stats.submitted, 0);
    }

    #[tokio::test]
    async fn test_active_count_window() {
        let (_dir, store, workers, _miners) = fixture().await;

        let now = unix_timestamp();
        let two_hours_ago = now - 2 * 3600;
        let four_hours_ago = now - 4 * 3600;

        for (worker, timestamp) in [
            ("recent", two_hours_ago),
            ("recent", two_hours_ago + 60),
            ("stale", four_hours_ago),
        ] {
            store
                .insert_sample(&HashrateSample {
                    account: "zil1abc".to_string(),
                    worker_name: worker.to_string(),
                    hashrate: 100.0,
                    timestamp,
                })
                .await
                .unwrap();
        }

        // 2h-old samples inside the 3h window, 4h-old outside; the worker
        // with two samples counts once
        let active = workers.active_count(ACTIVE_WORKER_LOOKBACK).await.unwrap();
        assert_eq!(active, 1);

        let active = workers
            .active_count(Duration::from_secs(5 * 3600))
            .await
            .unwrap();
        assert_eq!(active, 2);
    }
}
