//! Miner accounts and their aggregate work counters.

use crate::error::{Result, TelemetryError};
use crate::store::SampleStore;
use crate::types::{unix_timestamp, Miner, MinerPatch, StatDelta, Worker};
use crate::workers::WorkerRegistry;
use std::sync::Arc;

/// Registry of miner accounts.
///
/// A cheap handle over the shared store; clone or rebuild freely per task.
#[derive(Clone)]
pub struct MinerRegistry {
    store: Arc<dyn SampleStore>,
}

impl MinerRegistry {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// Insert-or-fetch the miner for `account`, registering `worker_name`
    /// under it.
    ///
    /// The worker is created first; if that write fails, no miner state is
    /// touched. Present patch fields are last-writer-wins, absent fields are
    /// left as stored. The join timestamp is stamped only on first creation.
    pub async fn get_or_create(
        &self,
        account: &str,
        worker_name: &str,
        patch: MinerPatch,
    ) -> Result<Miner> {
        WorkerRegistry::new(Arc::clone(&self.store))
            .get_or_create(account, worker_name)
            .await?;

        let miner = self
            .store
            .upsert_miner(account, &patch, unix_timestamp())
            .await?;
        tracing::debug!("Registered miner {} worker {}", account, worker_name);

        if miner.worker_names.iter().any(|n| n == worker_name) {
            Ok(miner)
        } else {
            self.store.append_worker_name(account, worker_name).await
        }
    }

    /// Point lookup by account.
    pub async fn get(&self, account: &str) -> Result<Option<Miner>> {
        self.store.get_miner(account).await
    }

    /// Apply a stat increment to the miner's aggregate counters.
    ///
    /// Non-positive delta fields are ignored; an entirely non-positive delta
    /// is a no-op. Counters are added atomically at the store.
    pub async fn increment_stats(&self, account: &str, delta: StatDelta) -> Result<()> {
        let delta = delta.sanitized();
        if delta.is_noop() {
            return Ok(());
        }

        if self.store.increment_miner_stats(account, &delta).await? {
            Ok(())
        } else {
            Err(TelemetryError::NotFound(format!("miner {account}")))
        }
    }

    /// All workers registered under `account`.
    pub async fn workers_of(&self, account: &str) -> Result<Vec<Worker>> {
        self.store.workers_of(account).await
    }
}
