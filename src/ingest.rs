//! Hashrate sample ingestion.

use crate::error::Result;
use crate::store::SampleStore;
use crate::types::{unix_timestamp, HashrateSample};
use std::sync::Arc;

/// Validates and records incoming hashrate reports.
pub struct SampleIngester {
    store: Arc<dyn SampleStore>,
}

impl SampleIngester {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// Record one hashrate report for (account, worker name).
    ///
    /// Returns `Ok(false)` with nothing written when the hashrate is
    /// negative or not finite, or when no miner exists for `account` —
    /// sampling never creates a miner, so unregistered accounts cannot
    /// inject stats. Workers do auto-provision on first sample, since a
    /// miner may add hardware without a separate registration step. The
    /// stored timestamp is the ingestion time, never caller-supplied.
    /// Store failures propagate as errors, distinct from the routine
    /// rejections.
    pub async fn record(&self, hashrate: f64, account: &str, worker_name: &str) -> Result<bool> {
        if hashrate < 0.0 || !hashrate.is_finite() {
            tracing::debug!(
                "Rejecting sample with invalid hashrate {} from {}.{}",
                hashrate,
                worker_name,
                account
            );
            return Ok(false);
        }

        if self.store.get_miner(account).await?.is_none() {
            tracing::debug!(
                "Rejecting sample from unregistered account {} (worker {})",
                account,
                worker_name
            );
            return Ok(false);
        }

        self.store.upsert_worker(account, worker_name).await?;

        self.store
            .insert_sample(&HashrateSample {
                account: account.to_string(),
                worker_name: worker_name.to_string(),
                hashrate,
                timestamp: unix_timestamp(),
            })
            .await?;

        Ok(true)
    }
}
