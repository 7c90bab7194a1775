//! Epoch window resolution and epoch hashrate aggregation.

use crate::error::Result;
use crate::store::SampleStore;
use crate::types::{unix_timestamp, Scope};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A half-open `[start, end)` time interval over which work is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochWindow {
    /// Unix timestamp, inclusive
    pub start: u64,

    /// Unix timestamp, exclusive
    pub end: u64,
}

/// Resolves a protocol epoch identifier to its time bounds.
///
/// `None` means the presently active epoch. An unknown identifier resolves
/// to `Ok(None)`; only a backend failure is an error.
#[async_trait::async_trait]
pub trait WindowResolver: Send + Sync {
    async fn resolve(&self, epoch: Option<u64>) -> Result<Option<EpochWindow>>;
}

/// Window resolver for a fixed-length epoch schedule.
///
/// Epoch `n` spans `[genesis + n * epoch_seconds, genesis + (n + 1) *
/// epoch_seconds)`. Epochs that have not started yet are unknown.
#[derive(Debug, Clone, Copy)]
pub struct EpochSchedule {
    genesis: u64,
    epoch_seconds: u64,
}

impl EpochSchedule {
    pub fn new(genesis: u64, epoch_seconds: u64) -> Self {
        Self {
            genesis,
            epoch_seconds: epoch_seconds.max(1),
        }
    }

    /// The epoch containing `now`, or `None` before genesis.
    pub fn epoch_at(&self, now: u64) -> Option<u64> {
        now.checked_sub(self.genesis).map(|elapsed| elapsed / self.epoch_seconds)
    }

    fn window_of(&self, epoch: u64) -> Option<EpochWindow> {
        let start = self.genesis.checked_add(epoch.checked_mul(self.epoch_seconds)?)?;
        let end = start.checked_add(self.epoch_seconds)?;
        Some(EpochWindow { start, end })
    }
}

#[async_trait::async_trait]
impl WindowResolver for EpochSchedule {
    async fn resolve(&self, epoch: Option<u64>) -> Result<Option<EpochWindow>> {
        let now = unix_timestamp();

        let epoch = match epoch {
            Some(n) => n,
            None => match self.epoch_at(now) {
                Some(n) => n,
                None => return Ok(None),
            },
        };

        // An epoch that has not started yet is as unknown as a bad id
        Ok(self.window_of(epoch).filter(|w| w.start <= now))
    }
}

/// Computes aggregate hashrate for a scope over an epoch window.
pub struct EpochAggregator {
    store: Arc<dyn SampleStore>,
    resolver: Arc<dyn WindowResolver>,
}

impl EpochAggregator {
    pub fn new(store: Arc<dyn SampleStore>, resolver: Arc<dyn WindowResolver>) -> Self {
        Self { store, resolver }
    }

    /// Total hashrate for `scope` over the given epoch (`None` = current).
    ///
    /// Per-worker peaks within the window are summed across workers, so a
    /// worker re-reporting inside the epoch is counted once at its peak.
    /// An unresolved epoch and a window with no samples both yield 0.0;
    /// store failures propagate as errors.
    pub async fn epoch_hashrate(&self, epoch: Option<u64>, scope: Scope) -> Result<f64> {
        let window = match self.resolver.resolve(epoch).await? {
            Some(window) => window,
            None => {
                tracing::debug!("Epoch {:?} did not resolve to a window", epoch);
                return Ok(0.0);
            }
        };

        self.store.peak_hashrate_sum(window, &scope).await
    }
}
