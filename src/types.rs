//! Domain documents and value types for pool telemetry.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Rollup counters of work handled by a miner or one of its workers.
///
/// Counters only ever grow; decrements are not representable through the
/// public increment paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStats {
    /// Shares submitted by the worker(s)
    pub submitted: u64,

    /// Shares that failed validation
    pub failed: u64,

    /// Work units completed
    pub finished: u64,

    /// Work units verified upstream
    pub verified: u64,
}

/// A signed increment applied to [`WorkStats`].
///
/// Only strictly positive fields take effect; zero and negative fields mean
/// "no change" to that counter, so an increment can add work but never
/// subtract it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDelta {
    pub submitted: i64,
    pub failed: i64,
    pub finished: i64,
    pub verified: i64,
}

impl StatDelta {
    /// A delta incrementing only the submitted counter.
    pub fn submitted(n: i64) -> Self {
        Self {
            submitted: n,
            ..Self::default()
        }
    }

    /// Drop non-positive fields, leaving only the parts that will be applied.
    pub fn sanitized(self) -> Self {
        Self {
            submitted: self.submitted.max(0),
            failed: self.failed.max(0),
            finished: self.finished.max(0),
            verified: self.verified.max(0),
        }
    }

    /// True when no field would change a counter.
    pub fn is_noop(&self) -> bool {
        self.submitted <= 0 && self.failed <= 0 && self.finished <= 0 && self.verified <= 0
    }
}

/// A registered miner account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Miner {
    /// Account address, unique across the pool
    pub account: String,

    /// Cumulative reward credited to the account
    pub rewards: f64,

    /// Cumulative amount paid out
    pub paid: f64,

    /// Whether the account is authorized to submit work
    pub authorized: bool,

    /// Display name chosen by the miner
    pub display_name: String,

    /// Contact email
    pub email: String,

    /// Whether the email was verified
    pub email_verified: bool,

    /// Unix timestamp of first registration; 0 = not yet stamped
    pub joined_at: u64,

    /// Names of all workers ever registered under this account
    pub worker_names: Vec<String>,

    /// Aggregate work counters across all of this miner's workers
    pub stats: WorkStats,
}

/// A single piece of mining hardware, owned by a miner account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Owning account address
    pub account: String,

    /// Worker name, unique per account
    pub name: String,

    /// Work counters scoped to this worker only
    pub stats: WorkStats,
}

/// An immutable, append-only hashrate observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashrateSample {
    pub account: String,
    pub worker_name: String,

    /// Reported hashrate in hashes per second, never negative
    pub hashrate: f64,

    /// Unix timestamp assigned at ingestion time
    pub timestamp: u64,
}

/// Partial update of a miner's profile fields.
///
/// Absent (`None`) fields leave the stored value untouched, so a caller that
/// only wants to refresh the email cannot accidentally blank the display
/// name. On first insert, absent fields fall back to defaults
/// (`authorized = true`, empty strings).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinerPatch {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub authorized: Option<bool>,
}

/// Filter narrowing an aggregation to one account and/or one worker name.
///
/// Both filters are exact-match and independently optional; the empty scope
/// aggregates over the whole pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub account: Option<String>,
    pub worker_name: Option<String>,
}

impl Scope {
    /// The whole pool.
    pub fn global() -> Self {
        Self::default()
    }

    /// All workers of one account.
    pub fn miner(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            worker_name: None,
        }
    }

    /// A single worker.
    pub fn worker(account: impl Into<String>, worker_name: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            worker_name: Some(worker_name.into()),
        }
    }
}

/// Get current Unix timestamp in seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
