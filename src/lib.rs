//! Mining-pool telemetry: hashrate samples, work counters, epoch aggregates.
//!
//! This crate tracks periodic hashrate samples submitted by workers, keeps
//! denormalized per-worker and per-miner work counters in sync through a
//! write-time cascade, and computes aggregate hashrate over protocol epochs
//! with a peak-per-worker-then-sum reduction.
//!
//! All shared state lives in a [`store::SampleStore`]; the registries and
//! query components are cheap handles over it and are safe to call from many
//! concurrent tasks.

pub mod config;
pub mod epoch;
pub mod error;
pub mod ingest;
pub mod miners;
pub mod store;
pub mod types;
pub mod workers;

pub use config::{Telemetry, TelemetryConfig};
pub use epoch::{EpochAggregator, EpochSchedule, EpochWindow, WindowResolver};
pub use error::{Result, TelemetryError};
pub use ingest::SampleIngester;
pub use miners::MinerRegistry;
pub use store::{SampleStore, SqliteStore};
pub use types::{unix_timestamp, HashrateSample, Miner, MinerPatch, Scope, StatDelta, WorkStats, Worker};
pub use workers::{WorkerRegistry, ACTIVE_WORKER_LOOKBACK};
