//! Configuration and wiring for the telemetry components.

use crate::epoch::{EpochAggregator, EpochSchedule};
use crate::error::Result;
use crate::ingest::SampleIngester;
use crate::miners::MinerRegistry;
use crate::store::SqliteStore;
use crate::workers::WorkerRegistry;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Telemetry configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub epochs: EpochConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path of the SQLite database file
    pub db_path: Option<String>,

    /// Lookback window for the active-worker count, in seconds
    pub active_lookback_secs: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Some("telemetry.db".to_string()),
            active_lookback_secs: Some(3 * 3600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpochConfig {
    /// Unix timestamp at which epoch 0 starts
    pub genesis: Option<u64>,

    /// Fixed epoch length in seconds
    pub epoch_seconds: Option<u64>,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            genesis: Some(0),
            epoch_seconds: Some(3600),
        }
    }
}

impl TelemetryConfig {
    pub fn from_toml(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn db_path(&self) -> String {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| "telemetry.db".to_string())
    }

    pub fn active_lookback(&self) -> Duration {
        Duration::from_secs(self.storage.active_lookback_secs.unwrap_or(3 * 3600))
    }

    pub fn epoch_schedule(&self) -> EpochSchedule {
        EpochSchedule::new(
            self.epochs.genesis.unwrap_or(0),
            self.epochs.epoch_seconds.unwrap_or(3600),
        )
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            epochs: EpochConfig::default(),
        }
    }
}

/// The assembled telemetry subsystem: one store, four components over it.
pub struct Telemetry {
    pub miners: MinerRegistry,
    pub workers: WorkerRegistry,
    pub ingester: SampleIngester,
    pub aggregator: EpochAggregator,
    active_lookback: Duration,
}

impl Telemetry {
    /// Open the configured database and wire up all components.
    pub async fn open(config: &TelemetryConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(config.db_path()).await?);
        tracing::info!("Opened telemetry store at {}", config.db_path());

        Ok(Self {
            miners: MinerRegistry::new(store.clone()),
            workers: WorkerRegistry::new(store.clone()),
            ingester: SampleIngester::new(store.clone()),
            aggregator: EpochAggregator::new(store, Arc::new(config.epoch_schedule())),
            active_lookback: config.active_lookback(),
        })
    }

    /// Active-worker count using the configured lookback.
    pub async fn active_workers(&self) -> Result<u64> {
        self.workers.active_count(self.active_lookback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MinerPatch, Scope};
    use tempfile::TempDir;

    #[test]
    fn test_full_config_deserialization() {
        let toml_str = r#"
            [storage]
            db_path = "/var/lib/pool/telemetry.db"
            active_lookback_secs = 7200

            [epochs]
            genesis = 1700000000
            epoch_seconds = 5400
        "#;

        let config = TelemetryConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.db_path(), "/var/lib/pool/telemetry.db");
        assert_eq!(config.active_lookback(), Duration::from_secs(7200));
        assert_eq!(config.epochs.genesis, Some(1700000000));
        assert_eq!(config.epochs.epoch_seconds, Some(5400));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = TelemetryConfig::from_toml("").unwrap();
        assert_eq!(config.db_path(), "telemetry.db");
        assert_eq!(config.active_lookback(), Duration::from_secs(3 * 3600));

        let schedule = config.epoch_schedule();
        assert_eq!(schedule.epoch_at(3600), Some(1));
    }

    #[tokio::test]
    async fn test_open_wires_components() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("telemetry.db");

        let config = TelemetryConfig::from_toml(&format!(
            "[storage]\ndb_path = \"{}\"\n",
            db_path.display()
        ))
        .unwrap();

        let telemetry = Telemetry::open(&config).await.unwrap();

        telemetry
            .miners
            .get_or_create("zil1abc", "rig0", MinerPatch::default())
            .await
            .unwrap();
        assert!(telemetry
            .ingester
            .record(1200.0, "zil1abc", "rig0")
            .await
            .unwrap());

        assert_eq!(telemetry.active_workers().await.unwrap(), 1);

        let total = telemetry
            .aggregator
            .epoch_hashrate(None, Scope::miner("zil1abc"))
            .await
            .unwrap();
        assert_eq!(total, 1200.0);
    }
}
