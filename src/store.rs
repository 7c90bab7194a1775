//! SQLite-backed document store for miners, workers and hashrate samples.

use crate::epoch::EpochWindow;
use crate::error::{Result, TelemetryError};
use crate::types::{HashrateSample, Miner, MinerPatch, Scope, StatDelta, WorkStats, Worker};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// Document-store contract the telemetry components are written against.
///
/// Upserts and counter increments must be atomic at the store level:
/// concurrent get-or-create calls for one key converge to a single document,
/// and concurrent increments never lose updates. The two aggregation reads
/// are point-in-time with no isolation against concurrent inserts.
#[async_trait::async_trait]
pub trait SampleStore: Send + Sync {
    /// Atomically insert-or-update a miner keyed by account.
    ///
    /// Absent patch fields leave stored values untouched (defaults on first
    /// insert). `joined_at` is stamped with `now` only when unset. Returns
    /// the stored document.
    async fn upsert_miner(&self, account: &str, patch: &MinerPatch, now: u64) -> Result<Miner>;

    /// Add a worker name to a miner's known-name set if missing.
    async fn append_worker_name(&self, account: &str, worker_name: &str) -> Result<Miner>;

    /// Point lookup by account.
    async fn get_miner(&self, account: &str) -> Result<Option<Miner>>;

    /// Atomically add `delta` to a miner's counters.
    ///
    /// Returns false when no miner with that account exists.
    async fn increment_miner_stats(&self, account: &str, delta: &StatDelta) -> Result<bool>;

    /// Atomically insert-or-fetch a worker keyed by (account, name).
    async fn upsert_worker(&self, account: &str, worker_name: &str) -> Result<Worker>;

    /// Point lookup by (account, name).
    async fn get_worker(&self, account: &str, worker_name: &str) -> Result<Option<Worker>>;

    /// All workers registered under an account.
    async fn workers_of(&self, account: &str) -> Result<Vec<Worker>>;

    /// Atomically add `delta` to a worker's counters.
    ///
    /// Returns false when no worker with that key exists.
    async fn increment_worker_stats(
        &self,
        account: &str,
        worker_name: &str,
        delta: &StatDelta,
    ) -> Result<bool>;

    /// Append an immutable hashrate sample.
    async fn insert_sample(&self, sample: &HashrateSample) -> Result<()>;

    /// Two-stage aggregate over samples in `[window.start, window.end)`:
    /// per-(account, worker_name) peak, summed across all groups matching
    /// `scope`. Returns 0.0 when nothing matches.
    async fn peak_hashrate_sum(&self, window: EpochWindow, scope: &Scope) -> Result<f64>;

    /// Count distinct (account, worker_name) pairs with at least one sample
    /// at `timestamp >= cutoff`.
    async fn count_active_workers(&self, cutoff: u64) -> Result<u64>;
}

/// SQLite implementation of [`SampleStore`].
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite database at `db_path`.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directories if they don't exist
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connection_options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        Ok(store)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS miners (
                account TEXT PRIMARY KEY,
                rewards REAL NOT NULL DEFAULT 0,
                paid REAL NOT NULL DEFAULT 0,
                authorized INTEGER NOT NULL DEFAULT 1,
                display_name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                email_verified INTEGER NOT NULL DEFAULT 0,
                joined_at INTEGER NOT NULL DEFAULT 0,
                worker_names TEXT NOT NULL DEFAULT '[]',
                submitted INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                finished INTEGER NOT NULL DEFAULT 0,
                verified INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                account TEXT NOT NULL,
                name TEXT NOT NULL,
                submitted INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                finished INTEGER NOT NULL DEFAULT 0,
                verified INTEGER NOT NULL DEFAULT 0,

                PRIMARY KEY (account, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Samples are append-only; identity is the implicit rowid.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hashrate_samples (
                account TEXT NOT NULL,
                worker_name TEXT NOT NULL,
                hashrate REAL NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the time-range aggregations
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_samples_timestamp
            ON hashrate_samples(timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_samples_worker_timestamp
            ON hashrate_samples(account, worker_name, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn miner_from_row(row: &SqliteRow) -> Result<Miner> {
        let names_json = row.get::<String, _>("worker_names");
        let worker_names: Vec<String> = serde_json::from_str(&names_json).map_err(|e| {
            TelemetryError::InvalidArgument(format!("corrupt worker_names column: {e}"))
        })?;

        Ok(Miner {
            account: row.get::<String, _>("account"),
            rewards: row.get::<f64, _>("rewards"),
            paid: row.get::<f64, _>("paid"),
            authorized: row.get::<i64, _>("authorized") != 0,
            display_name: row.get::<String, _>("display_name"),
            email: row.get::<String, _>("email"),
            email_verified: row.get::<i64, _>("email_verified") != 0,
            joined_at: row.get::<i64, _>("joined_at") as u64,
            worker_names,
            stats: Self::stats_from_row(row),
        })
    }

    fn worker_from_row(row: &SqliteRow) -> Worker {
        Worker {
            account: row.get::<String, _>("account"),
            name: row.get::<String, _>("name"),
            stats: Self::stats_from_row(row),
        }
    }

    fn stats_from_row(row: &SqliteRow) -> WorkStats {
        WorkStats {
            submitted: row.get::<i64, _>("submitted") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            finished: row.get::<i64, _>("finished") as u64,
            verified: row.get::<i64, _>("verified") as u64,
        }
    }
}

#[async_trait::async_trait]
impl SampleStore for SqliteStore {
    async fn upsert_miner(&self, account: &str, patch: &MinerPatch, now: u64) -> Result<Miner> {
        tracing::debug!(
            "Upserting miner: account={}, patch={:?}, now={}",
            account,
            patch,
            now
        );

        sqlx::query(
            r#"
            INSERT INTO miners (account, authorized, display_name, email, joined_at)
            VALUES (?1, COALESCE(?2, 1), COALESCE(?3, ''), COALESCE(?4, ''), ?5)
            ON CONFLICT(account) DO UPDATE SET
                authorized = COALESCE(?2, miners.authorized),
                display_name = COALESCE(?3, miners.display_name),
                email = COALESCE(?4, miners.email),
                joined_at = CASE
                    WHEN miners.joined_at = 0 THEN ?5
                    ELSE miners.joined_at
                END
            "#,
        )
        .bind(account)
        .bind(patch.authorized)
        .bind(patch.display_name.as_deref())
        .bind(patch.email.as_deref())
        .bind(now as i64)
        .execute(&self.pool)
        .await?;

        self.get_miner(account).await?.ok_or_else(|| {
            TelemetryError::NotFound(format!("miner {account} missing after upsert"))
        })
    }

    async fn append_worker_name(&self, account: &str, worker_name: &str) -> Result<Miner> {
        let miner = self
            .get_miner(account)
            .await?
            .ok_or_else(|| TelemetryError::NotFound(format!("miner {account}")))?;

        if miner.worker_names.iter().any(|n| n == worker_name) {
            return Ok(miner);
        }

        let mut worker_names = miner.worker_names;
        worker_names.push(worker_name.to_string());
        let names_json = serde_json::to_string(&worker_names).map_err(|e| {
            TelemetryError::InvalidArgument(format!("unencodable worker name set: {e}"))
        })?;

        sqlx::query("UPDATE miners SET worker_names = ? WHERE account = ?")
            .bind(&names_json)
            .bind(account)
            .execute(&self.pool)
            .await?;

        self.get_miner(account).await?.ok_or_else(|| {
            TelemetryError::NotFound(format!("miner {account} missing after update"))
        })
    }

    async fn get_miner(&self, account: &str) -> Result<Option<Miner>> {
        let row = sqlx::query("SELECT * FROM miners WHERE account = ?")
            .bind(account)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::miner_from_row).transpose()
    }

    async fn increment_miner_stats(&self, account: &str, delta: &StatDelta) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE miners SET
                submitted = submitted + ?,
                failed = failed + ?,
                finished = finished + ?,
                verified = verified + ?
            WHERE account = ?
            "#,
        )
        .bind(delta.submitted)
        .bind(delta.failed)
        .bind(delta.finished)
        .bind(delta.verified)
        .bind(account)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_worker(&self, account: &str, worker_name: &str) -> Result<Worker> {
        sqlx::query(
            r#"
            INSERT INTO workers (account, name)
            VALUES (?, ?)
            ON CONFLICT(account, name) DO NOTHING
            "#,
        )
        .bind(account)
        .bind(worker_name)
        .execute(&self.pool)
        .await?;

        self.get_worker(account, worker_name).await?.ok_or_else(|| {
            TelemetryError::NotFound(format!("worker {worker_name}.{account} missing after upsert"))
        })
    }

    async fn get_worker(&self, account: &str, worker_name: &str) -> Result<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE account = ? AND name = ?")
            .bind(account)
            .bind(worker_name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::worker_from_row))
    }

    async fn workers_of(&self, account: &str) -> Result<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers WHERE account = ? ORDER BY name")
            .bind(account)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::worker_from_row).collect())
    }

    async fn increment_worker_stats(
        &self,
        account: &str,
        worker_name: &str,
        delta: &StatDelta,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET
                submitted = submitted + ?,
                failed = failed + ?,
                finished = finished + ?,
                verified = verified + ?
            WHERE account = ? AND name = ?
            "#,
        )
        .bind(delta.submitted)
        .bind(delta.failed)
        .bind(delta.finished)
        .bind(delta.verified)
        .bind(account)
        .bind(worker_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_sample(&self, sample: &HashrateSample) -> Result<()> {
        tracing::debug!(
            "Storing hashrate sample: account={}, worker={}, hashrate={}, timestamp={}",
            sample.account,
            sample.worker_name,
            sample.hashrate,
            sample.timestamp
        );

        sqlx::query(
            r#"
            INSERT INTO hashrate_samples (account, worker_name, hashrate, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&sample.account)
        .bind(&sample.worker_name)
        .bind(sample.hashrate)
        .bind(sample.timestamp as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn peak_hashrate_sum(&self, window: EpochWindow, scope: &Scope) -> Result<f64> {
        // Stage 1: peak per (account, worker_name) so repeated reports from
        // one worker are not double-counted. Stage 2: sum the peaks.
        let mut sql = String::from(
            "SELECT COALESCE(SUM(peak), 0.0) AS total FROM ( \
             SELECT MAX(hashrate) AS peak FROM hashrate_samples \
             WHERE timestamp >= ? AND timestamp < ?",
        );
        if scope.account.is_some() {
            sql.push_str(" AND account = ?");
        }
        if scope.worker_name.is_some() {
            sql.push_str(" AND worker_name = ?");
        }
        sql.push_str(" GROUP BY account, worker_name)");

        let mut query = sqlx::query(&sql)
            .bind(window.start as i64)
            .bind(window.end as i64);
        if let Some(account) = &scope.account {
            query = query.bind(account);
        }
        if let Some(worker_name) = &scope.worker_name {
            query = query.bind(worker_name);
        }

        let row = query.fetch_one(&self.pool).await?;
        let total = row.get::<f64, _>("total");

        tracing::debug!(
            "Peak-sum aggregate: window=[{}, {}), scope={:?}, total={:.2}H/s",
            window.start,
            window.end,
            scope,
            total
        );

        Ok(total)
    }

    async fn count_active_workers(&self, cutoff: u64) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS active FROM (
                SELECT 1 FROM hashrate_samples
                WHERE timestamp >= ?
                GROUP BY account, worker_name
            )
            "#,
        )
        .bind(cutoff as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("active") as u64)
    }
}
