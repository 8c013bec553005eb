use super::{window::duration_millis, window::WindowSet, LedgerError, RequestLedger, UserLocks};
use crate::{clock::Clock, identity::Identity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::sync::OwnedMutexGuard;

const SCHEMA: [&str; 3] = [
    r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        address TEXT NOT NULL UNIQUE
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS user_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        timestamp_ms INTEGER NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_user_requests_user_time
        ON user_requests (user_id, timestamp_ms)
    ",
];

/// Ledger persisted in `SQLite`.
///
/// Users are keyed by their lowercase address; each granted request is one row in
/// `user_requests` holding a millisecond timestamp read from the injected [`Clock`].
pub struct SqliteLedger {
    pool: Pool<Sqlite>,
    windows: WindowSet,
    clock: Arc<dyn Clock>,
    locks: Option<UserLocks>,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("windows", &self.windows)
            .field("strict_admission", &self.locks.is_some())
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Connects to `database_url`, creating the file and schema if missing.
    ///
    /// In-memory URLs are pinned to one long-lived connection so every query sees the
    /// same database.
    ///
    /// # Errors
    /// Returns `LedgerError::DatabaseError` if the connection or schema setup fails.
    pub async fn connect(database_url: &str, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let ledger =
            Self { pool, windows: WindowSet::default(), clock, locks: Some(UserLocks::new()) };
        ledger.migrate().await?;

        tracing::debug!(database_url, "sqlite ledger ready");
        Ok(ledger)
    }

    #[must_use]
    pub fn with_windows(mut self, windows: WindowSet) -> Self {
        self.windows = windows;
        self
    }

    #[must_use]
    pub fn with_strict_admission(mut self, strict: bool) -> Self {
        self.locks = strict.then(UserLocks::new);
        self
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn horizon_millis(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(duration_millis(self.windows.max_duration()))
    }

    /// Deletes stale entries for every user. Returns how many rows were removed.
    ///
    /// # Errors
    /// Returns `LedgerError::DatabaseError` if the delete fails.
    pub async fn evict_all_stale(&self) -> Result<u64, LedgerError> {
        let horizon = self.horizon_millis(self.now_millis());
        let result = sqlx::query("DELETE FROM user_requests WHERE timestamp_ms <= ?")
            .bind(horizon)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Addresses of every user that has ever been recorded.
    ///
    /// # Errors
    /// Returns `LedgerError::DatabaseError` if the query fails or a stored address is
    /// not a valid identity.
    pub async fn users(&self) -> Result<Vec<Identity>, LedgerError> {
        let rows =
            sqlx::query("SELECT address FROM users ORDER BY id").fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let address: String = row.try_get("address")?;
                Identity::parse(&address)
                    .map_err(|e| LedgerError::DatabaseError(format!("stored address: {e}")))
            })
            .collect()
    }

    async fn evict(&self, user: &Identity, now_ms: i64) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r"
            DELETE FROM user_requests
            WHERE timestamp_ms <= ?
              AND user_id IN (SELECT id FROM users WHERE address = ?)
            ",
        )
        .bind(self.horizon_millis(now_ms))
        .bind(user.as_key())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait]
impl RequestLedger for SqliteLedger {
    fn windows(&self) -> &WindowSet {
        &self.windows
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn count_in_window(&self, user: &Identity, window: Duration) -> Result<u64, LedgerError> {
        let now_ms = self.now_millis();
        self.evict(user, now_ms).await?;

        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS count
            FROM user_requests r
            JOIN users u ON u.id = r.user_id
            WHERE u.address = ? AND r.timestamp_ms > ?
            ",
        )
        .bind(user.as_key())
        .bind(now_ms.saturating_sub(duration_millis(window)))
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        u64::try_from(count)
            .map_err(|e| LedgerError::DatabaseError(format!("negative count {count}: {e}")))
    }

    async fn oldest_in_window(
        &self,
        user: &Identity,
        window: Duration,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let start = self.now_millis().saturating_sub(duration_millis(window));
        let row = sqlx::query(
            r"
            SELECT MIN(r.timestamp_ms) AS oldest
            FROM user_requests r
            JOIN users u ON u.id = r.user_id
            WHERE u.address = ? AND r.timestamp_ms > ?
            ",
        )
        .bind(user.as_key())
        .bind(start)
        .fetch_one(&self.pool)
        .await?;

        let oldest: Option<i64> = row.try_get("oldest")?;
        Ok(oldest.and_then(DateTime::from_timestamp_millis))
    }

    async fn record(&self, user: &Identity) -> Result<(), LedgerError> {
        let now_ms = self.now_millis();
        let address = user.as_key();

        // Dropping the transaction before commit rolls it back.
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (address) VALUES (?) ON CONFLICT(address) DO NOTHING")
            .bind(&address)
            .execute(&mut *tx)
            .await?;

        let user_id: i64 = sqlx::query("SELECT id FROM users WHERE address = ?")
            .bind(&address)
            .fetch_one(&mut *tx)
            .await?
            .try_get("id")?;

        sqlx::query("INSERT INTO user_requests (user_id, timestamp_ms) VALUES (?, ?)")
            .bind(user_id)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::trace!(user = %user, user_id, timestamp_ms = now_ms, "recorded request");
        Ok(())
    }

    async fn evict_stale(&self, user: &Identity) -> Result<u64, LedgerError> {
        self.evict(user, self.now_millis()).await
    }

    async fn admission_guard(&self, user: &Identity) -> Option<OwnedMutexGuard<()>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(user).await),
            None => None,
        }
    }
}
