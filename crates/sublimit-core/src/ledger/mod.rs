//! Durable per-user request log backing every window count.
//!
//! The ledger records one entry per granted request, keyed by [`Identity`] rather than
//! by plan, so usage is shared across all of a user's subscriptions. Window queries are
//! answered from the entries themselves; there are no counters to reset.
//!
//! # Engines
//!
//! - [`SqliteLedger`](sqlite::SqliteLedger): `users` and `user_requests` tables via sqlx
//! - [`MemoryLedger`](memory::MemoryLedger): a [`DashMap`](dashmap::DashMap) of per-user
//!   timestamp queues
//!
//! Both implement [`RequestLedger`]; the window arithmetic ([`RequestLedger::time_until_free`],
//! [`RequestLedger::is_within_limits`]) lives in the trait's provided methods so the
//! engines only answer primitive count and oldest-entry queries.
//!
//! # Eviction
//!
//! Entries older than the longest configured window are stale for every window. They are
//! deleted lazily by [`RequestLedger::count_in_window`] before it counts, so a user's
//! storage stays bounded without a background sweep.
//!
//! # Admission Races
//!
//! Checking limits and recording are separate calls. Without coordination, concurrent
//! requests from one user can each pass the check before either records, overshooting the
//! cap by at most one grant per racing request. With `strict_admission` enabled the
//! engines hand out a per-user guard ([`RequestLedger::admission_guard`]) that
//! [`crate::subscription::Subscription::try_admit`] holds across check and record, which
//! serializes one user's admissions without touching other users.

pub mod memory;
pub mod sqlite;
pub mod window;

use crate::{
    clock::Clock,
    config::{LedgerBackend, LedgerConfig},
    identity::Identity,
    plan::Plan,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use window::{duration_millis, WindowSet};

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Ledger configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::DatabaseError(err.to_string())
    }
}

/// Per-user usage across every configured window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUsage {
    pub window: &'static str,
    pub duration: Duration,
    pub count: u64,
}

#[async_trait]
pub trait RequestLedger: Send + Sync {
    /// The windows this ledger retains entries for.
    fn windows(&self) -> &WindowSet;

    /// Current time as seen by the ledger.
    fn now(&self) -> DateTime<Utc>;

    /// Number of entries for `user` with `now - t < window`.
    ///
    /// Evicts entries older than the longest configured window first.
    async fn count_in_window(&self, user: &Identity, window: Duration)
        -> Result<u64, LedgerError>;

    /// Timestamp of the oldest entry with `now - t < window`, if any.
    async fn oldest_in_window(
        &self,
        user: &Identity,
        window: Duration,
    ) -> Result<Option<DateTime<Utc>>, LedgerError>;

    /// Appends one entry for `user` at the current time.
    ///
    /// A single atomic insert; an abandoned call never leaves a partial write.
    async fn record(&self, user: &Identity) -> Result<(), LedgerError>;

    /// Deletes entries for `user` that are outside every window. Returns how many.
    async fn evict_stale(&self, user: &Identity) -> Result<u64, LedgerError>;

    /// Serializes admissions for one user when strict admission is enabled.
    ///
    /// Returns `None` when the engine tolerates the documented overshoot.
    async fn admission_guard(&self, user: &Identity) -> Option<OwnedMutexGuard<()>>;

    /// Both of `plan`'s window caps still have room.
    async fn is_within_limits(&self, user: &Identity, plan: &Plan) -> Result<bool, LedgerError> {
        for limit in plan.limits() {
            if self.count_in_window(user, limit.window.duration).await? >= limit.cap {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// How long until every window of `plan` has room again.
    ///
    /// Windows below cap contribute zero; a saturated window contributes the time until
    /// its oldest entry ages out. The result is the maximum, clamped to zero.
    async fn time_until_free(&self, user: &Identity, plan: &Plan) -> Result<Duration, LedgerError> {
        let now = self.now();
        let mut wait_ms: i64 = 0;

        for limit in plan.limits() {
            let window = limit.window.duration;
            if self.count_in_window(user, window).await? < limit.cap {
                continue;
            }

            let Some(oldest) = self.oldest_in_window(user, window).await? else {
                continue;
            };

            let age_ms = (now - oldest).num_milliseconds();
            wait_ms = wait_ms.max(duration_millis(window).saturating_sub(age_ms));
        }

        Ok(Duration::from_millis(u64::try_from(wait_ms).unwrap_or(0)))
    }

    /// Counts for every configured window, for reporting.
    async fn usage(&self, user: &Identity) -> Result<Vec<WindowUsage>, LedgerError> {
        let mut usage = Vec::with_capacity(self.windows().windows().len());
        for window in self.windows().windows() {
            usage.push(WindowUsage {
                window: window.name,
                duration: window.duration,
                count: self.count_in_window(user, window.duration).await?,
            });
        }
        Ok(usage)
    }
}

/// Opens the ledger engine selected by `config`.
///
/// # Errors
/// Returns [`LedgerError`] if the `SQLite` database cannot be opened or migrated.
pub async fn open(
    config: &LedgerConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RequestLedger>, LedgerError> {
    let ledger: Arc<dyn RequestLedger> = match config.backend {
        LedgerBackend::Sqlite => Arc::new(
            SqliteLedger::connect(&config.database_url, clock)
                .await?
                .with_strict_admission(config.strict_admission),
        ),
        LedgerBackend::Memory => {
            Arc::new(MemoryLedger::new(clock).with_strict_admission(config.strict_admission))
        }
    };

    tracing::info!(
        backend = ?config.backend,
        strict_admission = config.strict_admission,
        "request ledger opened"
    );
    Ok(ledger)
}

/// Per-user admission locks.
///
/// Locks are created on first use and dropped once no task holds or awaits them, so the
/// map tracks only users with admissions in flight.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<Identity, Arc<Mutex<()>>>,
}

impl UserLocks {
    const PRUNE_THRESHOLD: usize = 1024;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive admission rights for `user`.
    pub async fn acquire(&self, user: &Identity) -> OwnedMutexGuard<()> {
        if self.locks.len() >= Self::PRUNE_THRESHOLD {
            self.prune();
        }

        let lock = self.locks.entry(*user).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
