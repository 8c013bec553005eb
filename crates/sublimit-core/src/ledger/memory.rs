use super::{window::duration_millis, window::WindowSet, LedgerError, RequestLedger, UserLocks};
use crate::{
    clock::{system_clock, Clock},
    identity::Identity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::OwnedMutexGuard;

/// In-process ledger holding per-user timestamp queues.
///
/// Entries live only as long as the process. Each user's queue is guarded by its
/// `DashMap` shard, so `record` calls for one user are serialized.
#[derive(Debug)]
pub struct MemoryLedger {
    entries: DashMap<Identity, VecDeque<i64>>,
    windows: WindowSet,
    clock: Arc<dyn Clock>,
    locks: Option<UserLocks>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl MemoryLedger {
    /// Creates a ledger with the default minute and day windows and strict admission.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            windows: WindowSet::default(),
            clock,
            locks: Some(UserLocks::new()),
        }
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

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Drops entries outside the retention horizon. Returns how many were removed.
    fn evict(&self, user: &Identity, now_ms: i64) -> u64 {
        let horizon = now_ms.saturating_sub(duration_millis(self.windows.max_duration()));
        let mut removed = 0;

        if let Some(mut queue) = self.entries.get_mut(user) {
            let before = queue.len();
            queue.retain(|&t| t > horizon);
            removed = before - queue.len();
        }

        self.entries.remove_if(user, |_, queue| queue.is_empty());
        removed as u64
    }

    /// Total entries retained across all users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RequestLedger for MemoryLedger {
    fn windows(&self) -> &WindowSet {
        &self.windows
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn count_in_window(&self, user: &Identity, window: Duration) -> Result<u64, LedgerError> {
        let now_ms = self.now_millis();
        self.evict(user, now_ms);

        let start = now_ms.saturating_sub(duration_millis(window));
        let count = self
            .entries
            .get(user)
            .map_or(0, |queue| queue.iter().filter(|&&t| t > start).count());

        Ok(count as u64)
    }

    async fn oldest_in_window(
        &self,
        user: &Identity,
        window: Duration,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let start = self.now_millis().saturating_sub(duration_millis(window));
        let oldest = self
            .entries
            .get(user)
            .and_then(|queue| queue.iter().copied().filter(|&t| t > start).min());

        Ok(oldest.and_then(DateTime::from_timestamp_millis))
    }

    async fn record(&self, user: &Identity) -> Result<(), LedgerError> {
        let now_ms = self.now_millis();
        self.entries.entry(*user).or_default().push_back(now_ms);
        tracing::trace!(user = %user, timestamp_ms = now_ms, "recorded request");
        Ok(())
    }

    async fn evict_stale(&self, user: &Identity) -> Result<u64, LedgerError> {
        Ok(self.evict(user, self.now_millis()))
    }

    async fn admission_guard(&self, user: &Identity) -> Option<OwnedMutexGuard<()>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(user).await),
            None => None,
        }
    }
}
