//! Builders shared by the scenario tests.

#![allow(clippy::expect_used)]

use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use sublimit_core::{
    clock::{Clock, ManualClock},
    config::DEFAULT_SIGNING_MESSAGE,
    identity::Identity,
    ledger::{MemoryLedger, RequestLedger, SqliteLedger},
    plan::Plan,
    source::{ActiveSubscription, PlanSource, SourceError, StaticPlanSource},
};

pub const MESSAGE: &str = DEFAULT_SIGNING_MESSAGE;

/// Ledger engines every scenario runs against.
#[derive(Debug, Clone, Copy)]
pub enum Engine {
    Memory,
    Sqlite,
}

pub const ENGINES: [Engine; 2] = [Engine::Memory, Engine::Sqlite];

pub async fn ledger(engine: Engine, clock: &ManualClock) -> Arc<dyn RequestLedger> {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    match engine {
        Engine::Memory => Arc::new(MemoryLedger::new(clock)),
        Engine::Sqlite => Arc::new(
            SqliteLedger::connect("sqlite::memory:", clock)
                .await
                .expect("in-memory sqlite opens"),
        ),
    }
}

pub fn minute_plan(name: &str, requests_per_minute: u64) -> Plan {
    Plan::with_minute_rate(Some(name.to_string()), 0, requests_per_minute, true)
        .expect("positive rate")
}

/// Wraps a source and counts subscription lookups.
pub struct CountingSource<S> {
    inner: S,
    lookups: AtomicUsize,
}

impl<S> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, lookups: AtomicUsize::new(0) }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: PlanSource> PlanSource for CountingSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError> {
        self.inner.list_active_plans().await
    }

    async fn active_subscriptions_for(
        &self,
        user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.active_subscriptions_for(user).await
    }
}

/// A source whose backing node is unreachable.
pub struct OfflineSource;

#[async_trait]
impl PlanSource for OfflineSource {
    fn name(&self) -> &str {
        "offline"
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError> {
        Err(SourceError::Unavailable("connection refused".into()))
    }

    async fn active_subscriptions_for(
        &self,
        _user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError> {
        Err(SourceError::Unavailable("connection refused".into()))
    }
}

/// A source holding one subscription per `(user, plan)` pair, expiring `days` from now.
pub fn subscribed(
    clock: &ManualClock,
    entries: &[(Identity, Plan)],
    days: i64,
) -> StaticPlanSource {
    let expires_at = clock.now() + chrono::Duration::days(days);
    let plans = entries.iter().map(|(_, plan)| plan.clone()).collect();
    entries.iter().fold(StaticPlanSource::new("contract", plans), |source, (user, plan)| {
        source.with_subscription(*user, plan.clone(), expires_at)
    })
}
