use super::{ActiveSubscription, PlanSource, SourceError};
use crate::{identity::Identity, plan::Plan};
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

/// TTL and size bounds for [`CachedPlanSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    /// Maximum number of identities whose subscriptions are cached.
    pub max_identities: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(300), max_identities: 10_000 }
    }
}

/// Read-through TTL cache in front of a [`PlanSource`].
///
/// Only successful answers are cached. Concurrent misses for the same key share a single
/// upstream call.
pub struct CachedPlanSource<S> {
    inner: S,
    plans: Cache<(), Vec<Plan>>,
    subscriptions: Cache<Identity, Vec<ActiveSubscription>>,
}

impl<S: PlanSource> CachedPlanSource<S> {
    #[must_use]
    pub fn new(inner: S, settings: CacheSettings) -> Self {
        Self {
            inner,
            plans: Cache::builder().max_capacity(1).time_to_live(settings.ttl).build(),
            subscriptions: Cache::builder()
                .max_capacity(settings.max_identities)
                .time_to_live(settings.ttl)
                .build(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drops every cached answer so the next lookup goes upstream.
    pub fn invalidate_all(&self) {
        self.plans.invalidate_all();
        self.subscriptions.invalidate_all();
    }
}

#[async_trait]
impl<S: PlanSource> PlanSource for CachedPlanSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError> {
        self.plans
            .try_get_with((), self.inner.list_active_plans())
            .await
            .map_err(|e| (*e).clone())
    }

    async fn active_subscriptions_for(
        &self,
        user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError> {
        self.subscriptions
            .try_get_with(*user, self.inner.active_subscriptions_for(user))
            .await
            .map_err(|e| (*e).clone())
    }
}
