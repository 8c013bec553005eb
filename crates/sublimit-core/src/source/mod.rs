//! Where plans and subscription expiries come from.
//!
//! A [`PlanSource`] answers two questions: which plans exist, and which of them a given
//! identity currently holds along with their expiry. The core never interprets a source
//! failure as "no subscription"; errors propagate as [`SourceError`] so the gateway can
//! answer 503 instead of quietly downgrading a paying user to the trial.

pub mod cached;
pub mod contract;
pub mod static_source;

use crate::{
    identity::Identity,
    plan::{Plan, PlanError},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use cached::{CacheSettings, CachedPlanSource};
pub use contract::{ContractReader, SubscriberContract};
pub use static_source::{StaticPlanSource, StaticSourceConfig, SubscriptionDefinition};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The backing service could not be reached or answered with an error.
    #[error("plan source unavailable: {0}")]
    Unavailable(String),

    /// The backing service answered with data that does not decode.
    #[error("invalid plan source response: {0}")]
    Decode(String),

    #[error("plan {id} is invalid: {source}")]
    InvalidPlan { id: String, source: PlanError },

    #[error("configuration error: {0}")]
    Config(String),
}

/// A plan held by one identity until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub plan: Plan,
    pub expires_at: DateTime<Utc>,
}

impl ActiveSubscription {
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait PlanSource: Send + Sync {
    /// Label used in logs and error messages.
    fn name(&self) -> &str;

    /// Every plan currently offered by this source.
    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError>;

    /// Plans `user` holds with their expiry. May include expired entries; callers only
    /// trust entries whose `expires_at` lies in the future.
    async fn active_subscriptions_for(
        &self,
        user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError>;
}

#[async_trait]
impl<S: PlanSource + ?Sized> PlanSource for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError> {
        (**self).list_active_plans().await
    }

    async fn active_subscriptions_for(
        &self,
        user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError> {
        (**self).active_subscriptions_for(user).await
    }
}
