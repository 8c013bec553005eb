//! Turns an identity into the subscriptions it may draw on.

use crate::{
    clock::Clock,
    identity::Identity,
    ledger::RequestLedger,
    plan::Plan,
    source::{PlanSource, SourceError},
    subscription::{Subscription, SubscriptionLimiter},
};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The identity holds no live subscription and no trial is configured.
    #[error("no active subscriptions")]
    NoActiveSubscriptions,

    #[error("plan source '{name}' failed: {error}")]
    Source {
        name: String,
        #[source]
        error: SourceError,
    },
}

/// Plans offered by one source, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SourcePlans {
    pub source: String,
    pub plans: Vec<Plan>,
}

/// Combines plan sources, the trial fallback and the shared ledger.
///
/// Sources are queried concurrently; their subscriptions are concatenated in the order
/// the sources were registered, which is also the order the limiter tries them.
/// Subscriptions are kept only while `expires_at` lies ahead of the clock. A plan's own
/// `is_active` flag is not consulted here: deactivating a plan stops new sales, not
/// subscriptions already paid for.
#[derive(Clone)]
pub struct SubscriptionResolver {
    sources: Vec<Arc<dyn PlanSource>>,
    ledger: Arc<dyn RequestLedger>,
    clock: Arc<dyn Clock>,
    trial: Option<Plan>,
}

impl std::fmt::Debug for SubscriptionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("SubscriptionResolver")
            .field("sources", &names)
            .field("trial", &self.trial)
            .finish_non_exhaustive()
    }
}

impl SubscriptionResolver {
    #[must_use]
    pub fn new(ledger: Arc<dyn RequestLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { sources: Vec::new(), ledger, clock, trial: None }
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn PlanSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Plan granted to identities without any live subscription.
    #[must_use]
    pub fn with_trial(mut self, trial: Option<Plan>) -> Self {
        self.trial = trial;
        self
    }

    #[must_use]
    pub fn trial(&self) -> Option<&Plan> {
        self.trial.as_ref()
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn RequestLedger> {
        &self.ledger
    }

    /// Live subscriptions for `user`, or the trial when there are none.
    ///
    /// # Errors
    /// - [`ResolveError::Source`] if any source fails; a failure never reads as "no
    ///   subscription"
    /// - [`ResolveError::NoActiveSubscriptions`] if nothing is live and no trial is set
    pub async fn resolve(&self, user: &Identity) -> Result<Vec<Subscription>, ResolveError> {
        let lookups = self.sources.iter().map(|source| async move {
            source.active_subscriptions_for(user).await.map_err(|error| {
                tracing::warn!(
                    source = source.name(),
                    user = %user,
                    error = %error,
                    "plan source failed"
                );
                ResolveError::Source { name: source.name().to_string(), error }
            })
        });
        let per_source = try_join_all(lookups).await?;

        let now = self.clock.now();
        let subscriptions: Vec<Subscription> = per_source
            .into_iter()
            .flatten()
            .filter(|active| active.is_live_at(now))
            .map(|active| Subscription::new(*user, active.plan, self.ledger.clone()))
            .collect();

        if !subscriptions.is_empty() {
            tracing::debug!(user = %user, count = subscriptions.len(), "resolved subscriptions");
            return Ok(subscriptions);
        }

        match &self.trial {
            Some(trial) => {
                tracing::debug!(user = %user, "no live subscriptions, using trial");
                Ok(vec![Subscription::new(*user, trial.clone(), self.ledger.clone())])
            }
            None => Err(ResolveError::NoActiveSubscriptions),
        }
    }

    /// A limiter over the resolved subscriptions of `user`.
    ///
    /// # Errors
    /// Same as [`SubscriptionResolver::resolve`].
    pub async fn limiter_for(&self, user: &Identity) -> Result<SubscriptionLimiter, ResolveError> {
        Ok(SubscriptionLimiter::new(self.resolve(user).await?))
    }

    /// Active plans of every source, in registration order.
    ///
    /// # Errors
    /// Returns [`ResolveError::Source`] if any source fails.
    pub async fn list_plans(&self) -> Result<Vec<SourcePlans>, ResolveError> {
        let lookups = self.sources.iter().map(|source| async move {
            let plans = source.list_active_plans().await.map_err(|error| {
                ResolveError::Source { name: source.name().to_string(), error }
            })?;
            Ok::<_, ResolveError>(SourcePlans { source: source.name().to_string(), plans })
        });
        try_join_all(lookups).await
    }
}
