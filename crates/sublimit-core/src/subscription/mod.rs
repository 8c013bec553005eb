//! One user bound to one plan.

pub mod limiter;

use crate::{
    identity::Identity,
    ledger::{LedgerError, RequestLedger},
    metrics::{record_admission, AdmissionOutcome},
    plan::Plan,
};
use std::{fmt, sync::Arc, time::Duration};

pub use limiter::{Grant, LimitError, SubscriptionLimiter};

/// Outcome of [`Subscription::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was recorded against the user.
    Admitted,
    /// Nothing was recorded; room frees up after `retry_after`.
    Throttled { retry_after: Duration },
}

impl Admission {
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// A user's entitlement under a single plan.
///
/// Holds no history of its own: counts come from the shared ledger, keyed by the user
/// alone, so every subscription of one user draws on the same usage. Built per
/// authorization check and dropped afterwards.
#[derive(Clone)]
pub struct Subscription {
    user: Identity,
    plan: Plan,
    ledger: Arc<dyn RequestLedger>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("user", &self.user)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    #[must_use]
    pub fn new(user: Identity, plan: Plan, ledger: Arc<dyn RequestLedger>) -> Self {
        Self { user, plan, ledger }
    }

    #[must_use]
    pub fn user(&self) -> &Identity {
        &self.user
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// # Errors
    /// Returns [`LedgerError`] if the ledger cannot be queried.
    pub async fn is_within_limits(&self) -> Result<bool, LedgerError> {
        self.ledger.is_within_limits(&self.user, &self.plan).await
    }

    /// # Errors
    /// Returns [`LedgerError`] if the ledger cannot be queried.
    pub async fn time_until_free(&self) -> Result<Duration, LedgerError> {
        self.ledger.time_until_free(&self.user, &self.plan).await
    }

    /// Records one request if both windows have room.
    ///
    /// This is the only path that writes to the ledger. With strict admission the
    /// check and the write happen under the user's admission guard.
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the ledger cannot be queried or written.
    pub async fn try_admit(&self) -> Result<Admission, LedgerError> {
        let _guard = self.ledger.admission_guard(&self.user).await;

        if self.ledger.is_within_limits(&self.user, &self.plan).await? {
            self.ledger.record(&self.user).await?;
            record_admission(AdmissionOutcome::Admitted);
            tracing::debug!(user = %self.user, plan = %self.plan, "admitted");
            return Ok(Admission::Admitted);
        }

        let retry_after = self.ledger.time_until_free(&self.user, &self.plan).await?;
        record_admission(AdmissionOutcome::Throttled);
        tracing::debug!(
            user = %self.user,
            plan = %self.plan,
            retry_after_ms = retry_after.as_millis(),
            "throttled"
        );
        Ok(Admission::Throttled { retry_after })
    }
}
