use super::{Admission, Subscription};
use crate::{identity::Identity, ledger::LedgerError, plan::Plan};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("no subscriptions to check")]
    NoCandidates,

    #[error("too many requests, retry in {}s", .retry_after.as_secs_f64().ceil())]
    TooManyRequests { retry_after: Duration },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Admission passes run while the computed wait is zero.
pub const ADMISSION_PASSES: u32 = 3;

/// Smallest wait a refusal reports.
pub const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// The subscription that admitted a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub user: Identity,
    pub plan: Plan,
}

/// Arbitrates one request across a user's candidate subscriptions.
///
/// Candidates are tried in order and the first one with room records the request, so a
/// request is charged exactly once. When none has room the error carries the shortest
/// wait among them.
#[derive(Debug)]
pub struct SubscriptionLimiter {
    candidates: Vec<Subscription>,
}

impl SubscriptionLimiter {
    #[must_use]
    pub fn new(candidates: Vec<Subscription>) -> Self {
        Self { candidates }
    }

    #[must_use]
    pub fn candidates(&self) -> &[Subscription] {
        &self.candidates
    }

    /// Admits the request on the first candidate with room.
    ///
    /// A minimum wait of zero means a window freed up between the check and the wait
    /// computation, so admission is retried (at most [`ADMISSION_PASSES`] passes in total).
    /// A refusal never carries a zero wait; one that stays zero is reported as
    /// [`MIN_RETRY_AFTER`].
    ///
    /// # Errors
    /// - [`LimitError::NoCandidates`] if there is nothing to check
    /// - [`LimitError::TooManyRequests`] if every candidate is saturated
    /// - [`LimitError::Ledger`] if the ledger fails
    pub async fn check(&self) -> Result<Grant, LimitError> {
        if self.candidates.is_empty() {
            return Err(LimitError::NoCandidates);
        }

        let mut retry_after = Duration::ZERO;
        for pass in 1..=ADMISSION_PASSES {
            retry_after = match self.admission_pass().await? {
                Ok(grant) => return Ok(grant),
                Err(wait) => wait,
            };
            if !retry_after.is_zero() {
                break;
            }
            tracing::debug!(pass, "minimum wait is zero, retrying admission");
        }

        if retry_after.is_zero() {
            retry_after = MIN_RETRY_AFTER;
        }
        Err(LimitError::TooManyRequests { retry_after })
    }

    /// One pass over the candidates. Yields the grant, or the minimum wait if none admits.
    async fn admission_pass(&self) -> Result<Result<Grant, Duration>, LedgerError> {
        let mut min_wait: Option<Duration> = None;

        for candidate in &self.candidates {
            match candidate.try_admit().await? {
                Admission::Admitted => {
                    return Ok(Ok(Grant {
                        user: *candidate.user(),
                        plan: candidate.plan().clone(),
                    }));
                }
                Admission::Throttled { retry_after } => {
                    min_wait = Some(min_wait.map_or(retry_after, |m| m.min(retry_after)));
                }
            }
        }

        Ok(Err(min_wait.unwrap_or_default()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        ledger::{window::WindowSet, MemoryLedger, RequestLedger},
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use tokio::sync::OwnedMutexGuard;

    /// Always full, yet never has an entry to age out, so every wait computes to zero.
    struct SaturatedLedger {
        windows: WindowSet,
        clock: ManualClock,
        records: AtomicU32,
    }

    #[async_trait]
    impl RequestLedger for SaturatedLedger {
        fn windows(&self) -> &WindowSet {
            &self.windows
        }

        fn now(&self) -> DateTime<Utc> {
            crate::clock::Clock::now(&self.clock)
        }

        async fn count_in_window(&self, _: &Identity, _: Duration) -> Result<u64, LedgerError> {
            Ok(u64::MAX)
        }

        async fn oldest_in_window(
            &self,
            _: &Identity,
            _: Duration,
        ) -> Result<Option<DateTime<Utc>>, LedgerError> {
            Ok(None)
        }

        async fn record(&self, _: &Identity) -> Result<(), LedgerError> {
            self.records.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn evict_stale(&self, _: &Identity) -> Result<u64, LedgerError> {
            Ok(0)
        }

        async fn admission_guard(&self, _: &Identity) -> Option<OwnedMutexGuard<()>> {
            None
        }
    }

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        clock: ManualClock,
        user: Identity,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::starting_now();
            let ledger = Arc::new(MemoryLedger::new(Arc::new(clock.clone())));
            Self { ledger, clock, user: Identity::from_bytes([3; 20]) }
        }

        fn subscription(&self, name: &str, rpm: u64) -> Subscription {
            let plan = Plan::with_minute_rate(Some(name.to_string()), 0, rpm, true).unwrap();
            Subscription::new(self.user, plan, self.ledger.clone())
        }
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let limiter = SubscriptionLimiter::new(vec![]);
        assert!(matches!(limiter.check().await, Err(LimitError::NoCandidates)));
    }

    #[tokio::test]
    async fn test_first_admitting_candidate_wins() {
        let fx = Fixture::new();
        let limiter = SubscriptionLimiter::new(vec![
            fx.subscription("small", 1),
            fx.subscription("large", 100),
        ]);

        let first = limiter.check().await.unwrap();
        assert_eq!(first.plan.name(), Some("small"));

        let second = limiter.check().await.unwrap();
        assert_eq!(second.plan.name(), Some("large"));
        assert_eq!(second.user, fx.user);
    }

    #[tokio::test]
    async fn test_usage_shared_across_subscriptions() {
        let fx = Fixture::new();
        let limiter = SubscriptionLimiter::new(vec![
            fx.subscription("small", 1),
            fx.subscription("large", 100),
        ]);

        for _ in 0..100 {
            limiter.check().await.unwrap();
        }

        assert!(matches!(
            limiter.check().await,
            Err(LimitError::TooManyRequests { .. })
        ));
        let used = fx.ledger.count_in_window(&fx.user, Duration::from_secs(60)).await.unwrap();
        assert_eq!(used, 100);
    }

    #[tokio::test]
    async fn test_reports_minimum_wait() {
        let fx = Fixture::new();
        let minute = fx.subscription("minute", 1);
        let limiter = SubscriptionLimiter::new(vec![minute.clone()]);

        limiter.check().await.unwrap();
        fx.clock.advance(Duration::from_secs(20));

        match limiter.check().await {
            Err(LimitError::TooManyRequests { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected TooManyRequests, got {other:?}"),
        }

        // A second, daily-saturated plan waits longer; the minimum is still reported.
        let daily = Subscription::new(
            fx.user,
            Plan::new(Some("daily".into()), 0, 5, 1, true).unwrap(),
            fx.ledger.clone(),
        );
        let limiter = SubscriptionLimiter::new(vec![daily, minute]);
        match limiter.check().await {
            Err(LimitError::TooManyRequests { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected TooManyRequests, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_grant_after_wait_elapses() {
        let fx = Fixture::new();
        let limiter = SubscriptionLimiter::new(vec![fx.subscription("basic", 2)]);

        limiter.check().await.unwrap();
        limiter.check().await.unwrap();
        let Err(LimitError::TooManyRequests { retry_after }) = limiter.check().await else {
            panic!("third request should be refused");
        };

        fx.clock.advance(retry_after);
        assert!(limiter.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_wait_is_never_reported() {
        let ledger = Arc::new(SaturatedLedger {
            windows: WindowSet::default(),
            clock: ManualClock::starting_now(),
            records: AtomicU32::new(0),
        });
        let plan = Plan::with_minute_rate(Some("full".into()), 0, 1, true).unwrap();
        let limiter = SubscriptionLimiter::new(vec![Subscription::new(
            Identity::from_bytes([9; 20]),
            plan,
            ledger.clone(),
        )]);

        match limiter.check().await {
            Err(LimitError::TooManyRequests { retry_after }) => {
                assert_eq!(retry_after, MIN_RETRY_AFTER);
            }
            other => panic!("expected TooManyRequests, got {other:?}"),
        }
        assert_eq!(ledger.records.load(Ordering::SeqCst), 0);
    }
}
