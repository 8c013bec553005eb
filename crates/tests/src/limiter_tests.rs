//! Quota arithmetic across ledger engines, subscriptions and the trial fallback.

use crate::fixtures::{ledger, minute_plan, subscribed, Engine, ENGINES};
use std::{sync::Arc, time::Duration};
use sublimit_core::{
    clock::{Clock, ManualClock},
    identity::Identity,
    plan::Plan,
    resolver::SubscriptionResolver,
    subscription::{LimitError, Subscription, SubscriptionLimiter},
};

const SECOND: Duration = Duration::from_secs(1);

fn user(byte: u8) -> Identity {
    Identity::from_bytes([byte; 20])
}

async fn resolver(engine: Engine, clock: &ManualClock) -> SubscriptionResolver {
    let clock_handle: Arc<dyn Clock> = Arc::new(clock.clone());
    SubscriptionResolver::new(ledger(engine, clock).await, clock_handle)
}

async fn grants_until_rejected(limiter: &SubscriptionLimiter) -> (usize, Duration) {
    let mut granted = 0;
    loop {
        match limiter.check().await {
            Ok(_) => granted += 1,
            Err(LimitError::TooManyRequests { retry_after }) => return (granted, retry_after),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[tokio::test]
async fn test_exactly_rpm_admissions_per_minute() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let ledger = ledger(engine, &clock).await;
        let plan = minute_plan("basic", 3);
        let subscription = Subscription::new(user(1), plan, ledger);

        for _ in 0..3 {
            assert!(subscription.try_admit().await.unwrap().is_admitted(), "{engine:?}");
            clock.advance(SECOND);
        }

        let limiter = SubscriptionLimiter::new(vec![subscription]);
        match limiter.check().await {
            Err(LimitError::TooManyRequests { retry_after }) => {
                assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(60));
                assert_eq!(retry_after, Duration::from_secs(57), "{engine:?}");
                clock.advance(retry_after);
            }
            other => panic!("{engine:?}: expected throttling, got {other:?}"),
        }

        assert!(limiter.check().await.is_ok(), "{engine:?}: slot frees at the window edge");
    }
}

#[tokio::test]
async fn test_wait_is_zero_below_both_caps() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let ledger = ledger(engine, &clock).await;
        let plan = Plan::new(Some("capped".into()), 0, 10, 12, true).unwrap();

        for _ in 0..9 {
            ledger.record(&user(2)).await.unwrap();
            assert_eq!(ledger.time_until_free(&user(2), &plan).await.unwrap(), Duration::ZERO);
        }
    }
}

#[tokio::test]
async fn test_daily_cap_dominates_wait() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let ledger = ledger(engine, &clock).await;
        let plan = Plan::new(Some("daily".into()), 0, 10, 2, true).unwrap();

        ledger.record(&user(3)).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        ledger.record(&user(3)).await.unwrap();

        let wait = ledger.time_until_free(&user(3), &plan).await.unwrap();
        assert_eq!(wait, Duration::from_secs(23 * 3600), "{engine:?}");
    }
}

#[tokio::test]
async fn test_two_subscriptions_share_one_counter() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let source = subscribed(
            &clock,
            &[(user(4), minute_plan("tiny", 1)), (user(4), minute_plan("big", 100))],
            30,
        );
        let resolver = resolver(engine, &clock).await.with_source(Arc::new(source));

        let limiter = resolver.limiter_for(&user(4)).await.unwrap();
        assert_eq!(limiter.candidates().len(), 2);

        let first = limiter.check().await.unwrap();
        assert_eq!(first.plan.name(), Some("tiny"));

        let (more, wait) = grants_until_rejected(&limiter).await;
        assert_eq!(1 + more, 100, "{engine:?}");
        assert_eq!(wait, Duration::from_secs(60));
    }
}

#[tokio::test]
async fn test_trial_fallback_grants_exactly_five() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let resolver =
            resolver(engine, &clock).await.with_trial(Some(Plan::trial(5).unwrap()));

        let limiter = resolver.limiter_for(&user(5)).await.unwrap();
        let (granted, _) = grants_until_rejected(&limiter).await;
        assert_eq!(granted, 5, "{engine:?}");

        clock.advance(Duration::from_secs(60));
        let (granted, _) = grants_until_rejected(&limiter).await;
        assert_eq!(granted, 5, "{engine:?}: next minute");
    }
}

#[tokio::test]
async fn test_lapsed_subscriber_keeps_paid_usage_under_trial() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let source = subscribed(&clock, &[(user(6), minute_plan("paid", 20))], 1);
        let resolver = resolver(engine, &clock)
            .await
            .with_source(Arc::new(source))
            .with_trial(Some(Plan::trial(5).unwrap()));

        let paid = resolver.limiter_for(&user(6)).await.unwrap();
        for _ in 0..5 {
            paid.check().await.unwrap();
        }

        clock.advance(Duration::from_secs(86_400) - Duration::from_secs(30));
        for _ in 0..5 {
            paid.check().await.unwrap();
        }

        // Subscription expired; the trial sees the five requests from 30s ago.
        clock.advance(Duration::from_secs(31));
        let trial = resolver.limiter_for(&user(6)).await.unwrap();
        assert_eq!(trial.candidates()[0].plan(), resolver.trial().unwrap());
        match trial.check().await {
            Err(LimitError::TooManyRequests { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(29), "{engine:?}");
            }
            other => panic!("{engine:?}: expected throttling, got {other:?}"),
        }
    }
}
