//! Many tasks hitting the same identity at once.

use crate::fixtures::{ledger, ENGINES};
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use sublimit_core::{
    clock::ManualClock,
    identity::Identity,
    plan::Plan,
    subscription::{Subscription, SubscriptionLimiter},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_strict_admission_never_overshoots() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let ledger = ledger(engine, &clock).await;
        let user = Identity::from_bytes([0xaa; 20]);
        let limiter = Arc::new(SubscriptionLimiter::new(vec![Subscription::new(
            user,
            Plan::trial(10).unwrap(),
            ledger.clone(),
        )]));

        let tasks = (0..50).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check().await.is_ok() })
        });
        let granted =
            join_all(tasks).await.into_iter().filter(|r| matches!(r, Ok(true))).count();

        assert_eq!(granted, 10, "{engine:?}");
        assert_eq!(
            ledger.count_in_window(&user, Duration::from_secs(60)).await.unwrap(),
            10,
            "{engine:?}"
        );
    }
}

#[tokio::test]
async fn test_users_do_not_contend() {
    for engine in ENGINES {
        let clock = ManualClock::starting_now();
        let ledger = ledger(engine, &clock).await;
        let busy = Identity::from_bytes([0x01; 20]);
        let other = Identity::from_bytes([0x02; 20]);

        let _held = ledger.admission_guard(&busy).await;
        let subscription = Subscription::new(other, Plan::trial(1).unwrap(), ledger.clone());

        let admitted = tokio::time::timeout(Duration::from_secs(5), subscription.try_admit())
            .await
            .expect("other users are not blocked")
            .unwrap();
        assert!(admitted.is_admitted(), "{engine:?}");
    }
}

#[tokio::test]
async fn test_same_user_waits_for_guard() {
    let clock = ManualClock::starting_now();
    let ledger = ledger(crate::fixtures::Engine::Memory, &clock).await;
    let user = Identity::from_bytes([0x03; 20]);

    let held = ledger.admission_guard(&user).await;
    assert!(held.is_some(), "strict admission is on by default");

    let subscription = Subscription::new(user, Plan::trial(1).unwrap(), ledger.clone());
    let blocked =
        tokio::time::timeout(Duration::from_millis(50), subscription.try_admit()).await;
    assert!(blocked.is_err());

    drop(held);
    assert!(subscription.try_admit().await.unwrap().is_admitted());
}
