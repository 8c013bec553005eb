//! The full HTTP stack: config, gate, middleware and router.

use crate::fixtures::{minute_plan, subscribed, CountingSource, OfflineSource, MESSAGE};
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use serde_json::Value;
use server::{build_gate, create_app, metrics::prometheus_handle, AppState};
use std::{sync::Arc, time::Duration};
use sublimit_core::{
    clock::{Clock, ManualClock},
    config::{AppConfig, LedgerBackend},
    identity::IdentityResolver,
    ledger,
    plan::{Plan, PlanDefinition},
    resolver::SubscriptionResolver,
    source::{CacheSettings, CachedPlanSource, StaticSourceConfig, SubscriptionDefinition},
    testing::TestWallet,
    SubscriptionGate,
};
use tower::ServiceExt;

fn config(backend: LedgerBackend) -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.backend = backend;
    config.ledger.database_url = "sqlite::memory:".to_string();
    config
}

async fn app_from_config(config: &AppConfig, clock: &ManualClock) -> Router {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let ledger = ledger::open(&config.ledger, clock.clone()).await.unwrap();
    let gate = build_gate(config, ledger, clock).unwrap();
    create_app(AppState { gate, prometheus: prometheus_handle() }, config).unwrap()
}

fn app_from_resolver(resolver: SubscriptionResolver) -> Router {
    let config = AppConfig::default();
    let gate = SubscriptionGate::new(IdentityResolver::new(MESSAGE), resolver);
    create_app(AppState { gate, prometheus: prometheus_handle() }, &config).unwrap()
}

fn memory_resolver(clock: &ManualClock) -> SubscriptionResolver {
    let handle: Arc<dyn Clock> = Arc::new(clock.clone());
    let ledger = Arc::new(sublimit_core::ledger::MemoryLedger::new(handle.clone()));
    SubscriptionResolver::new(ledger, handle)
}

fn signed(wallet: &TestWallet) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/query")
        .header("X-Signer", wallet.address().to_string())
        .header("X-Signature", wallet.sign(MESSAGE))
        .body(Body::from("{}"))
        .unwrap()
}

async fn json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn two_per_minute(wallet: &TestWallet, clock: &ManualClock) -> StaticSourceConfig {
    StaticSourceConfig {
        name: "subscriber".to_string(),
        plans: vec![PlanDefinition {
            name: Some("starter".to_string()),
            price: 100,
            requests_per_minute: 2,
            requests_per_day: None,
            is_active: true,
        }],
        subscriptions: vec![SubscriptionDefinition {
            address: wallet.address().to_string(),
            plan: "starter".to_string(),
            expires_at: clock.now() + chrono::Duration::days(30),
        }],
    }
}

#[tokio::test]
async fn test_third_request_within_a_second_is_throttled() {
    for backend in [LedgerBackend::Memory, LedgerBackend::Sqlite] {
        let clock = ManualClock::starting_now();
        let wallet = TestWallet::from_index(201);
        let mut config = config(backend);
        config.sources.static_sources = vec![two_per_minute(&wallet, &clock)];
        let app = app_from_config(&config, &clock).await;

        let first = app.clone().oneshot(signed(&wallet)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK, "{backend:?}");
        let body = json(first).await;
        assert_eq!(body["access"], "granted");
        assert_eq!(body["plan"]["name"], "starter");

        clock.advance(Duration::from_millis(500));
        let second = app.clone().oneshot(signed(&wallet)).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK, "{backend:?}");

        clock.advance(Duration::from_millis(500));
        let third = app.oneshot(signed(&wallet)).await.unwrap();
        assert_eq!(third.status(), StatusCode::UNAUTHORIZED, "{backend:?}");
        assert_eq!(third.headers().get("retry-after").unwrap(), "59");

        let body = json(third).await;
        assert_eq!(body["reason"], "rate_limited");
        assert!(body["error"].as_str().unwrap().contains("59 seconds"));
    }
}

#[tokio::test]
async fn test_trial_then_subscribe_url_when_disabled() {
    let clock = ManualClock::starting_now();
    let wallet = TestWallet::from_index(202);

    let mut with_trial = config(LedgerBackend::Memory);
    with_trial.plans.trial_requests_per_minute = Some(1);
    let app = app_from_config(&with_trial, &clock).await;
    assert_eq!(app.oneshot(signed(&wallet)).await.unwrap().status(), StatusCode::OK);

    let mut without_trial = config(LedgerBackend::Memory);
    without_trial.gateway.subscribe_url = Some("https://subs.example/buy".to_string());
    let app = app_from_config(&without_trial, &clock).await;

    let response = app.oneshot(signed(&wallet)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json(response).await;
    assert_eq!(body["reason"], "no_subscription");
    assert!(body["error"].as_str().unwrap().contains("https://subs.example/buy"));
}

#[tokio::test]
async fn test_signature_from_another_wallet() {
    let clock = ManualClock::starting_now();
    let alice = TestWallet::from_index(203);
    let mallory = TestWallet::from_index(204);
    let app = app_from_resolver(memory_resolver(&clock).with_trial(Some(Plan::trial(5).unwrap())));

    let request = Request::builder()
        .uri("/v1/query")
        .header("X-Signer", alice.address().to_string())
        .header("X-Signature", mallory.sign(MESSAGE))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["reason"], "signature_not_authorized");
}

#[tokio::test]
async fn test_signature_accepted_in_signer_header() {
    let clock = ManualClock::starting_now();
    let wallet = TestWallet::from_index(208);
    let app = app_from_resolver(memory_resolver(&clock).with_trial(Some(Plan::trial(5).unwrap())));

    let signature = wallet.sign(MESSAGE);
    let request = Request::builder()
        .uri("/v1/query")
        .header("X-Signer", &signature)
        .header("X-Signature", &signature)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["access"], "granted");
    assert_eq!(body["user"], wallet.address().to_string());
}

#[tokio::test]
async fn test_source_outage_never_falls_back_to_trial() {
    let clock = ManualClock::starting_now();
    let wallet = TestWallet::from_index(205);
    let resolver = memory_resolver(&clock)
        .with_source(Arc::new(OfflineSource))
        .with_trial(Some(Plan::trial(5).unwrap()));
    let app = app_from_resolver(resolver);

    let response = app.clone().oneshot(signed(&wallet)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let plans = Request::builder().uri("/plans").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(plans).await.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_cached_source_is_read_once_per_identity() {
    let clock = ManualClock::starting_now();
    let wallet = TestWallet::from_index(206);
    let source = subscribed(&clock, &[(wallet.address(), minute_plan("pro", 10))], 30);
    let counting = Arc::new(CountingSource::new(source));
    let cached = CachedPlanSource::new(counting.clone(), CacheSettings::default());
    let app = app_from_resolver(memory_resolver(&clock).with_source(Arc::new(cached)));

    for _ in 0..4 {
        let response = app.clone().oneshot(signed(&wallet)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(counting.lookups(), 1);
}

#[tokio::test]
async fn test_grants_show_up_in_metrics() {
    let clock = ManualClock::starting_now();
    let wallet = TestWallet::from_index(207);
    let app = app_from_resolver(memory_resolver(&clock).with_trial(Some(Plan::trial(1).unwrap())));

    app.clone().oneshot(signed(&wallet)).await.unwrap();
    app.clone().oneshot(signed(&wallet)).await.unwrap();

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("sublimit_admissions_total"), "{text}");
    assert!(text.contains("sublimit_gate_rejections_total"), "{text}");
}
