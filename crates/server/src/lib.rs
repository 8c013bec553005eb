//! HTTP gateway for subscription-limited APIs.
//!
//! Public routes (`/health`, `/plans`, `/metrics`) answer without credentials. Every
//! other path falls through to the subscription middleware and, once admitted, to
//! [`router::handle_authorized`].

pub mod metrics;
pub mod middleware;
pub mod router;

use anyhow::{Context, Result};
use axum::{middleware as axum_middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use sublimit_core::{
    clock::Clock,
    config::AppConfig,
    gate::PathAllowlist,
    identity::IdentityResolver,
    ledger::RequestLedger,
    resolver::SubscriptionResolver,
    source::{CacheSettings, CachedPlanSource, StaticPlanSource},
    SubscriptionGate,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared state of the public routes.
#[derive(Clone)]
pub struct AppState {
    pub gate: SubscriptionGate,
    pub prometheus: PrometheusHandle,
}

/// Wires the configured plan sources, trial and bypass paths into a gate.
///
/// Each static source sits behind its own TTL cache. On-chain sources are not configured
/// here; they need a caller-supplied `ContractReader` (see `sublimit_core::source::contract`).
///
/// # Errors
/// Fails if the trial rate or a static source declaration is invalid.
pub fn build_gate(
    config: &AppConfig,
    ledger: Arc<dyn RequestLedger>,
    clock: Arc<dyn Clock>,
) -> Result<SubscriptionGate> {
    let settings = CacheSettings {
        ttl: config.plan_cache_ttl(),
        max_identities: config.plans.cache_max_identities,
    };

    let trial = config.trial_plan().context("invalid trial plan")?;
    let mut resolver = SubscriptionResolver::new(ledger, clock).with_trial(trial);

    for declared in &config.sources.static_sources {
        let source = StaticPlanSource::from_config(declared)
            .with_context(|| format!("invalid static source '{}'", declared.name))?;
        resolver = resolver.with_source(Arc::new(CachedPlanSource::new(source, settings)));
    }

    let identity = IdentityResolver::new(config.signing.message.clone());
    let policy = PathAllowlist::new(&config.gateway.bypass_paths);
    Ok(SubscriptionGate::new(identity, resolver).with_policy(Arc::new(policy)))
}

/// Builds the full router: public routes plus the gated fallback.
///
/// # Errors
/// Fails if a configured credential header name is invalid.
pub fn create_app(state: AppState, config: &AppConfig) -> Result<Router> {
    let (set_request_id, propagate_request_id) = middleware::create_request_id_layers();

    let gateway = Arc::new(
        middleware::GatewayState::new(state.gate.clone(), &config.gateway)
            .context("invalid gateway header name")?,
    );

    let public = Router::new()
        .route("/health", get(router::handle_health))
        .route("/plans", get(router::handle_plans))
        .route("/metrics", get(router::handle_metrics))
        .with_state(state);

    let protected = Router::new()
        .fallback(router::handle_authorized)
        .layer(axum_middleware::from_fn_with_state(gateway, middleware::subscription_middleware))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes));

    // Layers run outside-in, so the request id is set before the trace span opens.
    Ok(public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id))
}
