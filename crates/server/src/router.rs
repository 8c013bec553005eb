use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use serde_json::json;
use sublimit_core::{resolver::SourcePlans, subscription::Grant, Access, Plan};

#[derive(Serialize)]
struct PlansResponse<'a> {
    sources: Vec<SourcePlans>,
    trial: Option<&'a Plan>,
}

#[derive(Serialize)]
#[serde(tag = "access", rename_all = "lowercase")]
enum AuthorizedResponse {
    Bypassed,
    Granted { user: String, plan: Plan },
}

impl From<Access> for AuthorizedResponse {
    fn from(access: Access) -> Self {
        match access {
            Access::Bypassed => Self::Bypassed,
            Access::Granted(Grant { user, plan }) => Self::Granted { user: user.to_string(), plan },
        }
    }
}

pub async fn handle_health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// Active plans per source, plus the trial plan when one is configured.
pub async fn handle_plans(State(state): State<AppState>) -> Response {
    let resolver = state.gate.resolver();
    match resolver.list_plans().await {
        Ok(sources) => {
            (StatusCode::OK, Json(PlansResponse { sources, trial: resolver.trial() }))
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "plan listing failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.to_string() })))
                .into_response()
        }
    }
}

/// Terminal handler for authorized traffic.
///
/// Reports which subscription admitted the request. Deployments that front a real API
/// replace this fallback with their own routes behind the same middleware.
pub async fn handle_authorized(Extension(access): Extension<Access>) -> impl IntoResponse {
    (StatusCode::OK, Json(AuthorizedResponse::from(access)))
}
