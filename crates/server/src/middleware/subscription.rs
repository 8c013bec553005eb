use super::correlation_id::request_id_of;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{InvalidHeaderName, RETRY_AFTER},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use sublimit_core::{
    config::GatewayConfig,
    gate::retry_after_secs,
    Credentials, GateError, RequestContext, SubscriptionGate,
};

/// Everything the middleware needs per request.
#[derive(Debug, Clone)]
pub struct GatewayState {
    gate: SubscriptionGate,
    signer_header: HeaderName,
    signature_header: HeaderName,
    subscribe_url: Option<String>,
}

impl GatewayState {
    /// # Errors
    /// Returns [`InvalidHeaderName`] if a configured header name is not a valid token.
    pub fn new(gate: SubscriptionGate, config: &GatewayConfig) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            gate,
            signer_header: HeaderName::from_bytes(config.signer_header.as_bytes())?,
            signature_header: HeaderName::from_bytes(config.signature_header.as_bytes())?,
            subscribe_url: config.subscribe_url.clone(),
        })
    }

    #[must_use]
    pub fn gate(&self) -> &SubscriptionGate {
        &self.gate
    }

    fn message(&self, error: &GateError) -> String {
        match (error, self.subscribe_url.as_deref()) {
            (GateError::SignatureNotProvided, Some(url)) => format!(
                "You must subscribe to a plan at {url} and pass the provided signature as a \
                 header param \"{}\".",
                self.signature_header
            ),
            (GateError::NoSubscription { .. }, Some(url)) => {
                format!("{error}. Please purchase one at {url}")
            }
            (GateError::RateLimited { retry_after }, _) => format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after_secs(*retry_after)
            ),
            (GateError::Ledger(_), _) => "internal error".to_string(),
            _ => error.to_string(),
        }
    }

    fn reject(&self, error: &GateError) -> Response {
        let status = match error {
            GateError::SignerNotProvided
            | GateError::SignatureNotProvided
            | GateError::SignatureNotAuthorized { .. }
            | GateError::NoSubscription { .. }
            | GateError::RateLimited { .. } => StatusCode::UNAUTHORIZED,
            GateError::Identity(_) => StatusCode::BAD_REQUEST,
            GateError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({ "error": self.message(error), "reason": error.reason() });
        let mut response = (status, Json(body)).into_response();

        if let GateError::RateLimited { retry_after } = error {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
        }
        response
    }
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

/// Authorizes the request against the signer's subscriptions.
///
/// On success the [`sublimit_core::Access`] is inserted into request extensions for
/// downstream handlers. Rejections are answered here with a JSON body, and rate-limit
/// rejections also carry `Retry-After`.
pub async fn subscription_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_owned();
    let path = request.uri().path().to_owned();
    let signer = header_str(request.headers(), &state.signer_header);
    let signature = header_str(request.headers(), &state.signature_header);
    let request_id = request_id_of(&request);

    let ctx = RequestContext { method: &method, path: &path };
    let credentials =
        Credentials { signer: signer.as_deref(), signature: signature.as_deref() };

    match state.gate.authorize(&ctx, credentials).await {
        Ok(access) => {
            request.extensions_mut().insert(access);
            next.run(request).await
        }
        Err(error) => {
            match &error {
                GateError::Ledger(e) => {
                    tracing::error!(
                        request_id = ?request_id,
                        path = %path,
                        error = %e,
                        "ledger failure"
                    );
                }
                GateError::Upstream { name, error: e } => {
                    tracing::warn!(
                        request_id = ?request_id,
                        path = %path,
                        source = %name,
                        error = %e,
                        "plan source unavailable"
                    );
                }
                _ => {
                    tracing::info!(
                        request_id = ?request_id,
                        path = %path,
                        reason = error.reason(),
                        "request rejected"
                    );
                }
            }
            state.reject(&error)
        }
    }
}
