//! Request IDs for correlating gateway decisions with access logs.
//!
//! Incoming `x-request-id` values are kept; otherwise a UUID v4 is assigned. The id is
//! echoed on the response and recorded on every admission log line.

use axum::http::{header::HeaderValue, HeaderName, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

/// The set and propagate layers, in that order.
///
/// Apply propagate first and set last so the set layer runs outermost:
///
/// ```ignore
/// let (set_layer, propagate_layer) = create_request_id_layers();
/// let app = router.layer(propagate_layer).layer(set_layer);
/// ```
#[must_use]
pub fn create_request_id_layers(
) -> (SetRequestIdLayer<UuidRequestIdGenerator>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestIdGenerator),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}

/// The request id assigned by [`SetRequestIdLayer`], if the layer ran.
pub fn request_id_of<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map(str::to_owned)
}
