//! Axum adapters around [`sublimit_core::SubscriptionGate`].
//!
//! Business rules live in the core; these functions only move values between HTTP
//! requests and the gate, and turn gate errors into status codes.

pub mod correlation_id;
pub mod subscription;

pub use correlation_id::{create_request_id_layers, request_id_of, X_REQUEST_ID};
pub use subscription::{subscription_middleware, GatewayState};
