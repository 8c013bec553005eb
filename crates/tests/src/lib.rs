//! Cross-crate scenarios for the sublimit gateway.
//!
//! - `identity_tests`: signature recovery determinism and malformed input
//! - `limiter_tests`: window arithmetic, shared counters across subscriptions, trial
//!   fallback; each scenario runs against both ledger engines
//! - `concurrency_tests`: strict admission under parallel load for one identity
//! - `gateway_tests`: the assembled axum app, from config to status codes
//! - `fixtures`: ledgers, plans and mock plan sources shared by the above
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod identity_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod limiter_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod concurrency_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod gateway_tests;

pub mod fixtures;
