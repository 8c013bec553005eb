//! # Sublimit Core
//!
//! Subscription-aware, multi-window rate limiting for APIs whose users are identified by
//! a wallet signature instead of an API key.
//!
//! This crate provides:
//!
//! - **[`identity`]**: EIP-191 signature recovery into a canonical account address.
//!
//! - **[`plan`]**: Immutable quota tiers with per-minute and per-day caps.
//!
//! - **[`ledger`]**: Durable per-user request log (`SQLite` or in-memory) answering window
//!   counts and time-until-free queries, with lazy eviction.
//!
//! - **[`subscription`]**: A user bound to a plan, and the limiter that arbitrates one
//!   request across several subscriptions.
//!
//! - **[`source`]**: Plan sources: static configuration, the on-chain Subscriber contract
//!   and a TTL cache in front of either.
//!
//! - **[`resolver`]**: Identity to live subscriptions, with trial fallback.
//!
//! - **[`gate`]**: The full authorization pipeline used by the HTTP server.
//!
//! - **[`config`]**: Layered application configuration.
//!
//! ## Request Flow
//!
//! ```text
//! X-Signer + X-Signature
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ IdentityResolver │ ─── malformed / mismatch ──► 400 / 401
//! └────────┬─────────┘
//!          │ Identity
//!          ▼
//! ┌──────────────────────┐
//! │ SubscriptionResolver │ ◄── PlanSource(s) (cached)
//! └────────┬─────────────┘
//!          │ Vec<Subscription> (or trial)
//!          ▼
//! ┌────────────────────┐
//! │ SubscriptionLimiter│ ◄──► RequestLedger (shared per identity)
//! └────────┬───────────┘
//!          │
//!    ┌─────┴──────┐
//!    ▼            ▼
//!  Grant    TooManyRequests { retry_after }
//! ```
//!
//! ## Feature Flags
//!
//! - `test-util`: exposes [`clock::ManualClock`] and [`testing::TestWallet`] for
//!   deterministic tests in downstream crates

pub mod clock;
pub mod config;
pub mod gate;
pub mod identity;
pub mod ledger;
pub mod metrics;
pub mod plan;
pub mod resolver;
pub mod source;
pub mod subscription;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use gate::{Access, AccessPolicy, Credentials, GateError, RequestContext, SubscriptionGate};
pub use identity::{Identity, IdentityError, IdentityResolver};
pub use plan::Plan;
