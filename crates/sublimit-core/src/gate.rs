//! Request authorization pipeline.
//!
//! # Flow
//!
//! ```text
//! RequestContext + Credentials
//!        │
//!        ├──> AccessPolicy::bypass ──── yes ──> Access::Bypassed
//!        │
//!        ├──> signer / signature present? ── no ──> Signer/SignatureNotProvided
//!        │
//!        ├──> normalize claimed signer ──── fail ──> Identity(SignerInvalid)
//!        │
//!        ├──> recover signature (memoized) ── fail ──> Identity(MalformedSignature)
//!        │
//!        ├──> claimed == recovered? ──── no ──> SignatureNotAuthorized
//!        │
//!        ├──> SubscriptionResolver::resolve ── fail ──> Upstream | NoSubscription
//!        │
//!        └──> SubscriptionLimiter::check ──> Access::Granted | RateLimited | Ledger
//! ```
//!
//! The gate is transport-agnostic: the HTTP layer extracts headers into [`Credentials`]
//! and maps [`GateError`] onto status codes.

use crate::{
    identity::{Identity, IdentityError, IdentityResolver},
    ledger::LedgerError,
    metrics::record_gate_rejection,
    resolver::{ResolveError, SubscriptionResolver},
    source::SourceError,
    subscription::{Grant, LimitError},
};
use moka::future::Cache;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

/// Capacity of the signature to identity memo.
const RECOVERY_CACHE_CAPACITY: u64 = 100_000;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("signer not provided")]
    SignerNotProvided,

    #[error("signature not provided")]
    SignatureNotProvided,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The signature is valid but was not produced by the claimed signer.
    #[error("signature not authorized for signer {signer}")]
    SignatureNotAuthorized { signer: Identity },

    #[error("no active subscription for {user}")]
    NoSubscription { user: Identity },

    #[error("rate limited, retry in {}s", .retry_after.as_secs_f64().ceil())]
    RateLimited { retry_after: Duration },

    #[error("plan source '{name}' unavailable: {error}")]
    Upstream { name: String, error: SourceError },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl GateError {
    /// Static label for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SignerNotProvided => "signer_not_provided",
            Self::SignatureNotProvided => "signature_not_provided",
            Self::Identity(IdentityError::SignerInvalid(_)) => "signer_invalid",
            Self::Identity(IdentityError::MalformedSignature(_)) => "malformed_signature",
            Self::Identity(IdentityError::Unrecoverable(_)) => "unrecoverable_signature",
            Self::SignatureNotAuthorized { .. } => "signature_not_authorized",
            Self::NoSubscription { .. } => "no_subscription",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream",
            Self::Ledger(_) => "ledger",
        }
    }
}

/// Whole seconds a client should wait, rounded up so a retry is never early.
#[must_use]
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// What the gate knows about the request besides its credentials.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub method: &'a str,
    pub path: &'a str,
}

/// Raw credential header values; `None` when absent or unreadable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub signer: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Decides, before any signature work, whether a request skips the gate entirely.
pub trait AccessPolicy: Send + Sync {
    fn bypass(&self, ctx: &RequestContext<'_>) -> bool;
}

impl<F> AccessPolicy for F
where
    F: Fn(&RequestContext<'_>) -> bool + Send + Sync,
{
    fn bypass(&self, ctx: &RequestContext<'_>) -> bool {
        self(ctx)
    }
}

/// Every request goes through the gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBypass;

impl AccessPolicy for NoBypass {
    fn bypass(&self, _ctx: &RequestContext<'_>) -> bool {
        false
    }
}

/// Bypasses requests by path. Entries ending in `*` match by prefix.
#[derive(Debug, Clone, Default)]
pub struct PathAllowlist {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl PathAllowlist {
    #[must_use]
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowlist = Self::default();
        for path in paths {
            let path = path.as_ref();
            match path.strip_suffix('*') {
                Some(prefix) => allowlist.prefixes.push(prefix.to_string()),
                None => allowlist.exact.push(path.to_string()),
            }
        }
        allowlist
    }
}

impl AccessPolicy for PathAllowlist {
    fn bypass(&self, ctx: &RequestContext<'_>) -> bool {
        self.exact.iter().any(|p| p == ctx.path)
            || self.prefixes.iter().any(|p| ctx.path.starts_with(p.as_str()))
    }
}

/// Outcome of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The access policy let the request through without checks or accounting.
    Bypassed,
    /// A subscription admitted and recorded the request.
    Granted(Grant),
}

/// Authorizes requests from signed credentials against subscription quotas.
#[derive(Clone)]
pub struct SubscriptionGate {
    identity: IdentityResolver,
    resolver: SubscriptionResolver,
    policy: Arc<dyn AccessPolicy>,
    recovered: Cache<String, Identity>,
}

impl std::fmt::Debug for SubscriptionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGate")
            .field("identity", &self.identity)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl SubscriptionGate {
    #[must_use]
    pub fn new(identity: IdentityResolver, resolver: SubscriptionResolver) -> Self {
        Self {
            identity,
            resolver,
            policy: Arc::new(NoBypass),
            recovered: Cache::builder().max_capacity(RECOVERY_CACHE_CAPACITY).build(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    #[must_use]
    pub fn resolver(&self) -> &SubscriptionResolver {
        &self.resolver
    }

    /// Runs the full authorization pipeline for one request.
    ///
    /// On [`Access::Granted`] exactly one ledger entry has been written for the signer.
    ///
    /// # Errors
    /// Returns [`GateError`] describing the first check that failed.
    pub async fn authorize(
        &self,
        ctx: &RequestContext<'_>,
        credentials: Credentials<'_>,
    ) -> Result<Access, GateError> {
        if self.policy.bypass(ctx) {
            tracing::trace!(path = ctx.path, "access policy bypass");
            return Ok(Access::Bypassed);
        }

        let result = self.check(credentials).await;
        match &result {
            Ok(grant) => {
                tracing::debug!(
                    user = %grant.user,
                    plan = %grant.plan,
                    path = ctx.path,
                    "granted"
                );
            }
            Err(e) => {
                record_gate_rejection(e.reason());
                tracing::debug!(path = ctx.path, reason = e.reason(), error = %e, "rejected");
            }
        }
        result.map(Access::Granted)
    }

    async fn check(&self, credentials: Credentials<'_>) -> Result<Grant, GateError> {
        let signer = credentials.signer.ok_or(GateError::SignerNotProvided)?;
        let signature = credentials.signature.ok_or(GateError::SignatureNotProvided)?;

        let claimed = self.claimed_signer(signer).await?;
        let recovered = self.recover(signature).await?;
        if claimed != recovered {
            return Err(GateError::SignatureNotAuthorized { signer: claimed });
        }

        let limiter = self.resolver.limiter_for(&recovered).await.map_err(|e| match e {
            ResolveError::NoActiveSubscriptions => GateError::NoSubscription { user: recovered },
            ResolveError::Source { name, error } => GateError::Upstream { name, error },
        })?;

        limiter.check().await.map_err(|e| match e {
            LimitError::NoCandidates => GateError::NoSubscription { user: recovered },
            LimitError::TooManyRequests { retry_after } => GateError::RateLimited { retry_after },
            LimitError::Ledger(e) => GateError::Ledger(e),
        })
    }

    /// The signer header carries either an address or a signature over the configured
    /// message. A value that is neither keeps the `SignerInvalid` error.
    async fn claimed_signer(&self, signer: &str) -> Result<Identity, IdentityError> {
        match self.identity.normalize(signer) {
            Err(invalid @ IdentityError::SignerInvalid(_)) => {
                self.recover(signer).await.map_err(|_| invalid)
            }
            other => other,
        }
    }

    /// Recovers the signer of `signature`, memoized per exact signature string.
    ///
    /// Failed recoveries are not memoized.
    async fn recover(&self, signature: &str) -> Result<Identity, IdentityError> {
        let key = signature.trim().to_ascii_lowercase();
        let identity = self.identity.clone();
        self.recovered
            .try_get_with(key.clone(), async move { identity.recover_hex(&key) })
            .await
            .map_err(|e| (*e).clone())
    }
}
