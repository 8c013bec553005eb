//! Signature-derived user identity.
//!
//! Users are not issued API keys. They sign a fixed, operator-configured message with
//! their wallet and present the signature on every request; the address recovered from
//! that signature is the identity every quota is keyed by.
//!
//! # Recovery Flow
//!
//! ```text
//!   X-Signature: 0x<r><s><v>
//!        │
//!        ├──> Hex + framing decode ──── fail ──> MalformedSignature
//!        │    (65 bytes, v ∈ {0,1,27,28})
//!        │
//!        ├──> EIP-191 digest of the configured message
//!        │
//!        ├──> secp256k1 public key recovery ── fail ──> Unrecoverable
//!        │
//!        └──> keccak256(pubkey)[12..] ──> Identity
//! ```
//!
//! Recovery is pure: the same signature over the same message always yields the same
//! [`Identity`] or the same error. Callers that see the same signature repeatedly may
//! memoize the result (see [`crate::gate::SubscriptionGate`]).

pub mod signature;

use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub use signature::{keccak256, personal_message_hash, RecoverableSignature};

/// Errors produced while deriving an [`Identity`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The signature bytes could not be decoded (length, hex, recovery byte, scalars).
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// The claimed signer is not an address-shaped string.
    #[error("Invalid signer: {0}")]
    SignerInvalid(String),

    /// The signature decoded but no public key could be recovered from it.
    #[error("Signature could not be recovered: {0}")]
    Unrecoverable(String),
}

/// Canonical 20-byte account address.
///
/// Equality is byte equality, so any casing of the same hex address compares equal once
/// normalized. [`fmt::Display`] renders the EIP-55 checksum form; [`Identity::as_key`]
/// renders the lowercase form used as a storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity([u8; 20]);

impl Identity {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a `0x`-prefixed, 40 hex digit address in any letter case.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::SignerInvalid`] for anything that is not address-shaped.
    pub fn parse(candidate: &str) -> Result<Self, IdentityError> {
        let trimmed = candidate.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| IdentityError::SignerInvalid(candidate.to_string()))?;

        if digits.len() != 40 {
            return Err(IdentityError::SignerInvalid(candidate.to_string()));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| IdentityError::SignerInvalid(candidate.to_string()))?;
        Ok(Self(bytes))
    }

    /// Derives the address of an uncompressed secp256k1 public key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Lowercase `0x` hex form, used as the ledger key.
    #[must_use]
    pub fn as_key(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum form.
    #[must_use]
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_checksum())
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_checksum()
    }
}

/// Recovers identities from signatures over one fixed message.
///
/// The message is configuration, supplied at construction; the resolver holds only its
/// precomputed EIP-191 digest.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    message: String,
    digest: [u8; 32],
}

impl IdentityResolver {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let digest = personal_message_hash(message.as_bytes());
        Self { message, digest }
    }

    /// The text users are expected to sign.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Recovers the signer from raw `r || s || v` bytes.
    ///
    /// # Errors
    ///
    /// [`IdentityError::MalformedSignature`] on framing problems,
    /// [`IdentityError::Unrecoverable`] if recovery fails.
    pub fn recover(&self, signature: &[u8]) -> Result<Identity, IdentityError> {
        RecoverableSignature::from_bytes(signature)?.recover(&self.digest)
    }

    /// Recovers the signer from the hex form of a signature.
    ///
    /// # Errors
    ///
    /// Same as [`IdentityResolver::recover`].
    pub fn recover_hex(&self, signature: &str) -> Result<Identity, IdentityError> {
        RecoverableSignature::from_hex(signature)?.recover(&self.digest)
    }

    /// Fast path for callers that already claim an address.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::SignerInvalid`] if `candidate` is not address-shaped.
    pub fn normalize(&self, candidate: &str) -> Result<Identity, IdentityError> {
        Identity::parse(candidate)
    }
}

/// Recovers the signer of `signature` over an arbitrary text message.
///
/// # Errors
///
/// Same as [`IdentityResolver::recover_hex`].
pub fn recover_message(message: &str, signature: &str) -> Result<Identity, IdentityError> {
    RecoverableSignature::from_hex(signature)?.recover(&personal_message_hash(message.as_bytes()))
}
