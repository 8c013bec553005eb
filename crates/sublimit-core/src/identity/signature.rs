use super::{Identity, IdentityError};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

/// Total length of an `r || s || v` signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// A decoded `r || s || v` secp256k1 signature.
///
/// Decoding is purely structural: any framing problem is reported as
/// [`IdentityError::MalformedSignature`] before any curve arithmetic runs.
#[derive(Debug, Clone)]
pub struct RecoverableSignature {
    signature: Signature,
    recovery_id: RecoveryId,
}

impl RecoverableSignature {
    /// Decodes 65 raw bytes. The trailing byte may be `0`/`1` or the legacy `27`/`28`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedSignature`] on a wrong length, an unknown
    /// recovery byte or an `r`/`s` scalar outside the curve order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(IdentityError::MalformedSignature(format!(
                "expected {SIGNATURE_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }

        let v = match bytes[64] {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            other => {
                return Err(IdentityError::MalformedSignature(format!(
                    "invalid recovery byte {other}"
                )))
            }
        };

        let signature = Signature::from_slice(&bytes[..64])
            .map_err(|e| IdentityError::MalformedSignature(format!("invalid r/s: {e}")))?;
        let recovery_id = RecoveryId::from_byte(v)
            .ok_or_else(|| IdentityError::MalformedSignature(format!("invalid recovery id {v}")))?;

        Ok(Self { signature, recovery_id })
    }

    /// Decodes the `0x`-prefixed (or bare) hex form carried in request headers.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedSignature`] if the string is not valid hex
    /// or does not decode to a well-formed signature.
    pub fn from_hex(encoded: &str) -> Result<Self, IdentityError> {
        let trimmed = encoded.trim();
        let digits =
            trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).unwrap_or(trimmed);
        let bytes = hex::decode(digits)
            .map_err(|e| IdentityError::MalformedSignature(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Recovers the signer of a 32-byte prehash.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unrecoverable`] when no public key satisfies the signature.
    pub fn recover(&self, prehash: &[u8; 32]) -> Result<Identity, IdentityError> {
        // Message signatures may carry a high `s`; flip to the canonical half and
        // mirror the parity so recovery yields the same key.
        let (signature, recovery_id) = match self.signature.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!self.recovery_id.is_y_odd(), self.recovery_id.is_x_reduced()),
            ),
            None => (self.signature.clone(), self.recovery_id),
        };

        let key = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
            .map_err(|e| IdentityError::Unrecoverable(e.to_string()))?;

        Ok(Identity::from_verifying_key(&key))
    }
}

/// Keccak-256 digest.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-191 `personal_sign` digest of a text message.
#[must_use]
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}
