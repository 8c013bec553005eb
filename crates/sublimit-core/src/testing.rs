//! Deterministic wallets for tests.

#![allow(clippy::expect_used)]

use crate::identity::{personal_message_hash, Identity};
use k256::ecdsa::SigningKey;

/// A secp256k1 key that signs `personal_sign` messages the way a wallet does.
#[derive(Debug, Clone)]
pub struct TestWallet {
    key: SigningKey,
}

impl TestWallet {
    /// Wallet whose private key is the scalar `index` (zero is bumped to one).
    #[must_use]
    pub fn from_index(index: u64) -> Self {
        let mut secret = [0u8; 32];
        secret[24..].copy_from_slice(&index.max(1).to_be_bytes());
        let key = SigningKey::from_slice(&secret).expect("small non-zero scalar is a valid key");
        Self { key }
    }

    #[must_use]
    pub fn address(&self) -> Identity {
        Identity::from_verifying_key(self.key.verifying_key())
    }

    /// `0x`-prefixed `r || s || v` signature with the legacy `v` of 27/28.
    #[must_use]
    pub fn sign(&self, message: &str) -> String {
        let digest = personal_message_hash(message.as_bytes());
        let (signature, recovery_id) =
            self.key.sign_prehash_recoverable(&digest).expect("prehash signing cannot fail");

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }
}
