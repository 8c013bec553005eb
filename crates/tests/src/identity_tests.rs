//! Signature recovery as seen by the gate.

use crate::fixtures::MESSAGE;
use sublimit_core::{
    identity::{IdentityError, IdentityResolver},
    testing::TestWallet,
};

#[test]
fn test_recovery_is_deterministic() {
    let resolver = IdentityResolver::new(MESSAGE);
    let wallet = TestWallet::from_index(101);
    let signature = wallet.sign(MESSAGE);

    let first = resolver.recover_hex(&signature).unwrap();
    for _ in 0..10 {
        assert_eq!(resolver.recover_hex(&signature).unwrap(), first);
    }
    assert_eq!(first, wallet.address());
}

#[test]
fn test_wrong_length_is_malformed_not_wrong_signer() {
    let resolver = IdentityResolver::new(MESSAGE);
    let signature = TestWallet::from_index(102).sign(MESSAGE);

    let truncated = &signature[..signature.len() - 2];
    let extended = format!("{signature}00");

    for candidate in [truncated.to_string(), extended, "0x".to_string()] {
        assert!(matches!(
            resolver.recover_hex(&candidate),
            Err(IdentityError::MalformedSignature(_))
        ));
    }
}

#[test]
fn test_other_message_recovers_someone_else() {
    let wallet = TestWallet::from_index(103);
    let signature = wallet.sign("a different message");

    let recovered = IdentityResolver::new(MESSAGE).recover_hex(&signature).unwrap();
    assert_ne!(recovered, wallet.address());
}

#[test]
fn test_modern_and_legacy_recovery_ids_agree() {
    let resolver = IdentityResolver::new(MESSAGE);
    let wallet = TestWallet::from_index(104);
    let legacy = wallet.sign(MESSAGE);

    let v = u8::from_str_radix(&legacy[legacy.len() - 2..], 16).unwrap();
    let modern = format!("{}{:02x}", &legacy[..legacy.len() - 2], v - 27);

    assert_eq!(resolver.recover_hex(&modern).unwrap(), wallet.address());
}

#[test]
fn test_normalize_rejects_non_addresses() {
    let resolver = IdentityResolver::new(MESSAGE);
    for candidate in ["", "0x1234", "alice.eth", "0xZZ7536E3605D9C16a7a3D7b1898e529396a65c23"] {
        assert!(matches!(resolver.normalize(candidate), Err(IdentityError::SignerInvalid(_))));
    }
}
