//! Cryptographic primitives for sealchat
//!
//! This module provides the building blocks for the per-peer secure channel:
//! - `keypair`: RSA-OAEP key pair generation and peer key import
//! - `jwk`: JSON Web Key interchange format for public keys
//! - `cipher`: seal/open of message payloads

pub mod cipher;
pub mod error;
pub mod jwk;
pub mod keypair;

// Re-export commonly used types
pub use cipher::CipherCodec;
pub use error::{CryptoError, CryptoResult};
pub use jwk::Jwk;
pub use keypair::{KeyPairManager, KeyState, LocalKeyPair, PeerPublicKey};

#[cfg(test)]
mod integration_tests {
    use super::keypair::test_keys;
    use super::*;

    #[test]
    fn test_full_exchange_flow() {
        let alice = test_keys::alice();
        let bob = test_keys::bob();

        // Each side imports the other's exported key
        let bob_seen_by_alice = PeerPublicKey::import(bob.exported_public_key()).unwrap();
        let alice_seen_by_bob = PeerPublicKey::import(alice.exported_public_key()).unwrap();

        // Alice writes to Bob
        let ct = CipherCodec::seal_text("Hello, Bob! This is a secret.", &bob_seen_by_alice).unwrap();
        assert_eq!(
            CipherCodec::open_text(&ct, &bob).unwrap(),
            "Hello, Bob! This is a secret."
        );

        // Bob answers
        let ct = CipherCodec::seal_text("Hi Alice", &alice_seen_by_bob).unwrap();
        assert_eq!(CipherCodec::open_text(&ct, &alice).unwrap(), "Hi Alice");

        // Neither can read what was meant for the other
        assert!(CipherCodec::open(&ct, &bob).is_err());
    }
}
