//! Local RSA-OAEP key pair and imported peer keys
//!
//! One key pair is generated per session and never rotated. The public half
//! leaves the process only as a JWK string; the private half has no export
//! path at all.

use rand::rngs::OsRng;
use rsa::{traits::PublicKeyParts, BigUint, RsaPrivateKey, RsaPublicKey};
use tracing::{info, warn};

use super::error::{CryptoError, CryptoResult};
use super::jwk::Jwk;

/// Modulus size of generated keys
pub const MODULUS_BITS: usize = 2048;

/// Public exponent of generated keys (F4)
pub const PUBLIC_EXPONENT: u64 = 65_537;

/// The session's own key pair
#[derive(Clone)]
pub struct LocalKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    exported: String,
}

impl LocalKeyPair {
    /// Generate a fresh key pair on the current thread
    ///
    /// This is slow; async callers should go through [`KeyPairManager::generate`].
    pub fn generate_blocking() -> CryptoResult<Self> {
        let exponent = BigUint::from(PUBLIC_EXPONENT);
        let private_key = RsaPrivateKey::new_with_exp(&mut OsRng, MODULUS_BITS, &exponent)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    /// Wrap an existing private key
    pub fn from_private_key(private_key: RsaPrivateKey) -> CryptoResult<Self> {
        let public_key = RsaPublicKey::from(&private_key);
        let exported = Jwk::from_public_key(&public_key).to_json()?;

        Ok(LocalKeyPair {
            private_key,
            public_key,
            exported,
        })
    }

    /// The public key in interchange form, ready to send
    pub fn exported_public_key(&self) -> &str {
        &self.exported
    }

    /// The public half as an encrypt-only handle
    pub fn peer_public_key(&self) -> PeerPublicKey {
        PeerPublicKey(self.public_key.clone())
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl std::fmt::Debug for LocalKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalKeyPair({} bits, private key redacted)", self.public_key.n().bits())
    }
}

/// A peer's public key, usable only to seal messages for that peer
#[derive(Clone, PartialEq, Eq)]
pub struct PeerPublicKey(RsaPublicKey);

impl PeerPublicKey {
    /// Import a key from its interchange representation
    pub fn import(exported: &str) -> CryptoResult<Self> {
        let jwk = Jwk::from_json(exported)?;
        jwk.to_public_key().map(PeerPublicKey)
    }

    /// Modulus size in bytes
    pub fn size(&self) -> usize {
        self.0.size()
    }

    pub(crate) fn as_rsa(&self) -> &RsaPublicKey {
        &self.0
    }
}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerPublicKey({} bits)", self.0.n().bits())
    }
}

/// Where key generation stands for this session
#[derive(Debug, Clone)]
pub enum KeyState {
    /// Generation has not run yet
    Pending,
    /// Keys are available
    Ready(LocalKeyPair),
    /// Generation failed; secure messaging is disabled for the session
    Failed(CryptoError),
}

/// Owns the session's key pair
#[derive(Debug, Clone)]
pub struct KeyPairManager {
    state: KeyState,
}

impl KeyPairManager {
    /// A manager that has not generated keys yet
    pub fn new() -> Self {
        KeyPairManager {
            state: KeyState::Pending,
        }
    }

    /// A manager holding an already generated key pair
    pub fn with_keys(keys: LocalKeyPair) -> Self {
        KeyPairManager {
            state: KeyState::Ready(keys),
        }
    }

    /// Generate the session key pair
    ///
    /// Runs once. Later calls report the outcome of the first attempt
    /// without retrying.
    pub async fn generate(&mut self) -> CryptoResult<()> {
        match &self.state {
            KeyState::Ready(_) => return Ok(()),
            KeyState::Failed(err) => return Err(err.clone()),
            KeyState::Pending => {}
        }

        let result = tokio::task::spawn_blocking(LocalKeyPair::generate_blocking)
            .await
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(keys) => {
                info!("Generated {}-bit session key pair", MODULUS_BITS);
                self.state = KeyState::Ready(keys);
                Ok(())
            }
            Err(err) => {
                warn!("Key generation failed, secure messaging disabled: {}", err);
                self.state = KeyState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// The key pair, if generation succeeded
    pub fn keys(&self) -> Option<&LocalKeyPair> {
        match &self.state {
            KeyState::Ready(keys) => Some(keys),
            _ => None,
        }
    }

    /// Our public key in interchange form, if generation succeeded
    pub fn exported_public_key(&self) -> Option<&str> {
        self.keys().map(LocalKeyPair::exported_public_key)
    }

    /// Current generation state
    pub fn state(&self) -> &KeyState {
        &self.state
    }
}

impl Default for KeyPairManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached key pairs so tests do not pay for RSA generation repeatedly
#[cfg(test)]
pub(crate) mod test_keys {
    use super::LocalKeyPair;
    use std::sync::OnceLock;

    static ALICE: OnceLock<LocalKeyPair> = OnceLock::new();
    static BOB: OnceLock<LocalKeyPair> = OnceLock::new();

    fn cached(slot: &'static OnceLock<LocalKeyPair>) -> LocalKeyPair {
        slot.get_or_init(|| LocalKeyPair::generate_blocking().unwrap())
            .clone()
    }

    pub(crate) fn alice() -> LocalKeyPair {
        cached(&ALICE)
    }

    pub(crate) fn bob() -> LocalKeyPair {
        cached(&BOB)
    }
}
