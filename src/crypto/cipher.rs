//! RSA-OAEP (SHA-256) message sealing
//!
//! Each chat message is sealed as a single OAEP block for the recipient's
//! public key and opened with the local private key. The codec holds no
//! state.

use rsa::Oaep;
use sha2::Sha256;

use super::error::{CryptoError, CryptoResult};
use super::keypair::{LocalKeyPair, PeerPublicKey};

/// Output size of the OAEP hash in bytes
pub const OAEP_HASH_SIZE: usize = 32;

/// Stateless seal/open over RSA-OAEP
pub struct CipherCodec;

impl CipherCodec {
    /// Largest plaintext that fits in one block for this key
    pub fn max_plaintext_len(recipient: &PeerPublicKey) -> usize {
        recipient.size().saturating_sub(2 * OAEP_HASH_SIZE + 2)
    }

    /// Encrypt `plaintext` so only the holder of the matching private key can read it
    pub fn seal(plaintext: &[u8], recipient: &PeerPublicKey) -> CryptoResult<Vec<u8>> {
        let max = Self::max_plaintext_len(recipient);
        if plaintext.len() > max {
            return Err(CryptoError::PlaintextTooLong {
                len: plaintext.len(),
                max,
            });
        }

        recipient
            .as_rsa()
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt a block sealed for our public key
    pub fn open(ciphertext: &[u8], local: &LocalKeyPair) -> CryptoResult<Vec<u8>> {
        local
            .private_key()
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Seal UTF-8 text
    pub fn seal_text(text: &str, recipient: &PeerPublicKey) -> CryptoResult<Vec<u8>> {
        Self::seal(text.as_bytes(), recipient)
    }

    /// Open a block and decode it as UTF-8 text
    pub fn open_text(ciphertext: &[u8], local: &LocalKeyPair) -> CryptoResult<String> {
        let bytes = Self::open(ciphertext, local)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
    }
}
