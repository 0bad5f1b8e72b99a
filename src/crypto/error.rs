//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The platform could not produce a key pair
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// A peer's interchange key could not be reconstructed
    #[error("Key import failed: {0}")]
    KeyImport(String),

    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Plaintext does not fit in a single OAEP block
    #[error("Plaintext too long: {len} bytes (max {max})")]
    PlaintextTooLong {
        /// Length of the rejected plaintext in bytes
        len: usize,
        /// Largest plaintext the scheme accepts
        max: usize,
    },

    /// Ciphertext was not produced for this key, or is corrupt
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Decrypted bytes are not valid UTF-8 text
    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
