//! Session-level error taxonomy
//!
//! Every failure here is local to the operation that produced it. None of
//! them tear down the session.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Errors reported by the session and the chat facade
#[derive(Error, Debug)]
pub enum ChatError {
    /// Key pair could not be generated; secure messaging is off for this session
    #[error("Key generation failed: {0}")]
    KeyGenerationFailure(String),

    /// A peer's public key could not be imported
    #[error("Could not import public key from {user}: {reason}")]
    KeyImportFailure {
        /// Peer that sent the key
        user: String,
        /// Why the import failed
        reason: String,
    },

    /// An inbound message could not be opened
    #[error("Could not decrypt message from {0}")]
    DecryptionFailure(String),

    /// No key exchange has completed with this peer yet
    #[error("Connection with {0} not secured yet")]
    NoSecureChannel(String),

    /// The relay connection is not up
    #[error("No connection to server yet")]
    TransportNotReady,

    /// The session was closed and accepts no more commands
    #[error("Session closed")]
    SessionClosed,

    /// Sealing an outbound message failed
    #[error("Encryption error: {0}")]
    Encryption(#[from] CryptoError),

    /// The transport rejected a command
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether this should be shown to the user as a non-fatal warning
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ChatError::NoSecureChannel(_)
                | ChatError::TransportNotReady
                | ChatError::KeyGenerationFailure(_)
                | ChatError::Encryption(CryptoError::PlaintextTooLong { .. })
        )
    }
}

/// Result type for session operations
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_classification() {
        assert!(ChatError::NoSecureChannel("bob".to_string()).is_warning());
        assert!(ChatError::TransportNotReady.is_warning());
        assert!(!ChatError::SessionClosed.is_warning());
        assert!(!ChatError::Config("bad".to_string()).is_warning());
    }

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            ChatError::NoSecureChannel("bob".to_string()).to_string(),
            "Connection with bob not secured yet"
        );
        assert_eq!(
            ChatError::TransportNotReady.to_string(),
            "No connection to server yet"
        );
    }
}
