//! Chat facade for the presentation layer
//!
//! Wires key generation, the roster and the relay session together and
//! exposes the two user actions: open a conversation and send a message.

use tracing::{error, info, warn};

use crate::config::{AvatarBase, ClientConfig};
use crate::crypto::{CipherCodec, KeyPairManager};
use crate::error::{ChatError, ChatResult};
use crate::roster::{Message, RosterStore};
use crate::session::{ConnectionSession, SessionState, SessionUpdate};
use crate::transport::{RelayTransport, TransportSignal};

/// What the presentation layer renders
#[derive(Debug, Clone, Copy)]
pub struct ChatSnapshot<'a> {
    /// Everyone known, with history and handshake status
    pub roster: &'a RosterStore,
    /// Our own name
    pub current_user: &'a str,
}

/// User-facing chat operations over one session
pub struct ChatFacade<T: RelayTransport> {
    session: ConnectionSession<T>,
}

impl<T: RelayTransport> ChatFacade<T> {
    /// Generate keys and open a session for `username`
    ///
    /// A key generation failure is logged and the session still connects,
    /// but it will refuse to seal or open messages.
    pub async fn start(username: &str, config: &ClientConfig, transport: T) -> ChatResult<Self> {
        let mut keys = KeyPairManager::new();
        if let Err(e) = keys.generate().await {
            warn!("Continuing without secure messaging: {}", e);
        }

        Self::start_with_keys(username, config.avatars().clone(), transport, keys).await
    }

    /// Open a session with key material that already exists
    pub async fn start_with_keys(
        username: &str,
        avatars: AvatarBase,
        transport: T,
        keys: KeyPairManager,
    ) -> ChatResult<Self> {
        if username.trim().is_empty() {
            return Err(ChatError::Config("username must not be empty".to_string()));
        }

        let roster = RosterStore::new(avatars);
        let mut session = ConnectionSession::new(username, transport, keys, roster);
        session.open().await?;

        info!("Chat started for {}", username);
        Ok(ChatFacade { session })
    }

    /// Seal `plaintext` for `to_user`, send it, and record it locally
    ///
    /// The sent message is appended to our history as soon as the relay
    /// accepts the command, without waiting for any acknowledgement.
    pub async fn send_message(&mut self, to_user: &str, plaintext: &str) -> ChatResult<()> {
        let result = self.try_send_message(to_user, plaintext).await;
        warn_on_failure("send message", &result);
        result
    }

    /// Begin the key handshake with `to_user`
    pub async fn start_conversation(&mut self, to_user: &str) -> ChatResult<()> {
        let result = self.session.start_conversation(to_user).await;
        warn_on_failure("start conversation", &result);
        result
    }

    /// Wait for the next transport signal; cancel safe
    pub async fn recv_signal(&mut self) -> ChatResult<Option<TransportSignal>> {
        self.session.recv_signal().await
    }

    /// Apply a signal returned by [`recv_signal`](Self::recv_signal)
    pub async fn handle_signal(&mut self, signal: Option<TransportSignal>) -> ChatResult<SessionUpdate> {
        self.session.handle_signal(signal).await
    }

    /// Receive and apply the next transport signal
    pub async fn next_update(&mut self) -> ChatResult<SessionUpdate> {
        self.session.next_update().await
    }

    /// Current state for rendering
    pub fn snapshot(&self) -> ChatSnapshot<'_> {
        ChatSnapshot {
            roster: self.session.roster(),
            current_user: self.session.username(),
        }
    }

    /// Session lifecycle state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The underlying session
    pub fn session(&self) -> &ConnectionSession<T> {
        &self.session
    }

    /// Tear the session down
    pub async fn close(&mut self) -> ChatResult<()> {
        self.session.close().await
    }

    async fn try_send_message(&mut self, to_user: &str, plaintext: &str) -> ChatResult<()> {
        match self.session.state() {
            SessionState::Closed => return Err(ChatError::SessionClosed),
            _ if !self.session.is_ready() => return Err(ChatError::TransportNotReady),
            _ => {}
        }

        if self.session.keys().keys().is_none() {
            return Err(ChatError::KeyGenerationFailure(
                "no local key pair".to_string(),
            ));
        }

        let Some(peer_key) = self.session.roster().peer_key(to_user) else {
            return Err(ChatError::NoSecureChannel(to_user.to_string()));
        };

        let ciphertext = CipherCodec::seal_text(plaintext, peer_key)?;
        self.session.send_sealed(to_user, ciphertext).await?;

        self.session
            .roster_mut()
            .append_message(to_user, Message::sent(plaintext));
        Ok(())
    }
}

fn warn_on_failure(action: &str, result: &ChatResult<()>) {
    if let Err(e) = result {
        if e.is_warning() {
            warn!("Cannot {}: {}", action, e);
        } else {
            error!("{} failed: {}", action, e);
        }
    }
}
