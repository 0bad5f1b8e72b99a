//! Relay connection session
//!
//! The session owns the transport, the local key pair and the roster. It
//! drives the connection lifecycle and the key handshake:
//!
//! ```text
//! Uninitialized ─open→ Connecting ─ready→ Connected ─Init, bind→ Active
//!                                              ↑                   │ drop
//!                                              └──ready── Reconnecting
//! any ─close→ Closed
//! ```
//!
//! Handshake: `StartConversation(peer)` makes the relay send the peer a
//! key request. The peer answers every key request with its public key,
//! which arrives here as `PublicKeyReceived` and unlocks sending to it.

mod subscription;

pub use subscription::Subscription;

use tracing::{debug, info, warn};

use crate::crypto::{CipherCodec, KeyPairManager, PeerPublicKey};
use crate::error::{ChatError, ChatResult};
use crate::roster::{Message, RosterStore};
use crate::transport::protocol::{
    Interaction, MessageInteraction, PublicKeyInteraction, RelayCommand, RelayEvent,
};
use crate::transport::{
    ConnectionState, EventKind, RelayTransport, TransportError, TransportSignal,
};

/// Lifecycle of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not opened yet
    Uninitialized,
    /// Waiting for the first connection
    Connecting,
    /// Transport is up, registration in progress
    Connected,
    /// Registered with the relay and handling events
    Active,
    /// Lost the connection; the transport is retrying
    Reconnecting,
    /// Torn down; no further commands accepted
    Closed,
}

/// What a processed transport signal changed, for the presentation layer
#[derive(Debug)]
pub enum SessionUpdate {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// The roster was replaced
    RosterChanged,
    /// We answered a key request from this peer
    KeySent(String),
    /// This peer's key was imported; messages can now be sent to it
    PeerSecured(String),
    /// A message from this peer was appended to its history
    MessageReceived(String),
    /// An event was received but not acted on
    Dropped(ChatError),
    /// The relay rejected a command
    RelayError(String),
    /// An event arrived with no handlers bound
    Ignored(EventKind),
    /// The session is closed
    Closed,
}

/// Per-client protocol state machine over a relay transport
pub struct ConnectionSession<T: RelayTransport> {
    username: String,
    transport: T,
    keys: KeyPairManager,
    roster: RosterStore,
    state: SessionState,
    subscription: Option<Subscription>,
    periods: u64,
}

impl<T: RelayTransport> ConnectionSession<T> {
    /// Create a session; nothing is sent until [`open`](Self::open)
    pub fn new(
        username: impl Into<String>,
        transport: T,
        keys: KeyPairManager,
        roster: RosterStore,
    ) -> Self {
        ConnectionSession {
            username: username.into(),
            transport,
            keys,
            roster,
            state: SessionState::Uninitialized,
            subscription: None,
            periods: 0,
        }
    }

    /// Start connecting to the relay
    pub async fn open(&mut self) -> ChatResult<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Closed => return Err(ChatError::SessionClosed),
            _ => return Ok(()),
        }

        info!("Opening session for {}", self.username);
        self.state = SessionState::Connecting;
        self.transport.start().await.map_err(map_transport_error)
    }

    /// Wait for the next transport signal
    ///
    /// Cancel safe: dropping the future loses nothing, so it can sit in a
    /// `select!` next to user input. Feed the result to
    /// [`handle_signal`](Self::handle_signal).
    pub async fn recv_signal(&mut self) -> ChatResult<Option<TransportSignal>> {
        if self.state == SessionState::Closed {
            return Err(ChatError::SessionClosed);
        }

        match self.transport.recv().await {
            Ok(signal) => Ok(Some(signal)),
            Err(TransportError::Closed) => Ok(None),
            Err(e) => Err(ChatError::Transport(e)),
        }
    }

    /// Apply one transport signal; `None` means the transport has shut down
    pub async fn handle_signal(&mut self, signal: Option<TransportSignal>) -> ChatResult<SessionUpdate> {
        if self.state == SessionState::Closed {
            return Ok(SessionUpdate::Closed);
        }

        match signal {
            Some(TransportSignal::State(state)) => Ok(self.on_transport_state(state).await),
            Some(TransportSignal::Event(event)) => Ok(self.dispatch(event).await),
            None => {
                info!("Transport shut down, closing session");
                self.subscription = None;
                self.state = SessionState::Closed;
                Ok(SessionUpdate::Closed)
            }
        }
    }

    /// Receive and apply the next transport signal
    pub async fn next_update(&mut self) -> ChatResult<SessionUpdate> {
        let signal = self.recv_signal().await?;
        self.handle_signal(signal).await
    }

    /// Ask the relay to fetch `to_user`'s public key
    ///
    /// Repeating the call repeats the request.
    pub async fn start_conversation(&mut self, to_user: &str) -> ChatResult<()> {
        self.ensure_ready()?;
        info!("Requesting public key of {}", to_user);

        self.send(RelayCommand::StartConversation {
            to_user: to_user.to_string(),
        })
        .await
    }

    /// Send an already sealed message to `to_user`
    ///
    /// Refused with [`ChatError::NoSecureChannel`] unless `to_user`'s key is known.
    pub async fn send_sealed(&mut self, to_user: &str, ciphertext: Vec<u8>) -> ChatResult<()> {
        self.ensure_ready()?;
        if self.roster.peer_key(to_user).is_none() {
            return Err(ChatError::NoSecureChannel(to_user.to_string()));
        }

        self.send(RelayCommand::SendMessage {
            to_user: to_user.to_string(),
            message: ciphertext,
        })
        .await
    }

    /// Unbind handlers and close the transport
    pub async fn close(&mut self) -> ChatResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        info!("Closing session for {}", self.username);
        self.subscription = None;
        self.state = SessionState::Closed;
        self.transport.close().await.map_err(ChatError::Transport)
    }

    /// Our registered name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Conversation state
    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    /// Local key material
    pub fn keys(&self) -> &KeyPairManager {
        &self.keys
    }

    /// The live handler subscription, if connected
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// How many connected periods the session has gone through
    pub fn connected_periods(&self) -> u64 {
        self.periods
    }

    /// Whether commands can be sent right now
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Active && self.transport.is_connected()
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn roster_mut(&mut self) -> &mut RosterStore {
        &mut self.roster
    }

    fn ensure_ready(&self) -> ChatResult<()> {
        match self.state {
            SessionState::Closed => Err(ChatError::SessionClosed),
            _ if self.is_ready() => Ok(()),
            _ => Err(ChatError::TransportNotReady),
        }
    }

    async fn send(&mut self, command: RelayCommand) -> ChatResult<()> {
        let name = command.name();
        self.transport.send(command).await.map_err(|e| {
            warn!("{} not sent: {}", name, e);
            map_transport_error(e)
        })
    }

    async fn on_transport_state(&mut self, state: ConnectionState) -> SessionUpdate {
        match state {
            ConnectionState::Connected => self.on_connected().await,
            ConnectionState::Connecting => {
                if self.state == SessionState::Uninitialized {
                    self.state = SessionState::Connecting;
                }
                SessionUpdate::StateChanged(self.state)
            }
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                if self.subscription.take().is_some() {
                    info!("Connection lost, waiting for transport to reconnect");
                }
                // Roster is kept until the relay sends a new one
                self.state = SessionState::Reconnecting;
                SessionUpdate::StateChanged(self.state)
            }
        }
    }

    async fn on_connected(&mut self) -> SessionUpdate {
        if self.subscription.is_some() {
            debug!("Duplicate connected signal ignored");
            return SessionUpdate::StateChanged(self.state);
        }

        self.state = SessionState::Connected;
        self.periods += 1;
        self.subscription = Some(Subscription::bind(self.periods));

        let init = RelayCommand::Init {
            username: self.username.clone(),
        };
        if self.send(init).await.is_ok() {
            info!("Registered as {} (connected period {})", self.username, self.periods);
        }

        self.state = SessionState::Active;
        SessionUpdate::StateChanged(self.state)
    }

    async fn dispatch(&mut self, event: RelayEvent) -> SessionUpdate {
        let kind = event.kind();
        if self.subscription.is_none() {
            debug!("No handler bound for {:?}, event dropped", kind);
            return SessionUpdate::Ignored(kind);
        }

        match event {
            RelayEvent::RosterChanged { names } => {
                self.roster.replace_roster(names);
                SessionUpdate::RosterChanged
            }
            RelayEvent::KeyRequested(interaction) => self.on_key_requested(interaction).await,
            RelayEvent::PublicKeyReceived(interaction) => self.on_public_key(interaction),
            RelayEvent::MessageReceived(interaction) => self.on_message(interaction),
            RelayEvent::Error { message } => {
                warn!("Relay error: {}", message);
                SessionUpdate::RelayError(message)
            }
        }
    }

    async fn on_key_requested(&mut self, interaction: Interaction) -> SessionUpdate {
        let from = interaction.from_user;
        debug!("{} requested our public key", from);

        let Some(public_key) = self.keys.exported_public_key().map(str::to_string) else {
            warn!("Cannot answer key request from {}: no local key pair", from);
            return SessionUpdate::Dropped(ChatError::KeyGenerationFailure(
                "no local key pair".to_string(),
            ));
        };

        let reply = RelayCommand::SendPublicKey {
            to_user: from.clone(),
            public_key,
        };
        match self.send(reply).await {
            Ok(()) => SessionUpdate::KeySent(from),
            Err(e) => SessionUpdate::Dropped(e),
        }
    }

    fn on_public_key(&mut self, interaction: PublicKeyInteraction) -> SessionUpdate {
        let from = interaction.from_user;

        match PeerPublicKey::import(&interaction.public_key) {
            Ok(key) => {
                info!("Secure channel with {} established", from);
                self.roster.record_peer_key(&from, key);
                SessionUpdate::PeerSecured(from)
            }
            Err(e) => {
                warn!("Rejected public key from {}: {}", from, e);
                SessionUpdate::Dropped(ChatError::KeyImportFailure {
                    user: from,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn on_message(&mut self, interaction: MessageInteraction) -> SessionUpdate {
        let from = interaction.from_user;

        let Some(keys) = self.keys.keys() else {
            warn!("Dropping message from {}: no local key pair", from);
            return SessionUpdate::Dropped(ChatError::DecryptionFailure(from));
        };

        match CipherCodec::open_text(&interaction.message, keys) {
            Ok(text) => {
                debug!("Message from {} ({} bytes)", from, text.len());
                self.roster.append_message(&from, Message::received(text));
                SessionUpdate::MessageReceived(from)
            }
            Err(e) => {
                warn!("Dropping message from {}: {}", from, e);
                SessionUpdate::Dropped(ChatError::DecryptionFailure(from))
            }
        }
    }
}

fn map_transport_error(err: TransportError) -> ChatError {
    match err {
        TransportError::NotConnected => ChatError::TransportNotReady,
        TransportError::Closed => ChatError::SessionClosed,
        other => ChatError::Transport(other),
    }
}
