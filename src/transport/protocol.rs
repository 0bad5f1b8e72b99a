//! Relay wire protocol
//!
//! Every frame is a JSON object `{"type": <name>, "data": <payload>}`.
//! Ciphertext travels as an array of byte values so it survives the relay's
//! JSON serialization untouched.

use serde::{Deserialize, Serialize};

/// Addressing shared by all peer-to-peer events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    /// Sender as registered with the relay
    pub from_user: String,
    /// Recipient as registered with the relay
    pub to_user: String,
}

/// A peer's exported public key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInteraction {
    /// Sender as registered with the relay
    pub from_user: String,
    /// Recipient as registered with the relay
    pub to_user: String,
    /// JWK document as a string
    pub public_key: String,
}

/// A sealed chat message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInteraction {
    /// Sender as registered with the relay
    pub from_user: String,
    /// Recipient as registered with the relay
    pub to_user: String,
    /// Ciphertext bytes
    pub message: Vec<u8>,
}

/// Events pushed by the relay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayEvent {
    /// The set of registered participants changed
    #[serde(rename = "ListUsers")]
    RosterChanged {
        /// Everyone currently registered, including ourselves
        names: Vec<String>,
    },
    /// A peer wants our public key
    #[serde(rename = "RequestedPublicKey")]
    KeyRequested(Interaction),
    /// A peer answered our key request
    #[serde(rename = "ReceivedPublicKey")]
    PublicKeyReceived(PublicKeyInteraction),
    /// A peer sent us a sealed message
    #[serde(rename = "ReceivedMessage")]
    MessageReceived(MessageInteraction),
    /// The relay rejected one of our commands
    Error {
        /// Human-readable reason
        message: String,
    },
}

/// Kinds of relay events a session can subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `ListUsers`
    RosterChanged,
    /// `RequestedPublicKey`
    KeyRequested,
    /// `ReceivedPublicKey`
    PublicKeyReceived,
    /// `ReceivedMessage`
    MessageReceived,
    /// `Error`
    RelayError,
}

impl RelayEvent {
    /// Which kind of event this is
    pub fn kind(&self) -> EventKind {
        match self {
            RelayEvent::RosterChanged { .. } => EventKind::RosterChanged,
            RelayEvent::KeyRequested(_) => EventKind::KeyRequested,
            RelayEvent::PublicKeyReceived(_) => EventKind::PublicKeyReceived,
            RelayEvent::MessageReceived(_) => EventKind::MessageReceived,
            RelayEvent::Error { .. } => EventKind::RelayError,
        }
    }
}

/// Commands sent to the relay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayCommand {
    /// Register our name with the relay
    Init {
        /// Local display name
        username: String,
    },
    /// Ask the relay to request `to_user`'s public key on our behalf
    StartConversation {
        /// Peer we want to talk to
        #[serde(rename = "toUser")]
        to_user: String,
    },
    /// Answer a key request
    SendPublicKey {
        /// Peer that asked
        #[serde(rename = "toUser")]
        to_user: String,
        /// Our JWK document
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    /// Deliver a sealed message
    SendMessage {
        /// Recipient
        #[serde(rename = "toUser")]
        to_user: String,
        /// Ciphertext bytes
        message: Vec<u8>,
    },
}

impl RelayCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            RelayCommand::Init { .. } => "Init",
            RelayCommand::StartConversation { .. } => "StartConversation",
            RelayCommand::SendPublicKey { .. } => "SendPublicKey",
            RelayCommand::SendMessage { .. } => "SendMessage",
        }
    }
}
