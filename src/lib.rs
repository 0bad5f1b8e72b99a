//! # sealchat
//!
//! Peer-to-peer end-to-end encrypted chat over a blind relay.
//!
//! ## Features
//!
//! - **RSA-OAEP sealing** of every message for the recipient's public key
//! - **On-demand key handshake** brokered by the relay
//! - **Auto-reconnecting transport** that re-registers after every drop
//! - **Roster merge** that keeps history across presence updates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sealchat::{ChatFacade, ClientConfig, transport::WebSocketTransport};
//!
//! # async fn run() -> sealchat::ChatResult<()> {
//! let config = ClientConfig::new("ws://localhost:7051/chat", "https://avatars.example.com")?;
//! let transport = WebSocketTransport::new(config.relay_url().clone());
//! let mut chat = ChatFacade::start("alice", &config, transport).await?;
//!
//! chat.start_conversation("bob").await?;
//! loop {
//!     let update = chat.next_update().await?;
//!     println!("{:?}", update);
//! }
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             PRESENTATION LAYER              │
//! │        CLI  |  any UI over ChatFacade       │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               SESSION LAYER                 │
//! │  ChatFacade | ConnectionSession | Roster    │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │     RSA-OAEP-2048 (SHA-256) | JWK export    │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │      WebSocket (reconnecting) | Memory      │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod relay;
pub mod roster;
pub mod session;
pub mod transport;

// Re-export main types at crate root
pub use chat::{ChatFacade, ChatSnapshot};
pub use config::{AvatarBase, ClientConfig};
pub use crypto::{CipherCodec, CryptoError, KeyPairManager, LocalKeyPair, PeerPublicKey};
pub use error::{ChatError, ChatResult};
pub use roster::{ConversationEntry, Direction, Message, RosterStore};
pub use session::{ConnectionSession, SessionState, SessionUpdate};
