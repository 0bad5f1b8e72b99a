//! Relay routing
//!
//! The relay forwards opaque frames between named participants and never
//! sees plaintext. It keeps the roster of registered names, broadcasts it on
//! every change, and rewrites peer-addressed commands into events for the
//! addressee. It never echoes a command back to its sender.
//!
//! Each connection has a bounded event queue. A client that lets its queue
//! fill up is disconnected.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::transport::protocol::{
    Interaction, MessageInteraction, PublicKeyInteraction, RelayCommand, RelayEvent,
};

/// Identifies one live connection to the relay
pub type ConnectionId = u64;

/// Outbound event queue of one connection
pub type EventSender = mpsc::Sender<RelayEvent>;

/// Receiving end of a connection's event queue
pub type EventReceiver = mpsc::Receiver<RelayEvent>;

/// Events buffered per connection before it counts as stalled
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// One connected client
struct Client {
    tx: EventSender,
    username: Option<String>,
}

/// Hub state
#[derive(Default)]
struct HubState {
    next_id: ConnectionId,
    clients: HashMap<ConnectionId, Client>,
    /// Registered name → owning connection
    users: HashMap<String, ConnectionId>,
    /// Connections whose queue overflowed, pending eviction
    stalled: Vec<ConnectionId>,
}

impl HubState {
    fn roster(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Queue `event` for connection `id`
    fn push(&mut self, id: ConnectionId, event: RelayEvent) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };

        match client.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if !self.stalled.contains(&id) {
                    self.stalled.push(id);
                }
            }
            Err(TrySendError::Closed(_)) => debug!("Dropping event for connection {}: gone", id),
        }
    }

    fn broadcast_roster(&mut self) {
        let names = self.roster();
        info!("Roster: {:?}", names);

        let registered: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.username.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in registered {
            self.push(id, RelayEvent::RosterChanged {
                names: names.clone(),
            });
        }
    }

    fn deliver(&mut self, to_user: &str, event: RelayEvent) -> bool {
        let Some(id) = self.users.get(to_user).copied() else {
            return false;
        };
        self.push(id, event);
        true
    }

    fn reply_error(&mut self, id: ConnectionId, message: impl Into<String>) {
        self.push(id, RelayEvent::Error {
            message: message.into(),
        });
    }

    fn unregister(&mut self, id: ConnectionId) -> bool {
        let Some(name) = self.clients.get_mut(&id).and_then(|c| c.username.take()) else {
            return false;
        };

        if self.users.get(&name) == Some(&id) {
            self.users.remove(&name);
            return true;
        }
        false
    }

    /// Disconnect stalled clients; their names leave the roster
    fn evict_stalled(&mut self) {
        while !self.stalled.is_empty() {
            let mut roster_changed = false;
            for id in std::mem::take(&mut self.stalled) {
                warn!("Connection {} is not draining its events, disconnecting", id);
                roster_changed |= self.unregister(id);
                // Dropping the sender ends the client's event stream
                self.clients.remove(&id);
            }
            if roster_changed {
                self.broadcast_roster();
            }
        }
    }
}

/// Routes commands from connected clients
pub struct RelayHub {
    state: Mutex<HubState>,
    capacity: usize,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl RelayHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub buffering at most `capacity` events per connection
    pub fn with_capacity(capacity: usize) -> Self {
        RelayHub {
            state: Mutex::new(HubState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Accept a new connection and hand back its event queue
    pub async fn connect(&self) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.state.lock().await;

        let id = state.next_id;
        state.next_id += 1;
        state.clients.insert(id, Client { tx, username: None });

        debug!("Connection {} opened", id);
        (id, rx)
    }

    /// Forget a connection; its name leaves the roster
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut state = self.state.lock().await;

        let was_registered = state.unregister(id);
        state.clients.remove(&id);
        debug!("Connection {} closed", id);

        if was_registered {
            state.broadcast_roster();
        }
        state.evict_stalled();
    }

    /// Handle one command from connection `id`
    pub async fn handle(&self, id: ConnectionId, command: RelayCommand) {
        let mut state = self.state.lock().await;
        route(&mut state, id, command);
        state.evict_stalled();
    }

    /// Currently registered names, sorted
    pub async fn online(&self) -> Vec<String> {
        self.state.lock().await.roster()
    }
}

fn route(state: &mut HubState, id: ConnectionId, command: RelayCommand) {
    if !state.clients.contains_key(&id) {
        warn!("Command from unknown connection {}", id);
        return;
    }

    if let RelayCommand::Init { username } = command {
        if username.is_empty() {
            state.reply_error(id, "Username must not be empty");
            return;
        }

        state.unregister(id);

        // Last registration wins
        if let Some(previous) = state.users.insert(username.clone(), id) {
            if previous != id {
                if let Some(client) = state.clients.get_mut(&previous) {
                    client.username = None;
                }
            }
        }
        if let Some(client) = state.clients.get_mut(&id) {
            client.username = Some(username.clone());
        }

        info!("{} registered on connection {}", username, id);
        state.broadcast_roster();
        return;
    }

    let Some(from_user) = state.clients.get(&id).and_then(|c| c.username.clone()) else {
        state.reply_error(id, "Not registered");
        return;
    };

    let (to_user, event) = match command {
        RelayCommand::StartConversation { to_user } => {
            let event = RelayEvent::KeyRequested(Interaction {
                from_user,
                to_user: to_user.clone(),
            });
            (to_user, event)
        }
        RelayCommand::SendPublicKey {
            to_user,
            public_key,
        } => {
            let event = RelayEvent::PublicKeyReceived(PublicKeyInteraction {
                from_user,
                to_user: to_user.clone(),
                public_key,
            });
            (to_user, event)
        }
        RelayCommand::SendMessage { to_user, message } => {
            let event = RelayEvent::MessageReceived(MessageInteraction {
                from_user,
                to_user: to_user.clone(),
                message,
            });
            (to_user, event)
        }
        RelayCommand::Init { .. } => return,
    };

    if state.users.get(&to_user) == Some(&id) {
        state.reply_error(id, "Cannot address yourself");
        return;
    }

    if !state.deliver(&to_user, event) {
        state.reply_error(id, format!("User not found: {}", to_user));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn register(hub: &RelayHub, name: &str) -> (ConnectionId, EventReceiver) {
        let (id, rx) = hub.connect().await;
        hub.handle(
            id,
            RelayCommand::Init {
                username: name.to_string(),
            },
        )
        .await;
        (id, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn roster(names: &[&str]) -> RelayEvent {
        RelayEvent::RosterChanged {
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_roster_broadcast_on_join_and_leave() {
        let hub = RelayHub::new();
        let (alice_id, mut alice) = register(&hub, "alice").await;
        let (bob_id, mut bob) = register(&hub, "bob").await;

        assert_eq!(drain(&mut alice), vec![roster(&["alice"]), roster(&["alice", "bob"])]);
        assert_eq!(drain(&mut bob), vec![roster(&["alice", "bob"])]);

        hub.disconnect(bob_id).await;
        assert_eq!(drain(&mut alice), vec![roster(&["alice"])]);
        assert_eq!(hub.online().await, vec!["alice".to_string()]);

        hub.disconnect(alice_id).await;
        assert!(hub.online().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_conversation_routes_key_request() {
        let hub = RelayHub::new();
        let (alice_id, mut alice) = register(&hub, "alice").await;
        let (_, mut bob) = register(&hub, "bob").await;
        drain(&mut alice);
        drain(&mut bob);

        hub.handle(
            alice_id,
            RelayCommand::StartConversation {
                to_user: "bob".to_string(),
            },
        )
        .await;

        assert_eq!(
            drain(&mut bob),
            vec![RelayEvent::KeyRequested(Interaction {
                from_user: "alice".to_string(),
                to_user: "bob".to_string(),
            })]
        );
        // No echo to the sender
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn test_public_key_and_message_routing() {
        let hub = RelayHub::new();
        let (alice_id, mut alice) = register(&hub, "alice").await;
        let (bob_id, mut bob) = register(&hub, "bob").await;
        drain(&mut alice);
        drain(&mut bob);

        hub.handle(
            bob_id,
            RelayCommand::SendPublicKey {
                to_user: "alice".to_string(),
                public_key: "jwk".to_string(),
            },
        )
        .await;
        hub.handle(
            alice_id,
            RelayCommand::SendMessage {
                to_user: "bob".to_string(),
                message: vec![1, 2, 3],
            },
        )
        .await;

        assert_eq!(
            drain(&mut alice),
            vec![RelayEvent::PublicKeyReceived(PublicKeyInteraction {
                from_user: "bob".to_string(),
                to_user: "alice".to_string(),
                public_key: "jwk".to_string(),
            })]
        );
        assert_eq!(
            drain(&mut bob),
            vec![RelayEvent::MessageReceived(MessageInteraction {
                from_user: "alice".to_string(),
                to_user: "bob".to_string(),
                message: vec![1, 2, 3],
            })]
        );
    }

    #[tokio::test]
    async fn test_unregistered_and_unknown_targets_get_errors() {
        let hub = RelayHub::new();
        let (anon_id, mut anon) = hub.connect().await;

        hub.handle(
            anon_id,
            RelayCommand::StartConversation {
                to_user: "bob".to_string(),
            },
        )
        .await;
        assert!(matches!(drain(&mut anon).as_slice(), [RelayEvent::Error { .. }]));

        let (alice_id, mut alice) = register(&hub, "alice").await;
        drain(&mut alice);
        hub.handle(
            alice_id,
            RelayCommand::SendMessage {
                to_user: "nobody".to_string(),
                message: vec![9],
            },
        )
        .await;
        assert!(matches!(
            drain(&mut alice).as_slice(),
            [RelayEvent::Error { message }] if message.contains("nobody")
        ));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let hub = RelayHub::new();
        let (first_id, mut first) = register(&hub, "alice").await;
        let (_, mut second) = register(&hub, "alice").await;
        drain(&mut first);
        drain(&mut second);

        let (bob_id, _bob) = register(&hub, "bob").await;
        hub.handle(
            bob_id,
            RelayCommand::StartConversation {
                to_user: "alice".to_string(),
            },
        )
        .await;

        assert!(drain(&mut first)
            .iter()
            .all(|e| !matches!(e, RelayEvent::KeyRequested(_))));
        assert!(drain(&mut second)
            .iter()
            .any(|e| matches!(e, RelayEvent::KeyRequested(_))));

        // The displaced connection leaving does not remove the name
        hub.disconnect(first_id).await;
        assert_eq!(hub.online().await, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let hub = RelayHub::new();
        let (_, mut rx) = register(&hub, "").await;

        assert!(matches!(drain(&mut rx).as_slice(), [RelayEvent::Error { .. }]));
        assert!(hub.online().await.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_client_is_disconnected() {
        let hub = RelayHub::with_capacity(2);
        let (alice_id, mut alice) = register(&hub, "alice").await;
        let (_, mut bob) = register(&hub, "bob").await;
        drain(&mut alice);
        // bob holds one roster event and never reads again

        for n in 0..2u8 {
            hub.handle(
                alice_id,
                RelayCommand::SendMessage {
                    to_user: "bob".to_string(),
                    message: vec![n],
                },
            )
            .await;
        }

        assert_eq!(hub.online().await, vec!["alice".to_string()]);
        assert_eq!(drain(&mut alice), vec![roster(&["alice"])]);

        // bob's queue still yields what was buffered, then ends
        let buffered = drain(&mut bob);
        assert_eq!(buffered.len(), 2);
        assert!(bob.recv().await.is_none());

        // Messages to bob now bounce
        hub.handle(
            alice_id,
            RelayCommand::SendMessage {
                to_user: "bob".to_string(),
                message: vec![9],
            },
        )
        .await;
        assert!(matches!(drain(&mut alice).as_slice(), [RelayEvent::Error { .. }]));
    }
}
