//! In-memory transport for testing
//!
//! Connects straight to a [`RelayHub`] in the same process. A [`MemoryLink`]
//! handle lets a test cut and restore the connection, and records every
//! command the transport sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ConnectionState, RelayCommand, RelayEvent, RelayTransport, TransportError, TransportResult,
    TransportSignal,
};
use crate::relay::{ConnectionId, EventReceiver, RelayHub};

/// Connection control requests from a [`MemoryLink`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkControl {
    Drop,
    Restore,
}

/// What woke up a pending `recv`
enum Wake {
    Control(Option<LinkControl>),
    Event(Option<RelayEvent>),
}

/// Test handle for a [`MemoryTransport`]
#[derive(Clone)]
pub struct MemoryLink {
    control: mpsc::UnboundedSender<LinkControl>,
    sent: Arc<Mutex<Vec<RelayCommand>>>,
}

impl MemoryLink {
    /// Simulate losing the connection to the relay
    pub fn drop_connection(&self) {
        let _ = self.control.send(LinkControl::Drop);
    }

    /// Let the transport reconnect after a drop
    pub fn restore_connection(&self) {
        let _ = self.control.send(LinkControl::Restore);
    }

    /// Every command the transport has sent so far
    pub fn sent_commands(&self) -> Vec<RelayCommand> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

/// In-memory transport endpoint
pub struct MemoryTransport {
    hub: Arc<RelayHub>,
    state: ConnectionState,
    connection: Option<(ConnectionId, EventReceiver)>,
    control_rx: mpsc::UnboundedReceiver<LinkControl>,
    control_open: bool,
    pending: VecDeque<TransportSignal>,
    sent: Arc<Mutex<Vec<RelayCommand>>>,
    closed: bool,
}

impl MemoryTransport {
    /// Create a transport for `hub` and its control handle
    pub fn new(hub: Arc<RelayHub>) -> (Self, MemoryLink) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));

        let transport = MemoryTransport {
            hub,
            state: ConnectionState::Disconnected,
            connection: None,
            control_rx,
            control_open: true,
            pending: VecDeque::new(),
            sent: sent.clone(),
            closed: false,
        };

        (transport, MemoryLink { control, sent })
    }

    fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        self.pending.push_back(TransportSignal::State(state));
    }

    async fn attach(&mut self) {
        let connection = self.hub.connect().await;
        debug!("Memory transport attached as connection {}", connection.0);
        self.connection = Some(connection);
        self.transition(ConnectionState::Connected);
    }

    async fn detach(&mut self) {
        if let Some((id, _)) = self.connection.take() {
            self.hub.disconnect(id).await;
        }
    }

    async fn apply(&mut self, control: LinkControl) {
        match control {
            LinkControl::Drop if self.connection.is_some() => {
                self.detach().await;
                self.transition(ConnectionState::Reconnecting);
            }
            LinkControl::Restore if self.connection.is_none() && !self.closed => {
                self.attach().await;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn start(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);
        self.attach().await;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn send(&mut self, command: RelayCommand) -> TransportResult<()> {
        let Some((id, _)) = &self.connection else {
            return Err(TransportError::NotConnected);
        };
        let id = *id;

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(command.clone());
        }
        self.hub.handle(id, command).await;
        Ok(())
    }

    async fn recv(&mut self) -> TransportResult<TransportSignal> {
        loop {
            if let Some(signal) = self.pending.pop_front() {
                return Ok(signal);
            }
            if self.closed {
                return Err(TransportError::Closed);
            }

            let control_open = self.control_open;
            let wake = match self.connection.as_mut() {
                Some((_, events)) => tokio::select! {
                    biased;
                    control = self.control_rx.recv(), if control_open => Wake::Control(control),
                    event = events.recv() => Wake::Event(event),
                },
                None if control_open => Wake::Control(self.control_rx.recv().await),
                None => return Err(TransportError::Closed),
            };

            match wake {
                Wake::Control(Some(control)) => self.apply(control).await,
                Wake::Control(None) => self.control_open = false,
                Wake::Event(Some(event)) => return Ok(TransportSignal::Event(event)),
                Wake::Event(None) => {
                    self.connection = None;
                    self.transition(ConnectionState::Reconnecting);
                }
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.detach().await;
        self.closed = true;
        self.state = ConnectionState::Disconnected;
        self.pending.clear();
        Ok(())
    }
}
