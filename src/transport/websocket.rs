//! WebSocket transport for real-time communication via relay server
//!
//! Connects to a sealchat relay and keeps reconnecting after drops, with
//! exponential backoff and jitter between attempts.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    ConnectionState, RelayCommand, RelayEvent, RelayTransport, TransportError, TransportResult,
    TransportSignal,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay before the first retry
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on the delay between retries
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    /// Backoff starting at `initial` and doubling up to `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            current: initial,
            initial,
            max,
        }
    }

    /// Next delay to wait; up to a quarter of it is random jitter
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter_ms = (base.as_millis() / 4) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }

    /// Start over after a successful connect
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// WebSocket transport connected to a relay server
pub struct WebSocketTransport {
    url: Url,
    ws: Option<WsStream>,
    state: ConnectionState,
    pending: VecDeque<TransportSignal>,
    backoff: Backoff,
    /// When the next connect attempt may run; `None` means right away
    retry_at: Option<Instant>,
}

impl WebSocketTransport {
    /// Create a transport for `url`; nothing happens until [`start`](RelayTransport::start)
    pub fn new(url: Url) -> Self {
        WebSocketTransport {
            url,
            ws: None,
            state: ConnectionState::Disconnected,
            pending: VecDeque::new(),
            backoff: Backoff::default(),
            retry_at: None,
        }
    }

    /// Use a custom retry schedule
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn transition(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.pending.push_back(TransportSignal::State(state));
        }
    }

    /// One connection attempt, waiting for the retry deadline first
    ///
    /// Cancel safe: the deadline is only moved after an attempt has
    /// actually failed, so a dropped `recv` resumes the same wait.
    async fn try_connect(&mut self) {
        if let Some(deadline) = self.retry_at {
            tokio::time::sleep_until(deadline).await;
        }

        match connect_async(self.url.as_str()).await {
            Ok((ws, _)) => {
                info!("Connected to relay at {}", self.url);
                self.ws = Some(ws);
                self.backoff.reset();
                self.retry_at = None;
                self.transition(ConnectionState::Connected);
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!("Failed to connect to relay at {}: {}", self.url, e);
                debug!("Retrying relay connection in {:?}", delay);
                self.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        warn!("Relay connection lost: {}", reason);
        self.ws = None;
        self.transition(ConnectionState::Reconnecting);
    }
}

#[async_trait]
impl RelayTransport for WebSocketTransport {
    async fn start(&mut self) -> TransportResult<()> {
        if self.state == ConnectionState::Disconnected && self.ws.is_none() {
            self.transition(ConnectionState::Connecting);
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn send(&mut self, command: RelayCommand) -> TransportResult<()> {
        let Some(ws) = self.ws.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let json = serde_json::to_string(&command)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if let Err(e) = ws.send(Message::Text(json)).await {
            self.connection_lost(&e.to_string());
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> TransportResult<TransportSignal> {
        loop {
            if let Some(signal) = self.pending.pop_front() {
                return Ok(signal);
            }

            match self.state {
                ConnectionState::Disconnected => return Err(TransportError::Closed),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    self.try_connect().await;
                    continue;
                }
                ConnectionState::Connected => {}
            }

            let Some(ws) = self.ws.as_mut() else {
                self.connection_lost("stream missing");
                continue;
            };

            match ws.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<RelayEvent>(&text) {
                    Ok(event) => return Ok(TransportSignal::Event(event)),
                    Err(e) => warn!("Ignoring malformed relay frame: {}", e),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => self.connection_lost("closed by relay"),
                Some(Err(e)) => self.connection_lost(&e.to_string()),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.state = ConnectionState::Disconnected;
        self.pending.clear();

        if let Some(mut ws) = self.ws.take() {
            ws.close(None)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use crate::config::AvatarBase;
    use crate::crypto::KeyPairManager;
    use crate::roster::RosterStore;
    use crate::session::{ConnectionSession, SessionState, SessionUpdate};

    type ServerStream = WebSocketStream<TcpStream>;

    async fn accept_one(listener: &TcpListener) -> ServerStream {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn next_command(ws: &mut ServerStream) -> RelayCommand {
        loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));

        let third = backoff.next_delay();
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));

        let capped = backoff.next_delay();
        assert!(capped >= Duration::from_millis(400) && capped <= Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert!(backoff.next_delay() <= Duration::from_millis(125));
    }

    #[tokio::test]
    async fn test_start_reports_connecting() {
        let url = Url::parse("ws://127.0.0.1:1/chat").unwrap();
        let mut transport = WebSocketTransport::new(url);

        transport.start().await.unwrap();

        assert_eq!(transport.state(), ConnectionState::Connecting);
        assert_eq!(
            transport.recv().await.unwrap(),
            TransportSignal::State(ConnectionState::Connecting)
        );
    }

    #[tokio::test]
    async fn test_send_while_not_connected_fails() {
        let url = Url::parse("ws://127.0.0.1:1/chat").unwrap();
        let mut transport = WebSocketTransport::new(url);
        transport.start().await.unwrap();

        let result = transport
            .send(RelayCommand::StartConversation {
                to_user: "bob".to_string(),
            })
            .await;

        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_closed_transport_stops_receiving() {
        let url = Url::parse("ws://127.0.0.1:1/chat").unwrap();
        let mut transport = WebSocketTransport::new(url);
        transport.start().await.unwrap();

        transport.close().await.unwrap();

        assert_eq!(transport.recv().await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_cancelled_recv_keeps_retry_schedule() {
        let url = Url::parse("ws://127.0.0.1:1/chat").unwrap();
        let mut transport = WebSocketTransport::new(url)
            .with_backoff(Backoff::new(Duration::from_millis(500), Duration::from_secs(30)));
        transport.start().await.unwrap();
        transport.recv().await.unwrap();

        // The first attempt is refused at once and schedules a retry
        let first = tokio::time::timeout(Duration::from_millis(200), transport.recv()).await;
        assert!(first.is_err());
        let deadline = transport.retry_at;
        assert!(deadline.is_some());

        // Dropping recv while it waits must not push the retry further out
        for _ in 0..6 {
            let cancelled = tokio::time::timeout(Duration::from_millis(20), transport.recv()).await;
            assert!(cancelled.is_err());
        }

        assert_eq!(transport.retry_at, deadline);
        assert_eq!(transport.backoff.current, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_session_reregisters_after_relay_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/chat", listener.local_addr().unwrap())).unwrap();
        let (seen_tx, mut seen) = tokio::sync::mpsc::unbounded_channel();

        let server = tokio::spawn(async move {
            // First connection: take the registration, then hang up
            let mut ws = accept_one(&listener).await;
            seen_tx.send(next_command(&mut ws).await).unwrap();
            ws.close(None).await.unwrap();

            let mut ws = accept_one(&listener).await;
            seen_tx.send(next_command(&mut ws).await).unwrap();
            ws
        });

        let transport = WebSocketTransport::new(url)
            .with_backoff(Backoff::new(Duration::from_millis(10), Duration::from_millis(50)));
        let roster = RosterStore::new(AvatarBase::parse("https://avatars.example.com").unwrap());
        let mut session = ConnectionSession::new("alice", transport, KeyPairManager::new(), roster);
        session.open().await.unwrap();

        let mut states = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while states.len() < 4 {
                if let SessionUpdate::StateChanged(state) = session.next_update().await.unwrap() {
                    states.push(state);
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Active,
                SessionState::Reconnecting,
                SessionState::Active,
            ]
        );
        assert_eq!(session.connected_periods(), 2);
        assert_eq!(session.transport().state(), ConnectionState::Connected);

        let init = RelayCommand::Init {
            username: "alice".to_string(),
        };
        assert_eq!(seen.recv().await, Some(init.clone()));
        assert_eq!(seen.recv().await, Some(init));

        let _ws = server.await.unwrap();
    }
}
