//! sealchat relay server
//!
//! A WebSocket relay that forwards sealed frames between named participants.
//! The server provides:
//! - Presence: the roster of registered names, broadcast on every change
//! - Handshake brokering: key requests and replies routed by name
//! - Zero-knowledge forwarding (never sees plaintext)
//!
//! Usage:
//!   sealchat-relay [--port 7051] [--host 0.0.0.0]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use sealchat::relay::RelayHub;
use sealchat::transport::RelayCommand;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

/// sealchat relay server
#[derive(Parser)]
#[command(name = "sealchat-relay")]
#[command(about = "WebSocket relay server for sealchat")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7051")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: Arc<RelayHub>) {
    info!("New connection from: {}", addr);

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (id, mut events) = hub.connect().await;

    loop {
        tokio::select! {
            // Commands from the client
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RelayCommand>(&text) {
                            Ok(command) => hub.handle(id, command).await,
                            Err(e) => warn!("Invalid command from {}: {}", addr, e),
                        }
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} disconnected", addr);
                        break;
                    }

                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }

                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }

                    _ => {}
                }
            }

            // Events routed to this client
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if write.send(Message::Text(json)).await.is_err() {
                            warn!("Failed to deliver event to {}", addr);
                            break;
                        }
                    }
                    Err(e) => error!("Failed to encode event for {}: {}", addr, e),
                }
            }
        }
    }

    hub.disconnect(id).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sealchat=info,sealchat_relay=info")),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("sealchat relay listening on ws://{}", addr);

    let hub = Arc::new(RelayHub::new());

    while let Ok((stream, addr)) = listener.accept().await {
        let hub = hub.clone();
        tokio::spawn(handle_connection(stream, addr, hub));
    }

    Ok(())
}
