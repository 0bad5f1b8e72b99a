//! sealchat CLI client
//!
//! A line-oriented terminal front end: connects to a relay, lists who is
//! online, and exchanges end-to-end encrypted messages.

use anyhow::Context;
use clap::Parser;
use sealchat::{
    config::{DEFAULT_AVATAR_BASE, DEFAULT_RELAY_URL},
    transport::WebSocketTransport,
    ChatError, ChatFacade, ClientConfig, Direction, SessionState, SessionUpdate,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// sealchat: end-to-end encrypted chat over a blind relay
#[derive(Parser)]
#[command(name = "sealchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Name to register with the relay
    username: String,

    /// Relay WebSocket endpoint
    #[arg(long, env = "SEALCHAT_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// Base URL for avatar pictures
    #[arg(long, env = "SEALCHAT_AVATAR_BASE", default_value = DEFAULT_AVATAR_BASE)]
    avatar_base: String,
}

/// A parsed input line
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Open(&'a str),
    Send(&'a str, &'a str),
    Who,
    History(&'a str),
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Option<Input<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    Some(match command {
        "/open" if !rest.is_empty() => Input::Open(rest),
        "/msg" => match rest.split_once(' ') {
            Some((peer, text)) if !text.trim().is_empty() => Input::Send(peer, text.trim()),
            _ => Input::Unknown(line),
        },
        "/who" => Input::Who,
        "/history" if !rest.is_empty() => Input::History(rest),
        "/help" => Input::Help,
        "/quit" => Input::Quit,
        _ => Input::Unknown(line),
    })
}

fn print_help() {
    println!("Commands:");
    println!("  /open <peer>          Exchange keys with a peer");
    println!("  /msg <peer> <text>    Send an encrypted message");
    println!("  /who                  List online participants");
    println!("  /history <peer>       Show the conversation with a peer");
    println!("  /quit                 Leave");
}

fn report(result: Result<(), ChatError>) {
    if let Err(e) = result {
        if e.is_warning() {
            println!("⚠ {}", e);
        } else {
            println!("✗ {}", e);
        }
    }
}

fn show_update(chat: &ChatFacade<WebSocketTransport>, update: &SessionUpdate) {
    let snapshot = chat.snapshot();

    match update {
        SessionUpdate::StateChanged(SessionState::Active) => {
            println!("● Connected as {}", snapshot.current_user);
        }
        SessionUpdate::StateChanged(SessionState::Reconnecting) => {
            println!("○ Connection lost, reconnecting...");
        }
        SessionUpdate::RosterChanged => {
            let others: Vec<&str> = snapshot
                .roster
                .names()
                .into_iter()
                .filter(|name| *name != snapshot.current_user)
                .collect();
            println!("Online: {}", others.join(", "));
        }
        SessionUpdate::PeerSecured(peer) => {
            println!("🔒 Secure channel with {} ready", peer);
        }
        SessionUpdate::MessageReceived(peer) => {
            if let Some(message) = snapshot
                .roster
                .get(peer)
                .and_then(|entry| entry.history().last())
            {
                println!("[{}] {}: {}", message.timestamp.format("%H:%M"), peer, message.text);
            }
        }
        SessionUpdate::RelayError(message) => println!("✗ relay: {}", message),
        _ => {}
    }
}

fn show_history(chat: &ChatFacade<WebSocketTransport>, peer: &str) {
    let snapshot = chat.snapshot();
    let Some(entry) = snapshot.roster.get(peer) else {
        println!("No conversation with {}", peer);
        return;
    };

    let lock = if entry.is_secured() { "🔒" } else { "🔓" };
    println!("{} {} ({})", lock, entry.display_name(), entry.picture_ref());
    for message in entry.history() {
        let who = match message.direction {
            Direction::Sent => snapshot.current_user,
            Direction::Received => peer,
        };
        println!("[{}] {}: {}", message.timestamp.format("%H:%M"), who, message.text);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sealchat=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config =
        ClientConfig::new(&cli.relay_url, &cli.avatar_base).context("invalid configuration")?;

    println!("Generating session keys...");
    let transport = WebSocketTransport::new(config.relay_url().clone());
    let mut chat = ChatFacade::start(&cli.username, &config, transport)
        .await
        .context("failed to start chat")?;
    println!("Connecting to {} (type /help for commands)", config.relay_url());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            signal = chat.recv_signal() => {
                let update = chat.handle_signal(signal?).await?;
                show_update(&chat, &update);
                if matches!(update, SessionUpdate::Closed) {
                    break;
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Some(Input::Open(peer)) => report(chat.start_conversation(peer).await),
                    Some(Input::Send(peer, text)) => report(chat.send_message(peer, text).await),
                    Some(Input::Who) => show_update(&chat, &SessionUpdate::RosterChanged),
                    Some(Input::History(peer)) => show_history(&chat, peer),
                    Some(Input::Help) => print_help(),
                    Some(Input::Quit) => break,
                    Some(Input::Unknown(text)) => println!("Unknown command: {} (try /help)", text),
                    None => {}
                }
            }
        }
    }

    chat.close().await?;
    println!("Goodbye");
    Ok(())
}
