//! Dealroom terminal client.
//!
//! # Usage
//!
//! ```bash
//! DEALROOM_TOKEN=<jwt> dealroom --user-id 42 \
//!     --url wss://chat.example.com/ws --api https://api.example.com
//! ```
//!
//! Lines typed at the prompt are sent to the open conversation. Commands:
//!
//! - `/list`: show conversations and unread counts
//! - `/open <id>`: make a conversation active
//! - `/close`: close the active conversation
//! - `/read`: mark the active conversation read
//! - `/quit`: disconnect and exit

use std::{io::Write, sync::Arc};

use clap::Parser;
use dealroom_app::{Runtime, RuntimeConfig, RuntimeHandle, Snapshot};
use dealroom_client::{
    ClientIdentity, ClientNotification, Credential, CredentialSource, StaticCredential,
};
use dealroom_core::PresenceChange;
use dealroom_proto::{ConversationId, SendMessagePayload, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Dealroom conversation client
#[derive(Parser, Debug)]
#[command(name = "dealroom")]
#[command(about = "Terminal client for Dealroom conversations")]
#[command(version)]
struct Args {
    /// WebSocket endpoint carrying STOMP frames
    #[arg(long, env = "DEALROOM_WS_URL", default_value = "ws://localhost:8080/ws")]
    url: String,

    /// Base URL of the conversation API
    #[arg(long, env = "DEALROOM_API_URL", default_value = "http://localhost:8080/api")]
    api: String,

    /// Bearer credential; without one the client stays offline
    #[arg(long, env = "DEALROOM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Id of the signed-in user
    #[arg(long)]
    user_id: String,

    /// Virtual host sent in CONNECT
    #[arg(long, default_value = "/")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    List,
    Open(ConversationId),
    Close,
    Read,
    Quit,
    Send(String),
    Unknown(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return if line.is_empty() { Input::Empty } else { Input::Send(line.to_string()) };
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("list"), None) => Input::List,
        (Some("open"), Some(id)) => Input::Open(ConversationId::new(id)),
        (Some("close"), None) => Input::Close,
        (Some("read"), None) => Input::Read,
        (Some("quit"), None) => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

fn say(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
}

fn describe(user: &UserId, me: &UserId) -> String {
    if user == me { "you".to_string() } else { user.to_string() }
}

fn print_directory(snapshot: &Snapshot) {
    say(&format!("{} unread", snapshot.unread_total));
    for conversation in &snapshot.conversations {
        say(&format!(
            "  {:>6}  {:<24} {:>3}  {}",
            conversation.id,
            conversation.participant_name,
            conversation.unread_count,
            conversation.last_message_preview.as_deref().unwrap_or(""),
        ));
    }
}

/// Print notifications and new messages until the runtime stops.
async fn render(handle: RuntimeHandle, me: UserId) {
    let mut notifications = handle.notifications();
    let mut shown: Option<(ConversationId, usize)> = None;

    loop {
        let notification = match notifications.recv().await {
            Ok(notification) => notification,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "renderer fell behind");
                continue;
            },
            Err(RecvError::Closed) => break,
        };

        match notification {
            ClientNotification::ConnectivityChanged(true) => say("* connected"),
            ClientNotification::ConnectivityChanged(false) => say("* offline"),
            ClientNotification::ReconnectScheduled { attempt, delay } => {
                say(&format!("* reconnecting in {} ms (attempt {attempt})", delay.as_millis()));
            },
            ClientNotification::MessagesChanged { .. } => {
                let Ok(snapshot) = handle.snapshot().await else { break };
                let Some(active) = snapshot.active_conversation.clone() else {
                    shown = None;
                    continue;
                };

                let start = match &shown {
                    Some((id, count)) if *id == active && *count <= snapshot.messages.len() => {
                        *count
                    },
                    _ => 0,
                };
                for message in &snapshot.messages[start..] {
                    let pending = if message.id.is_temporary() { " (sending)" } else { "" };
                    say(&format!(
                        "[{}] {}: {}{pending}",
                        message.created_at.format("%H:%M"),
                        describe(&message.sender_id, &me),
                        message.content,
                    ));
                }
                shown = Some((active, snapshot.messages.len()));
            },
            ClientNotification::DirectoryChanged => {},
            ClientNotification::TypingChanged(PresenceChange::Started { user_id, .. }) => {
                say(&format!("* {user_id} is typing"));
            },
            ClientNotification::TypingChanged(PresenceChange::Stopped { .. }) => {},
            ClientNotification::SendFailed { temp_id, reason, .. } => {
                say(&format!("* message {temp_id} was not delivered: {reason}"));
            },
            ClientNotification::HistoryFailed { conversation_id, reason } => {
                say(&format!("* history of {conversation_id} unavailable: {reason}"));
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let credentials: Arc<dyn CredentialSource> = match args.token {
        Some(token) => Arc::new(StaticCredential::new(Credential::new(token))),
        None => {
            tracing::warn!("No token provided - staying offline");
            Arc::new(StaticCredential::none())
        },
    };

    let mut config =
        RuntimeConfig { ws_url: args.url, api_base_url: args.api, ..RuntimeConfig::default() };
    config.client.connection.host = args.host;

    tracing::info!(url = %config.ws_url, api = %config.api_base_url, "Dealroom client starting");

    let me = UserId::new(args.user_id);
    let (runtime, handle) =
        Runtime::over_network(ClientIdentity::new(me.clone()), credentials, config);
    let runtime = tokio::spawn(runtime.run());
    tokio::spawn(render(handle.clone(), me));

    handle.connect().await?;
    handle.load_conversations().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Empty => {},
            Input::Quit => break,
            Input::List => print_directory(&handle.snapshot().await?),
            Input::Open(conversation_id) => handle.activate(conversation_id).await?,
            Input::Close => handle.deactivate().await?,
            Input::Read => match handle.snapshot().await?.active_conversation {
                Some(conversation_id) => handle.mark_read(conversation_id).await?,
                None => say("* no conversation open"),
            },
            Input::Send(text) => {
                if let Err(error) = handle.send(SendMessagePayload::text(text)).await {
                    say(&format!("* not sent: {error}"));
                }
            },
            Input::Unknown(line) => say(&format!("* unknown command: {line}")),
        }
    }

    handle.shutdown().await?;
    runtime.await?;

    Ok(())
}
