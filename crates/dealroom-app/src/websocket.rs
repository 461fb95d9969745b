//! WebSocket transport.
//!
//! Each WebSocket text message carries one STOMP frame or a bare EOL
//! heartbeat. A writer task encodes outbound packets and a reader task
//! decodes inbound ones; malformed frames are logged and dropped without
//! closing the link.

use std::future::Future;

use dealroom_proto::{Frame, Packet};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    config::DEFAULT_CHANNEL_CAPACITY,
    connector::{Connector, Link, TransportError},
};

/// Connects to a STOMP-over-WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send {
        let url = self.url.clone();
        async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            tracing::debug!(%url, "websocket open");

            let (mut sink, mut source) = stream.split();
            let (to_server, mut outbound) = mpsc::channel::<Packet>(DEFAULT_CHANNEL_CAPACITY);
            let (inbound, from_server) = mpsc::channel::<Packet>(DEFAULT_CHANNEL_CAPACITY);

            // Ends when the link drops `to_server`
            tokio::spawn(async move {
                while let Some(packet) = outbound.recv().await {
                    let text = match encode(&packet) {
                        Ok(text) => text,
                        Err(error) => {
                            tracing::warn!(%error, "outbound frame not encodable");
                            continue;
                        },
                    };
                    if let Err(error) = sink.send(Message::text(text)).await {
                        tracing::debug!(%error, "websocket write failed");
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            let reader = tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    let packet = match message {
                        Ok(Message::Text(text)) => decode(text.as_str().as_bytes()),
                        Ok(Message::Binary(bytes)) => decode(&bytes),
                        Ok(Message::Close(frame)) => {
                            tracing::debug!(?frame, "websocket closed by server");
                            break;
                        },
                        // Ping/pong are answered by tungstenite
                        Ok(_) => None,
                        Err(error) => {
                            tracing::debug!(%error, "websocket read failed");
                            break;
                        },
                    };

                    if let Some(packet) = packet
                        && inbound.send(packet).await.is_err()
                    {
                        break;
                    }
                }
            });

            Ok(Link::new(to_server, from_server).with_task(reader.abort_handle()))
        }
    }
}

fn encode(packet: &Packet) -> Result<String, TransportError> {
    let bytes = match packet {
        Packet::Heartbeat => Frame::HEARTBEAT.to_vec(),
        Packet::Frame(frame) => frame.to_vec().map_err(|e| TransportError::Stream(e.to_string()))?,
    };
    String::from_utf8(bytes).map_err(|e| TransportError::Stream(e.to_string()))
}

fn decode(bytes: &[u8]) -> Option<Packet> {
    match Frame::decode(bytes) {
        Ok(packet) => Some(packet),
        Err(error) => {
            tracing::warn!(%error, len = bytes.len(), "malformed inbound frame dropped");
            None
        },
    }
}
