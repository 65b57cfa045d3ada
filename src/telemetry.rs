//! Live backend metrics over the `/ws/metrics` WebSocket.
//!
//! The server sends a full metrics snapshot on connect, an
//! `inference_complete` message after every prediction and a heartbeat when
//! the socket has been quiet for a while. [`telemetry_events`] wraps the
//! socket in a stream that reconnects after failures.

use std::time::Duration;

use futures::stream::{self, Stream};
use futures::StreamExt;
#[allow(unused_imports)]
use log::{debug, info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::detection::{LatestInference, Metrics};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Connected,
    Snapshot(Metrics),
    InferenceComplete(LatestInference),
    Heartbeat,
    Disconnected(String),
}

/// Decode one text frame. Replies to our own pings and unknown message
/// types yield `None`.
pub fn parse_event(text: &str) -> Option<TelemetryEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            debug!("Ignoring non-JSON telemetry frame: {:?}", text);
            return None;
        }
    };
    if !value.is_object() {
        return None;
    }

    match value.get("type").and_then(Value::as_str) {
        Some("heartbeat") => Some(TelemetryEvent::Heartbeat),
        Some("inference_complete") => {
            let data = value.get("data").cloned().unwrap_or(Value::Null);
            match serde_json::from_value(data) {
                Ok(latest) => Some(TelemetryEvent::InferenceComplete(latest)),
                Err(e) => {
                    warn!("Malformed inference_complete message: {}", e);
                    None
                }
            }
        }
        Some(other) => {
            debug!("Ignoring telemetry message of type {}", other);
            None
        }
        None => match serde_json::from_value(value) {
            Ok(metrics) => Some(TelemetryEvent::Snapshot(metrics)),
            Err(e) => {
                warn!("Malformed metrics snapshot: {}", e);
                None
            }
        },
    }
}

pub struct MetricsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MetricsSocket {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let (stream, _response) = connect_async(url).await?;
        info!("Connected to {}", url);
        Ok(Self { stream })
    }

    /// Next recognised event, or `None` once the server closes the socket.
    pub async fn next_event(&mut self) -> Result<Option<TelemetryEvent>, AppError> {
        while let Some(message) = self.stream.next().await {
            match message? {
                WsMessage::Text(text) => {
                    if let Some(event) = parse_event(&text) {
                        return Ok(Some(event));
                    }
                }
                WsMessage::Close(frame) => {
                    debug!("Metrics socket closed: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by the socket itself
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Closing metrics socket: {}", e);
        }
    }
}

enum Connection {
    Closed { url: String, wait: bool },
    Open { url: String, socket: MetricsSocket },
}

/// Endless event stream for `url`. Each failed or dropped connection yields
/// one `Disconnected` and is retried after `retry`.
pub fn telemetry_events(url: String, retry: Duration) -> impl Stream<Item = TelemetryEvent> {
    stream::unfold(Connection::Closed { url, wait: false }, move |state| async move {
        match state {
            Connection::Closed { url, wait } => {
                if wait {
                    tokio::time::sleep(retry).await;
                }
                match MetricsSocket::connect(&url).await {
                    Ok(socket) => Some((TelemetryEvent::Connected, Connection::Open { url, socket })),
                    Err(e) => {
                        debug!("Metrics socket unavailable: {}", e);
                        Some((TelemetryEvent::Disconnected(e.message), Connection::Closed { url, wait: true }))
                    }
                }
            }
            Connection::Open { url, mut socket } => match socket.next_event().await {
                Ok(Some(event)) => Some((event, Connection::Open { url, socket })),
                Ok(None) => Some((
                    TelemetryEvent::Disconnected("closed by server".to_string()),
                    Connection::Closed { url, wait: true },
                )),
                Err(e) => {
                    warn!("Metrics socket error: {}", e);
                    Some((TelemetryEvent::Disconnected(e.message), Connection::Closed { url, wait: true }))
                }
            },
        }
    })
}
