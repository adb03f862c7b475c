//! Websocket transport adapter.
//!
//! DESIGN
//! ======
//! The client never touches the socket. It talks to a [`Link`]: an unbounded
//! sender of outbound text frames and a receiver of [`TransportEvent`]s
//! (open / message / error / close). [`connect`] builds a link over
//! tokio-tungstenite with one writer task and one reader task; tests build
//! one with [`Link::pair`] and play the gateway themselves.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tracing::{debug, warn};

use frames::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

/// Connection-level notifications delivered to the client read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid gateway url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid origin header: {0}")]
    InvalidOrigin(String),
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connection closed")]
    Closed,
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "E_INVALID_URL",
            Self::InvalidOrigin(_) => "E_INVALID_ORIGIN",
            Self::Connect(_) => "E_WS_CONNECT",
            Self::Closed => "E_WS_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }
}

/// The client's half of a duplex text channel.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The far half of a [`Link::pair`]: what the client sent, and a way to
/// push events at it.
pub struct Peer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Link {
    /// In-memory link with no socket behind it. The link starts open.
    #[must_use]
    pub fn pair() -> (Link, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = in_tx.send(TransportEvent::Open);
        (Link { outbound: out_tx, inbound: in_rx }, Peer { sent: out_rx, events: in_tx })
    }
}

impl Peer {
    /// Deliver one text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Deliver one JSON frame to the client.
    pub fn push_json(&self, value: &serde_json::Value) {
        self.push(value.to_string());
    }
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Open a websocket to `url`, sending `origin` as the handshake `Origin`.
///
/// # Errors
///
/// Returns an error for an unparsable URL or origin, or a failed handshake.
pub async fn connect(url: &str, origin: &str) -> Result<Link, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl { url: url.to_owned(), reason: e.to_string() })?;
    let origin_value = HeaderValue::from_str(origin).map_err(|_| TransportError::InvalidOrigin(origin.to_owned()))?;
    request.headers_mut().insert(ORIGIN, origin_value);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| TransportError::Connect(Box::new(e)))?;
    let (mut sink, mut source) = stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let _ = in_tx.send(TransportEvent::Open);

    let writer_events = in_tx.clone();
    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                warn!(error = %e, "transport: send failed");
                let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                break;
            }
        }
        let _ = sink.close().await;
        debug!("transport: writer stopped");
    });

    tokio::spawn(async move {
        while let Some(msg) = source.next().await {
            let event = match msg {
                Ok(Message::Text(text)) => TransportEvent::Message(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => TransportEvent::Message(text),
                    Err(_) => {
                        warn!("transport: dropped non-utf8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            };
            if in_tx.send(event).is_err() {
                break;
            }
        }
        let _ = in_tx.send(TransportEvent::Close);
        debug!("transport: reader stopped");
    });

    Ok(Link { outbound: out_tx, inbound: in_rx })
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
