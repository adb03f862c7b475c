//! RES client: frame routing, verb builders and the resource cache.
//!
//! DESIGN
//! ======
//! The client owns one [`Link`]. A single read-loop task classifies every
//! inbound frame synchronously and in arrival order:
//!
//! 1. `result` / `data` resource sets are merged into the cache first, so a
//!    caller woken by the response already sees the new resources.
//! 2. A frame with an `id` resolves the matching pending [`Request`];
//!    unknown ids are orphans (late responses after a timeout) and are
//!    logged and dropped.
//! 3. A frame with an `event` is split into `(rid, name)`. Structural names
//!    patch the cache and stop there. Everything else is an application
//!    event and goes on a bounded queue for the session.
//!
//! Verb builders only construct requests. The caller chooses `send()`,
//! `wait()` or `value()`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use frames::{AddEvent, ChangeEvent, ErrorCode, InboundFrame, Params, RemoveEvent, StructuralEvent, Verb};

use crate::cache::{Cache, ResourceFetcher, ResourceValue};
use crate::config::BotConfig;
use crate::request::{Connection, Request, RequestError};
use crate::transport::{Link, TransportError, TransportEvent};

// =============================================================================
// TYPES
// =============================================================================

/// An application-level push event, before session classification.
#[derive(Debug, Clone, PartialEq)]
pub struct AppEvent {
    /// Resource the event arrived on, e.g. `core.char.c1.room`.
    pub rid: String,
    /// Last segment of the event name, e.g. `out`.
    pub name: String,
    pub data: Value,
}

struct ClientInner {
    conn: Arc<Connection>,
    cache: Cache,
    events_tx: mpsc::Sender<AppEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<AppEvent>>>,
}

/// Handle to one RES connection. Clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl Client {
    /// Take over `link` once it reports open and start the read loop.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the link closes or errors before opening.
    pub async fn start(link: Link, config: &BotConfig) -> Result<Self, TransportError> {
        let Link { outbound, mut inbound } = link;
        match inbound.recv().await {
            Some(TransportEvent::Open) => {}
            Some(TransportEvent::Error(e)) => {
                error!(error = %e, "client: transport failed before open");
                return Err(TransportError::Closed);
            }
            Some(TransportEvent::Message(_) | TransportEvent::Close) | None => {
                return Err(TransportError::Closed);
            }
        }

        let conn = Arc::new(Connection::new(outbound, config.request_timeout));
        conn.set_running(true);
        info!("client: connection opened");

        let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));
        let client = Self {
            inner: Arc::new(ClientInner {
                conn,
                cache: Cache::new(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        };

        let reader = client.clone();
        tokio::spawn(async move { reader.read_loop(inbound).await });
        Ok(client)
    }

    async fn read_loop(self, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Open => {
                    self.inner.conn.set_running(true);
                    info!("client: connection opened");
                }
                TransportEvent::Message(text) => self.ingest(&text),
                TransportEvent::Error(e) => error!(error = %e, "client: transport error"),
                TransportEvent::Close => {
                    info!("client: connection closed");
                    break;
                }
            }
        }
        self.inner.conn.shut();
        debug!("client: read loop stopped");
    }

    /// Stop the writer and drop every pending request.
    pub fn close(&self) {
        info!(pending = self.inner.conn.pending_len(), "client: closing");
        self.inner.conn.shut();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.conn.is_running()
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.inner.conn.default_timeout()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.conn.pending_len()
    }

    #[must_use]
    pub fn is_pending(&self, id: u64) -> bool {
        self.inner.conn.is_pending(id)
    }

    /// Take the application event queue. Only the first caller gets it.
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::Receiver<AppEvent>> {
        self.inner.events_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Resolve a cached path, fetching missing resources through this client.
    pub async fn lookup(&self, rid: &str, path: &[&str]) -> Option<ResourceValue> {
        self.inner.cache.get(self, rid, path).await
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Client {
    /// Classify one inbound text frame as if it had arrived on the link.
    pub fn ingest(&self, text: &str) {
        let Some(event) = self.route(text) else {
            return;
        };
        match self.inner.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(rid = %event.rid, name = %event.name, "client: event queue full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(rid = %event.rid, name = %event.name, "client: no event consumer");
            }
        }
    }

    fn route(&self, text: &str) -> Option<AppEvent> {
        let frame = match frames::decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "client: dropped undecodable frame");
                return None;
            }
        };
        debug!(id = ?frame.id, event = ?frame.event, "client: recv frame");

        for set in frame.resource_sets() {
            self.inner.cache.merge(&set);
        }

        if let Some(id) = frame.id {
            self.resolve(id, &frame);
        }

        let (rid, name) = frame.event_target()?;
        let Some(data) = frame.data.as_ref() else {
            warn!(%rid, %name, "client: event without data");
            return None;
        };
        if let Some(kind) = StructuralEvent::from_name(name) {
            self.apply_structural(kind, rid, data);
            return None;
        }
        Some(AppEvent { rid: rid.to_owned(), name: name.to_owned(), data: data.clone() })
    }

    fn resolve(&self, id: u64, frame: &InboundFrame) {
        let Some(request) = self.inner.conn.lookup(id) else {
            warn!(id, "client: orphan response discarded");
            return;
        };
        if let Some(err) = &frame.error {
            warn!(
                id,
                method = %request.method(),
                code = %err.code,
                message = %err.message,
                "client: error response"
            );
        }
        request.receive(frame.clone());
    }

    fn apply_structural(&self, kind: StructuralEvent, rid: &str, data: &Value) {
        let cache = &self.inner.cache;
        let applied = match kind {
            StructuralEvent::Change => ChangeEvent::deserialize(data)
                .map_err(|e| e.to_string())
                .and_then(|change| cache.change(rid, &change.values).map_err(|e| e.to_string())),
            StructuralEvent::Add => AddEvent::deserialize(data)
                .map_err(|e| e.to_string())
                .and_then(|add| cache.add(rid, add.idx, add.value).map_err(|e| e.to_string())),
            StructuralEvent::Remove => RemoveEvent::deserialize(data)
                .map_err(|e| e.to_string())
                .and_then(|remove| cache.remove(rid, remove.idx).map(|_| ()).map_err(|e| e.to_string())),
            _ => {
                debug!(%rid, event = kind.as_str(), "client: structural event acknowledged");
                return;
            }
        };
        if let Err(e) = applied {
            warn!(%rid, event = kind.as_str(), error = %e, "client: structural event not applied");
        }
    }
}

// =============================================================================
// VERBS
// =============================================================================

impl Client {
    /// Build a tracked request for an arbitrary method.
    #[must_use]
    pub fn request(&self, method: impl Into<String>, params: Params) -> Request {
        Request::new(self.inner.conn.clone(), method.into(), params, false)
    }

    /// Build a notification: no id, no response, never awaited.
    #[must_use]
    pub fn notification(&self, method: impl Into<String>, params: Params) -> Request {
        Request::new(self.inner.conn.clone(), method.into(), params, true)
    }

    /// `version` with the protocol this client speaks.
    #[must_use]
    pub fn version(&self, protocol: &str) -> Request {
        self.request(Verb::Version.method(&[]), frames::params(json!({ "protocol": protocol })))
    }

    #[must_use]
    pub fn subscribe(&self, rid: &str) -> Request {
        self.request(Verb::Subscribe.method(&[rid]), Params::new())
    }

    /// Drop `count` direct subscriptions to `rid`.
    #[must_use]
    pub fn unsubscribe(&self, rid: &str, count: u32) -> Request {
        self.request(Verb::Unsubscribe.method(&[rid]), frames::params(json!({ "count": count })))
    }

    #[must_use]
    pub fn get(&self, rid: &str) -> Request {
        self.request(Verb::Get.method(&[rid]), Params::new())
    }

    #[must_use]
    pub fn call(&self, rid: &str, method: &str, params: Params) -> Request {
        self.request(Verb::Call.method(&[rid, method]), params)
    }

    #[must_use]
    pub fn auth(&self, rid: &str, method: &str, params: Params) -> Request {
        self.request(Verb::Auth.method(&[rid, method]), params)
    }
}

#[async_trait]
impl ResourceFetcher for Client {
    async fn fetch(&self, rid: &str) -> Result<(), RequestError> {
        self.subscribe(rid).value().await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
