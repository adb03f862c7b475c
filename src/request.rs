//! Correlated protocol requests.
//!
//! DESIGN
//! ======
//! A [`Request`] is a cheap clonable handle to one outbound call. The
//! [`Connection`] it belongs to owns the id counter, the outbound text
//! channel and the pending table keyed by request id. Tracked requests are
//! inserted into the pending table before their frame is written; the client
//! read loop finds them there and hands over the response.
//!
//! LIFECYCLE
//! =========
//! `Created -> Sent -> Received | TimedOut`. The response lands in a
//! `watch` channel, so [`Request::wait`] parks on the channel instead of
//! polling. Notifications carry no id, never enter the pending table and are
//! never awaited.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use frames::{ErrorCode, InboundFrame, Params, RequestFrame, ResError};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("protocol error: {0}")]
    Protocol(ResError),
    #[error("request {id} timed out")]
    Timeout { id: u64 },
    #[error("request for {method} was never sent")]
    NotSent { method: String },
    #[error("notification {method} has no response")]
    Notification { method: String },
}

impl ErrorCode for RequestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.error_code(),
            Self::Timeout { .. } => "E_REQUEST_TIMEOUT",
            Self::NotSent { .. } => "E_REQUEST_NOT_SENT",
            Self::Notification { .. } => "E_REQUEST_NOTIFICATION",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Protocol(e) => e.retryable(),
            Self::Timeout { .. } => true,
            Self::NotSent { .. } | Self::Notification { .. } => false,
        }
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Per-connection request bookkeeping shared by the client and every
/// request it builds.
pub(crate) struct Connection {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    running: AtomicBool,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Request>>,
    default_timeout: Duration,
}

impl Connection {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<String>, default_timeout: Duration) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn transmit(&self, text: String) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    fn track(&self, id: u64, request: Request) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.insert(id, request);
    }

    /// Remove `id` from the pending table. Returns false if it was already gone.
    fn release(&self, id: u64) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.remove(&id).is_some()
    }

    pub(crate) fn lookup(&self, id: u64) -> Option<Request> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(&id).cloned()
    }

    pub(crate) fn is_pending(&self, id: u64) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.contains_key(&id)
    }

    pub(crate) fn pending_len(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.len()
    }

    /// Stop the writer and forget every pending request.
    pub(crate) fn shut(&self) {
        self.set_running(false);
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner).take();
        let drained: Vec<Request> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain().map(|(_, request)| request).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "request: dropped pending requests on close");
        }
    }
}

// =============================================================================
// REQUEST
// =============================================================================

#[derive(Default)]
struct Lifecycle {
    id: Option<u64>,
    sent_at: Option<Instant>,
    received_at: Option<Instant>,
    timed_out: bool,
}

struct RequestInner {
    conn: Arc<Connection>,
    method: String,
    params: Params,
    notification: bool,
    lifecycle: Mutex<Lifecycle>,
    outcome: watch::Sender<Option<InboundFrame>>,
}

/// One protocol call and its eventual outcome.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    pub(crate) fn new(conn: Arc<Connection>, method: String, params: Params, notification: bool) -> Self {
        let id = (!notification).then(|| conn.allocate_id());
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(RequestInner {
                conn,
                method,
                params,
                notification,
                lifecycle: Mutex::new(Lifecycle { id, ..Lifecycle::default() }),
                outcome,
            }),
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Correlation id. `None` for notifications.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.lifecycle().id
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.inner.params
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.inner.notification
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.lifecycle().sent_at.is_some()
    }

    #[must_use]
    pub fn is_received(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.lifecycle().timed_out
    }

    /// The raw response frame, once received.
    #[must_use]
    pub fn response(&self) -> Option<InboundFrame> {
        self.inner.outcome.borrow().clone()
    }

    /// Time between send and receive.
    #[must_use]
    pub fn round_trip(&self) -> Option<Duration> {
        let lifecycle = self.lifecycle();
        Some(lifecycle.received_at?.saturating_duration_since(lifecycle.sent_at?))
    }

    /// The frame this request puts on the wire.
    #[must_use]
    pub fn frame(&self) -> RequestFrame {
        RequestFrame::new(self.id(), self.inner.method.clone(), self.inner.params.clone())
    }

    /// Transmit the request.
    ///
    /// Fails softly: a request that was already sent or received, or whose
    /// connection is not running, is logged and left untouched.
    pub fn send(&self) -> &Self {
        let frame = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.sent_at.is_some() {
                error!(id = ?lifecycle.id, method = %self.inner.method, "request: already sent");
                return self;
            }
            if self.is_received() {
                error!(id = ?lifecycle.id, method = %self.inner.method, "request: already received");
                return self;
            }
            if !self.inner.conn.is_running() {
                error!(id = ?lifecycle.id, method = %self.inner.method, "request: connection is not running");
                return self;
            }
            lifecycle.sent_at = Some(Instant::now());
            RequestFrame::new(lifecycle.id, self.inner.method.clone(), self.inner.params.clone())
        };

        if let Some(id) = frame.id {
            self.inner.conn.track(id, self.clone());
        }
        if !self.inner.conn.transmit(frames::encode_request(&frame)) {
            error!(id = ?frame.id, method = %frame.method, "request: outbound channel closed");
            self.inner.conn.set_running(false);
            if let Some(id) = frame.id {
                self.inner.conn.release(id);
            }
            self.lifecycle().sent_at = None;
            return self;
        }
        debug!(id = ?frame.id, method = %frame.method, "request: sent");
        self
    }

    /// Clear any previous outcome and send again under a fresh id.
    pub fn resend(&self) -> &Self {
        {
            let mut lifecycle = self.lifecycle();
            if let Some(old) = lifecycle.id {
                self.inner.conn.release(old);
            }
            lifecycle.id = (!self.inner.notification).then(|| self.inner.conn.allocate_id());
            lifecycle.sent_at = None;
            lifecycle.received_at = None;
            lifecycle.timed_out = false;
        }
        self.inner.outcome.send_replace(None);
        self.send()
    }

    /// Store the response and drop the request from the pending table.
    pub(crate) fn receive(&self, frame: InboundFrame) {
        let id = {
            let mut lifecycle = self.lifecycle();
            lifecycle.received_at = Some(Instant::now());
            lifecycle.id
        };
        if let Some(id) = id {
            if !self.inner.conn.release(id) {
                warn!(id, "request: already removed from pending table");
            }
        }
        self.inner.outcome.send_replace(Some(frame));
    }

    /// Wait up to `limit` for the response, sending first if needed.
    ///
    /// Notifications return immediately. On expiry `timed_out` is set and the
    /// request leaves the pending table.
    pub async fn wait(&self, limit: Duration) -> &Self {
        if !self.is_sent() && !self.is_received() {
            self.send();
        }
        if self.inner.notification || !self.is_sent() {
            return self;
        }

        let mut rx = self.inner.outcome.subscribe();
        let arrived = tokio::time::timeout(limit, rx.wait_for(Option::is_some))
            .await
            .is_ok_and(|r| r.is_ok());
        if !arrived {
            let id = {
                let mut lifecycle = self.lifecycle();
                lifecycle.timed_out = true;
                lifecycle.id
            };
            warn!(id = ?id, method = %self.inner.method, timeout_ms = limit.as_millis(), "request: timed out");
            if let Some(id) = id {
                self.inner.conn.release(id);
            }
        }
        self
    }

    /// The response payload, waiting with the connection default timeout
    /// when no response has arrived yet.
    ///
    /// # Errors
    ///
    /// Returns the protocol error carried by the response, a timeout, or
    /// [`RequestError::Notification`] / [`RequestError::NotSent`] when no
    /// response can exist.
    pub async fn value(&self) -> Result<Value, RequestError> {
        if self.inner.notification {
            return Err(RequestError::Notification { method: self.inner.method.clone() });
        }
        if !self.is_received() && !self.timed_out() {
            debug!(id = ?self.id(), method = %self.inner.method, "request: not received yet, waiting");
            self.wait(self.inner.conn.default_timeout()).await;
        }

        if let Some(frame) = self.response() {
            if let Some(err) = frame.error {
                return Err(RequestError::Protocol(err));
            }
            return Ok(frame.result.unwrap_or(Value::Null));
        }
        match self.id() {
            Some(id) if self.timed_out() => Err(RequestError::Timeout { id }),
            _ => Err(RequestError::NotSent { method: self.inner.method.clone() }),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id())
            .field("method", &self.inner.method)
            .field("sent", &self.is_sent())
            .field("received", &self.is_received())
            .field("timed_out", &self.timed_out())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.id() {
            Some(id) => format!("Message {id}"),
            None => "Notification".to_owned(),
        };
        if let Some(frame) = self.response() {
            let ping = self
                .round_trip()
                .map_or_else(|| "N/A".to_owned(), |d| format!("{:.2}", d.as_secs_f64() * 1000.0));
            return write!(f, "{label} [{ping}ms]: {} -> {}", self.inner.method, frame.raw);
        }
        if self.is_sent() {
            return write!(f, "{label}: sent {}, not received", self.inner.method);
        }
        write!(f, "{label}: not sent, not received")
    }
}

#[cfg(test)]
#[path = "request_test.rs"]
mod tests;
