//! Bot session: boot, event dispatch and reply waits.
//!
//! ARCHITECTURE
//! ============
//! A [`Session`] wraps one [`Client`]. On construction it takes the client's
//! application event queue and starts a dispatcher task that handles events
//! strictly in queue order:
//!
//! 1. classify the raw event into a typed [`Event`] (unknown kinds dropped)
//! 2. drop events caused by the bot's own character
//! 3. if a [`Session::wait_for`] is pending for the originating character and
//!    the event carries a message, hand the text to the waiter and stop
//! 4. otherwise spawn one task that runs every handler registered for the
//!    kind, in registration order
//!
//! Handler tasks are bounded by a semaphore sized from
//! `BotConfig::max_concurrent_handlers`. The permit is taken inside the
//! spawned task, never by the dispatcher, so steps 1 to 3 keep running while
//! every permit is held. Handlers receive a clone of the session, so they can
//! act and even `wait_for` without blocking dispatch.

pub mod actions;
pub mod boot;
pub mod events;
pub mod views;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use frames::ErrorCode;

use crate::client::{AppEvent, Client};
use crate::config::BotConfig;
use crate::request::RequestError;

pub use actions::MessageStyle;
pub use boot::{BOOT_SUBSCRIPTIONS, BootError, BootPhase, FailurePolicy};
pub use events::{
    CharacterMessage, CharacterPoseableMessage, CharacterRef, Event, EventKind, EventPayload, PayloadShape, RoomRef,
    TargetRoomMessage, TargetedCharacterEvent, TargetedCharacterMessage,
};
pub use views::{AreaView, CharacterView, ExitView, RoomView};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("already waiting for a reply from {character_id}")]
    AlreadyWaiting { character_id: String },
    #[error("session has no bot identity; boot first")]
    NotBooted,
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyWaiting { .. } => "E_ALREADY_WAITING",
            Self::NotBooted => "E_NOT_BOOTED",
            Self::Request(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.retryable(),
            Self::AlreadyWaiting { .. } | Self::NotBooted => false,
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Who the bot is, as reported by `core.getBot`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// RID of the bot model, e.g. `core.bot.<id>`.
    pub rid: String,
    /// Id of the character the bot controls.
    pub id: String,
    pub name: String,
    pub surname: String,
    pub description: String,
}

impl Identity {
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.surname.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.surname)
        }
    }
}

/// Registered event handler.
pub type Handler = Arc<dyn Fn(Session, Event) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplyState {
    Waiting { since: Instant },
    Answered { text: String },
}

struct SessionInner {
    client: Client,
    config: BotConfig,
    phase: Mutex<BootPhase>,
    identity: Mutex<Option<Identity>>,
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    replies: Mutex<HashMap<String, ReplyState>>,
    reply_signal: Notify,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// Handle to a bot session. Clones share the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl Session {
    /// Wrap `client` and start dispatching its application events.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(client: Client, config: BotConfig) -> Self {
        let events = client.take_events();
        let permits = Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1)));
        let session = Self {
            inner: Arc::new(SessionInner {
                client,
                config,
                phase: Mutex::new(BootPhase::Idle),
                identity: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                replies: Mutex::new(HashMap::new()),
                reply_signal: Notify::new(),
                dispatcher: Mutex::new(None),
            }),
        };

        match events {
            Some(events) => {
                let task = tokio::spawn(dispatch_loop(Arc::downgrade(&session.inner), events, permits));
                *locked(&session.inner.dispatcher) = Some(task);
            }
            None => warn!("session: client event queue already taken, dispatch disabled"),
        }
        session
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    #[must_use]
    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn phase(&self) -> BootPhase {
        *locked(&self.inner.phase)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == BootPhase::Ready
    }

    /// The bot identity, once `FetchingIdentity` has completed.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        locked(&self.inner.identity).clone()
    }

    fn set_identity(&self, identity: Identity) {
        *locked(&self.inner.identity) = Some(identity);
    }

    fn set_phase(&self, phase: BootPhase) {
        *locked(&self.inner.phase) = phase;
    }

    /// Own character id.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before the identity is known.
    pub fn self_id(&self) -> Result<String, SessionError> {
        locked(&self.inner.identity)
            .as_ref()
            .map(|identity| identity.id.clone())
            .ok_or(SessionError::NotBooted)
    }

    fn self_rid(&self) -> Result<String, SessionError> {
        locked(&self.inner.identity)
            .as_ref()
            .map(|identity| identity.rid.clone())
            .ok_or(SessionError::NotBooted)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

impl Session {
    /// Register `handler` for `kind`. Handlers for one kind run in
    /// registration order, once per event.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Session, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |session: Session, event: Event| -> BoxFuture<'static, ()> { Box::pin(handler(session, event)) });
        locked(&self.inner.handlers).entry(kind).or_default().push(handler);
        debug!(%kind, "session: handler registered");
    }

    /// Register one handler for several kinds.
    pub fn on_each<F, Fut>(&self, kinds: &[EventKind], handler: F)
    where
        F: Fn(Session, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |session: Session, event: Event| -> BoxFuture<'static, ()> { Box::pin(handler(session, event)) });
        let mut handlers = locked(&self.inner.handlers);
        for kind in kinds {
            handlers.entry(*kind).or_default().push(handler.clone());
        }
    }

    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        locked(&self.inner.handlers).get(&kind).map_or(0, Vec::len)
    }

    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        locked(&self.inner.handlers).get(&kind).cloned().unwrap_or_default()
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

async fn dispatch_loop(weak: Weak<SessionInner>, mut queue: mpsc::Receiver<AppEvent>, permits: Arc<Semaphore>) {
    while let Some(raw) = queue.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = Session { inner };
        let Some(event) = events::classify(&raw) else {
            continue;
        };
        if session.is_own(&event) {
            debug!(kind = %event.kind, "session: own event suppressed");
            continue;
        }
        if session.capture_reply(&event) {
            continue;
        }

        let handlers = session.handlers_for(event.kind);
        if handlers.is_empty() {
            debug!(kind = %event.kind, "session: no handlers");
            continue;
        }
        let permits = permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            for handler in handlers {
                handler(session.clone(), event.clone()).await;
            }
        });
    }
    debug!("session: dispatcher stopped");
}

impl Session {
    /// Events caused by the bot's own character. The puppeteer is not
    /// considered.
    fn is_own(&self, event: &Event) -> bool {
        locked(&self.inner.identity)
            .as_ref()
            .is_some_and(|identity| !identity.id.is_empty() && identity.id == event.character().id)
    }

    /// Deliver the event text to a pending `wait_for`. Returns true when the
    /// event was consumed.
    fn capture_reply(&self, event: &Event) -> bool {
        let Some(text) = event.message() else {
            return false;
        };
        {
            let mut replies = locked(&self.inner.replies);
            let Some(state) = replies.get_mut(&event.character().id) else {
                return false;
            };
            *state = ReplyState::Answered { text: text.to_owned() };
        }
        debug!(character = %event.character().id, kind = %event.kind, "session: reply captured");
        self.inner.reply_signal.notify_waiters();
        true
    }

    /// Feed a raw event through classification and dispatch as if it came
    /// off the wire.
    pub fn ingest(&self, raw: &str) {
        self.inner.client.ingest(raw);
    }
}

// =============================================================================
// REPLY WAIT
// =============================================================================

impl Session {
    /// Wait up to `limit` for the next message from `character_id`.
    ///
    /// While waiting, messages from that character are handed to the waiter
    /// and not dispatched to handlers. Returns `Ok(None)` on timeout. The
    /// waiting entry is removed either way.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyWaiting`] if a wait for the same character is
    /// already in progress.
    pub async fn wait_for(&self, character_id: &str, limit: Duration) -> Result<Option<String>, SessionError> {
        {
            let mut replies = locked(&self.inner.replies);
            if replies.contains_key(character_id) {
                warn!(character = %character_id, "session: already awaiting a reply");
                return Err(SessionError::AlreadyWaiting { character_id: character_id.to_owned() });
            }
            replies.insert(character_id.to_owned(), ReplyState::Waiting { since: Instant::now() });
        }

        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notified = self.inner.reply_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(text) = self.take_answer(character_id) {
                return Ok(Some(text));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        if let Some(text) = self.take_answer(character_id) {
            return Ok(Some(text));
        }
        let waited = locked(&self.inner.replies).remove(character_id);
        if let Some(ReplyState::Waiting { since }) = waited {
            info!(
                character = %character_id,
                waited_ms = since.elapsed().as_millis(),
                "session: timed out waiting for reply"
            );
        }
        Ok(None)
    }

    fn take_answer(&self, character_id: &str) -> Option<String> {
        let mut replies = locked(&self.inner.replies);
        if !matches!(replies.get(character_id), Some(ReplyState::Answered { .. })) {
            return None;
        }
        match replies.remove(character_id) {
            Some(ReplyState::Answered { text }) => Some(text),
            _ => None,
        }
    }

    /// Whether a reply wait is in progress for `character_id`.
    #[must_use]
    pub fn is_waiting_for(&self, character_id: &str) -> bool {
        locked(&self.inner.replies).contains_key(character_id)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
