//! Boot handshake.
//!
//! DESIGN
//! ======
//! Boot walks a fixed sequence of phases, one protocol call each, never two
//! calls in flight at once:
//!
//! ```text
//! Idle -> Connecting -> NegotiatingVersion -> Authenticating
//!      -> FetchingIdentity -> Subscribing -> TakingControl -> Waking -> Ready
//! ```
//!
//! What a failure means is declared per phase by [`BootPhase::policy`]
//! rather than decided at each call site. A fatal failure closes the client
//! and leaves the session in the phase that failed.

use std::fmt;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use frames::{ErrorCode, Params, ResError};

use super::{Identity, Session};
use crate::cache::ResourceValue;
use crate::request::{Request, RequestError};

/// Global resources subscribed to during boot.
pub const BOOT_SUBSCRIPTIONS: [&str; 11] = [
    "core.info",
    "tag.info",
    "mail.info",
    "note.info",
    "report.info",
    "support.info",
    "client.web.info",
    "core.nodes",
    "tags.tags",
    "tags.groups",
    "core.chars.awake",
];

// =============================================================================
// PHASES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootPhase {
    Idle,
    Connecting,
    NegotiatingVersion,
    Authenticating,
    FetchingIdentity,
    Subscribing,
    TakingControl,
    Waking,
    Ready,
}

/// How boot reacts when a phase fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort boot and close the connection.
    Fatal,
    /// Each resource fails on its own; logged by the client.
    PerResource,
    /// Log and continue.
    Ignorable,
}

impl BootPhase {
    #[must_use]
    pub fn policy(self) -> FailurePolicy {
        match self {
            Self::Idle | Self::Connecting | Self::NegotiatingVersion | Self::Authenticating | Self::FetchingIdentity => {
                FailurePolicy::Fatal
            }
            Self::Subscribing => FailurePolicy::PerResource,
            Self::TakingControl | Self::Waking | Self::Ready => FailurePolicy::Ignorable,
        }
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Connecting),
            Self::Connecting => Some(Self::NegotiatingVersion),
            Self::NegotiatingVersion => Some(Self::Authenticating),
            Self::Authenticating => Some(Self::FetchingIdentity),
            Self::FetchingIdentity => Some(Self::Subscribing),
            Self::Subscribing => Some(Self::TakingControl),
            Self::TakingControl => Some(Self::Waking),
            Self::Waking => Some(Self::Ready),
            Self::Ready => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::NegotiatingVersion => "negotiating_version",
            Self::Authenticating => "authenticating",
            Self::FetchingIdentity => "fetching_identity",
            Self::Subscribing => "subscribing",
            Self::TakingControl => "taking_control",
            Self::Waking => "waking",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BootError {
    #[error("boot can only start from idle (session is {0})")]
    InvalidPhase(BootPhase),
    #[error("connection is not running")]
    NotConnected,
    #[error("{phase} failed: {error}")]
    Protocol { phase: BootPhase, error: ResError },
    #[error("{phase} timed out")]
    Timeout { phase: BootPhase },
    #[error("bot identity unavailable: {0}")]
    Identity(String),
}

impl ErrorCode for BootError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPhase(_) => "E_BOOT_INVALID_PHASE",
            Self::NotConnected => "E_BOOT_NOT_CONNECTED",
            Self::Protocol { error, .. } => error.error_code(),
            Self::Timeout { .. } => "E_BOOT_TIMEOUT",
            Self::Identity(_) => "E_BOOT_IDENTITY",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NotConnected)
    }
}

impl BootError {
    fn from_request(phase: BootPhase, err: RequestError) -> Self {
        match err {
            RequestError::Protocol(error) => Self::Protocol { phase, error },
            RequestError::Timeout { .. } => Self::Timeout { phase },
            RequestError::NotSent { .. } | RequestError::Notification { .. } => Self::NotConnected,
        }
    }
}

// =============================================================================
// BOOT
// =============================================================================

impl Session {
    /// Run the boot handshake to `Ready`.
    ///
    /// # Errors
    ///
    /// [`BootError::InvalidPhase`] unless the session is idle; otherwise the
    /// failure of the first fatal phase. The client is closed on failure.
    pub async fn boot(&self) -> Result<Identity, BootError> {
        {
            let mut phase = super::locked(&self.inner.phase);
            let current = *phase;
            if current != BootPhase::Idle {
                warn!(phase = %current, "boot: rejected, session not idle");
                return Err(BootError::InvalidPhase(current));
            }
            *phase = BootPhase::Connecting;
        }

        match self.run_boot().await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                error!(phase = %self.phase(), error = %e, code = e.error_code(), "boot: aborted");
                self.inner.client.close();
                Err(e)
            }
        }
    }

    async fn run_boot(&self) -> Result<Identity, BootError> {
        if !self.inner.client.is_running() {
            return Err(BootError::NotConnected);
        }

        self.enter(BootPhase::NegotiatingVersion);
        let protocol = self.inner.config.protocol.clone();
        info!(%protocol, "boot: negotiating protocol version");
        let version = self.settle(BootPhase::NegotiatingVersion, self.inner.client.version(&protocol)).await?;
        info!(gateway = %version["protocol"].as_str().unwrap_or("unknown"), "boot: protocol negotiated");

        self.enter(BootPhase::Authenticating);
        info!(token = %self.inner.config.token_hint(), "boot: authenticating bot");
        let auth = self.inner.client.auth(
            "auth",
            "authenticateBot",
            frames::params(json!({ "token": self.inner.config.token })),
        );
        self.settle(BootPhase::Authenticating, auth).await?;
        info!("boot: authenticated");

        self.enter(BootPhase::FetchingIdentity);
        let bot = self
            .settle(BootPhase::FetchingIdentity, self.inner.client.call("core", "getBot", Params::new()))
            .await?;
        let identity = self.resolve_identity(&bot).await?;
        self.set_identity(identity.clone());
        info!(name = %identity.full_name(), id = %identity.id, "boot: identity fetched");

        self.enter(BootPhase::Subscribing);
        for rid in BOOT_SUBSCRIPTIONS {
            self.inner.client.subscribe(rid).send();
        }
        debug!(count = BOOT_SUBSCRIPTIONS.len(), "boot: global subscriptions sent");

        self.enter(BootPhase::TakingControl);
        let control = self.inner.client.call(
            &identity.rid,
            "controlChar",
            frames::params(json!({ "charId": identity.id })),
        );
        self.settle(BootPhase::TakingControl, control).await?;

        self.enter(BootPhase::Waking);
        let wakeup = self.inner.client.call(&format!("core.char.{}.ctrl", identity.id), "wakeup", Params::new());
        self.settle(BootPhase::Waking, wakeup).await?;

        self.enter(BootPhase::Ready);
        info!(name = %identity.full_name(), "boot: ready");
        Ok(identity)
    }

    fn enter(&self, phase: BootPhase) {
        debug_assert_eq!(self.phase().next(), Some(phase), "boot phases run in order");
        self.set_phase(phase);
        debug!(%phase, "boot: phase");
    }

    /// Wait for `request` and apply the phase failure policy.
    ///
    /// Ignorable failures are logged and yield `Value::Null`.
    async fn settle(&self, phase: BootPhase, request: Request) -> Result<Value, BootError> {
        let result = request.wait(self.inner.config.request_timeout).await.value().await;
        match (result, phase.policy()) {
            (Ok(value), _) => Ok(value),
            (Err(e), FailurePolicy::Ignorable | FailurePolicy::PerResource) => {
                warn!(%phase, error = %e, code = e.error_code(), "boot: ignoring failure");
                Ok(Value::Null)
            }
            (Err(e), FailurePolicy::Fatal) => Err(BootError::from_request(phase, e)),
        }
    }

    /// Build the identity from a `getBot` result: the bot RID plus the
    /// character its model references.
    async fn resolve_identity(&self, bot: &Value) -> Result<Identity, BootError> {
        let Some(rid) = bot.get("rid").and_then(Value::as_str) else {
            return Err(BootError::Identity("getBot result carries no rid".into()));
        };
        let character = match self.inner.client.lookup(rid, &["char"]).await {
            Some(ResourceValue::Mapping(model)) => model,
            _ => return Err(BootError::Identity(format!("{rid} has no character"))),
        };
        let field = |key: &str| character.get(key).and_then(ResourceValue::as_str).unwrap_or_default().to_owned();

        let id = field("id");
        if id.is_empty() {
            return Err(BootError::Identity(format!("character of {rid} has no id")));
        }
        Ok(Identity {
            rid: rid.to_owned(),
            id,
            name: field("name"),
            surname: field("surname"),
            description: field("desc"),
        })
    }
}

#[cfg(test)]
#[path = "boot_test.rs"]
mod tests;
