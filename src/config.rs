//! Bot configuration parsed from environment variables.

use std::time::Duration;

use frames::ErrorCode;

pub const DEFAULT_HOST: &str = "wss://api.test.mucklet.com/bot";
pub const DEFAULT_ORIGIN: &str = "https://test.mucklet.com";
pub const DEFAULT_PROTOCOL: &str = "1.2.1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_EVENT_QUEUE: usize = 256;
pub const DEFAULT_MAX_HANDLERS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing bot token: env var {var} not set")]
    MissingToken { var: &'static str },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken { .. } => "E_MISSING_TOKEN",
        }
    }
}

/// Values given on the command line. `None` falls back to the environment,
/// then to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub token: Option<String>,
    pub host: Option<String>,
    pub origin: Option<String>,
    pub protocol: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub event_queue: Option<usize>,
    pub max_concurrent_handlers: Option<usize>,
}

/// Connection and session settings for one bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// Websocket URL of the RES gateway.
    pub host: String,
    /// `Origin` header sent on the websocket handshake.
    pub origin: String,
    /// Bot token used by `auth.auth.authenticateBot`.
    pub token: String,
    /// RES protocol version announced during boot.
    pub protocol: String,
    /// Default timeout for `Request::wait` and boot calls.
    pub request_timeout: Duration,
    /// Capacity of the application event queue.
    pub event_queue: usize,
    /// Upper bound on concurrently running handler tasks.
    pub max_concurrent_handlers: usize,
}

impl BotConfig {
    /// Build a config with defaults for everything except the token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            origin: DEFAULT_ORIGIN.to_owned(),
            token: token.into(),
            protocol: DEFAULT_PROTOCOL.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            event_queue: DEFAULT_EVENT_QUEUE,
            max_concurrent_handlers: DEFAULT_MAX_HANDLERS,
        }
    }

    /// Build typed bot config from environment variables.
    ///
    /// Required:
    /// - `MUCKLET_BOT_TOKEN`
    ///
    /// Optional:
    /// - `MUCKLET_HOST`: gateway websocket URL
    /// - `MUCKLET_ORIGIN`: handshake origin
    /// - `MUCKLET_PROTOCOL`: default `1.2.1`
    /// - `MUCKLET_REQUEST_TIMEOUT_SECS`: default 10
    /// - `MUCKLET_EVENT_QUEUE`: default 256
    /// - `MUCKLET_MAX_HANDLERS`: default 32
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when no token is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Overrides::default())
    }

    /// [`BotConfig::from_env`] with `overrides` taking precedence. A token
    /// override makes `MUCKLET_BOT_TOKEN` optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when neither source has a token.
    pub fn load(overrides: Overrides) -> Result<Self, ConfigError> {
        let token = overrides
            .token
            .or_else(|| std::env::var("MUCKLET_BOT_TOKEN").ok())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingToken { var: "MUCKLET_BOT_TOKEN" })?;

        let host = overrides
            .host
            .or_else(|| std::env::var("MUCKLET_HOST").ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let origin = overrides
            .origin
            .or_else(|| std::env::var("MUCKLET_ORIGIN").ok())
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_owned());
        let protocol = overrides
            .protocol
            .or_else(|| std::env::var("MUCKLET_PROTOCOL").ok())
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_owned());
        let timeout_secs = overrides
            .request_timeout_secs
            .unwrap_or_else(|| env_parse("MUCKLET_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS));
        let event_queue = overrides
            .event_queue
            .unwrap_or_else(|| env_parse("MUCKLET_EVENT_QUEUE", DEFAULT_EVENT_QUEUE));
        let max_handlers = overrides
            .max_concurrent_handlers
            .unwrap_or_else(|| env_parse("MUCKLET_MAX_HANDLERS", DEFAULT_MAX_HANDLERS));

        Ok(Self {
            host,
            origin,
            token,
            protocol,
            request_timeout: Duration::from_secs(timeout_secs),
            event_queue: event_queue.max(1),
            max_concurrent_handlers: max_handlers.max(1),
        })
    }

    /// First five characters of the token, for log lines.
    #[must_use]
    pub fn token_hint(&self) -> &str {
        let end = self.token.char_indices().nth(5).map_or(self.token.len(), |(i, _)| i);
        &self.token[..end]
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
