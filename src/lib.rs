//! Bot client for Mucklet's RES protocol gateway.
//!
//! ARCHITECTURE
//! ============
//! - [`transport`] owns the websocket and exposes it as a pair of channels.
//! - [`client`] correlates requests with responses, keeps the resource
//!   [`cache`] current and queues application events.
//! - [`session`] boots the bot, dispatches typed events to handlers and
//!   sends character actions.

pub mod cache;
pub mod client;
pub mod config;
pub mod request;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{AppEvent, Client};
pub use config::BotConfig;
pub use request::{Request, RequestError};
pub use session::{Event, EventKind, Session};
