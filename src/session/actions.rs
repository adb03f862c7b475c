//! Outgoing character actions.
//!
//! Each action is one `call.core.char.<selfId>.ctrl.<action>` request, sent
//! immediately and returned unawaited. Delivery failures never surface here;
//! callers that care inspect the returned [`Request`].

use serde_json::{Value, json};
use tracing::{info, warn};

use frames::{ErrorCode, Params};

use super::views::{CharacterView, RoomView};
use super::{Session, SessionError};
use crate::request::Request;

/// Presentation flags for directed messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStyle {
    /// Send as a pose rather than speech.
    pub pose: bool,
    /// Mark as out of character.
    pub ooc: bool,
}

impl MessageStyle {
    #[must_use]
    pub fn pose() -> Self {
        Self { pose: true, ooc: false }
    }

    #[must_use]
    pub fn ooc() -> Self {
        Self { pose: false, ooc: true }
    }
}

impl Session {
    fn ctrl(&self, action: &str, params: Params) -> Result<Request, SessionError> {
        let id = self.self_id()?;
        let request = self.inner.client.call(&format!("core.char.{id}.ctrl"), action, params);
        request.send();
        Ok(request)
    }

    fn directed(&self, action: &str, target_id: &str, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        info!(%action, target = %target_id, msg, "session: directed message");
        self.ctrl(
            action,
            frames::params(json!({ "charId": target_id, "msg": msg, "pose": style.pose, "ooc": style.ooc })),
        )
    }

    fn targeted(&self, action: &str, target_id: &str) -> Result<Request, SessionError> {
        info!(%action, target = %target_id, "session: targeted action");
        self.ctrl(action, frames::params(json!({ "charId": target_id })))
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot has fetched the identity. The
    /// same applies to every action below.
    pub fn say(&self, msg: &str) -> Result<Request, SessionError> {
        info!(msg, "session: say");
        self.ctrl("say", frames::params(json!({ "msg": msg })))
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn pose(&self, msg: &str) -> Result<Request, SessionError> {
        info!(msg, "session: pose");
        self.ctrl("pose", frames::params(json!({ "msg": msg })))
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn ooc(&self, msg: &str) -> Result<Request, SessionError> {
        info!(msg, "session: ooc");
        self.ctrl("ooc", frames::params(json!({ "msg": msg })))
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn describe(&self, msg: &str) -> Result<Request, SessionError> {
        info!(msg, "session: describe");
        self.ctrl("describe", frames::params(json!({ "msg": msg })))
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn message(&self, target_id: &str, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        self.directed("message", target_id, msg, style)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn address(&self, target_id: &str, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        self.directed("address", target_id, msg, style)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn whisper(&self, target_id: &str, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        self.directed("whisper", target_id, msg, style)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn summon(&self, target_id: &str) -> Result<Request, SessionError> {
        self.targeted("summon", target_id)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn join(&self, target_id: &str) -> Result<Request, SessionError> {
        self.targeted("join", target_id)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn lead(&self, target_id: &str) -> Result<Request, SessionError> {
        self.targeted("lead", target_id)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn follow(&self, target_id: &str) -> Result<Request, SessionError> {
        self.targeted("follow", target_id)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn stop_lead(&self, target_id: &str) -> Result<Request, SessionError> {
        self.targeted("stopLead", target_id)
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn stop_follow(&self) -> Result<Request, SessionError> {
        info!("session: stop following");
        self.ctrl("stopFollow", Params::new())
    }

    /// Put the character to sleep (`release`).
    ///
    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn sleep(&self) -> Result<Request, SessionError> {
        info!("session: sleep");
        self.ctrl("release", Params::new())
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn wakeup(&self) -> Result<Request, SessionError> {
        self.ctrl("wakeup", Params::new())
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn ping(&self) -> Result<Request, SessionError> {
        self.ctrl("ping", Params::new())
    }

    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub fn use_exit(&self, exit_id: &str) -> Result<Request, SessionError> {
        info!(exit = %exit_id, "session: use exit");
        self.ctrl("useExit", frames::params(json!({ "exitId": exit_id })))
    }

    /// Find characters by name. A second word filters on surname,
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot, or the lookup call's error.
    pub async fn look_up_characters(&self, name: &str) -> Result<Vec<CharacterView>, SessionError> {
        let rid = self.self_rid()?;
        let mut words = name.split_whitespace();
        let first = words.next().unwrap_or_default();
        let surname = words.collect::<Vec<_>>().join(" ").to_lowercase();

        info!(name = %first, "session: looking up characters");
        let result = self
            .inner
            .client
            .call(&rid, "lookupChars", frames::params(json!({ "name": first, "extended": true })))
            .value()
            .await
            .inspect_err(|e| warn!(name = %first, error = %e, code = e.error_code(), "session: lookup failed"))?;

        let chars = result
            .pointer("/payload/chars")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut found = Vec::new();
        for entry in chars {
            let Some(id) = entry.get("id").and_then(Value::as_str) else {
                continue;
            };
            let view = self.character(id);
            if !surname.is_empty() {
                let theirs = match entry.get("surname").and_then(Value::as_str) {
                    Some(s) => s.to_owned(),
                    None => view.surname().await.unwrap_or_default(),
                };
                if theirs.to_lowercase() != surname {
                    continue;
                }
            }
            found.push(view);
        }
        info!(query = %name, count = found.len(), "session: characters found");
        Ok(found)
    }

    /// The room the bot's character is in, from its owned-character model.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotBooted`] before boot.
    pub async fn current_room(&self) -> Result<Option<RoomView>, SessionError> {
        let id = self.self_id()?;
        let room = self
            .inner
            .client
            .lookup(&format!("core.char.{id}.owned"), &["inRoom", "id"])
            .await;
        Ok(room.and_then(|v| v.as_str().map(|room_id| self.room(room_id))))
    }

    /// Release the character and close the connection.
    pub async fn shutdown(&self) {
        info!("session: shutting down");
        if let Ok(request) = self.sleep() {
            request.wait(self.inner.config.request_timeout).await;
        }
        self.inner.client.close();
        if let Some(task) = super::locked(&self.inner.dispatcher).take() {
            task.abort();
        }
        info!("session: shut down");
    }
}

#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;
