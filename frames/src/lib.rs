//! Shared wire model for the RES protocol.
//!
//! This crate owns the JSON text representation exchanged with a RES gateway:
//! outbound request frames, inbound response/event frames, resource sets and
//! protocol errors. It performs no I/O; the `mucklet` crate moves these frames
//! over a websocket and decides what they mean.
//!
//! WIRE SHAPES
//! ===========
//! - Request:  `{"id": N?, "method": "<verb>.<rid>[.<method>]", "params": {..}}`
//! - Response: `{"id": N, "result": {..}}` or `{"id": N, "error": {code, message}}`
//! - Event:    `{"event": "<rid>.<name>", "data": {..}}`
//!
//! A request without `id` is a notification: the gateway never answers it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// ERRORS
// =============================================================================

/// Grepable error code and retryable flag for structured error logging.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// The JSON is valid but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}

impl ErrorCode for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_FRAME_DECODE",
            Self::NotAnObject => "E_FRAME_NOT_OBJECT",
        }
    }
}

/// Error payload carried by a RES error response or a resource-set entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ResError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ResError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }

    /// Whether the error carries the given protocol code.
    #[must_use]
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl ErrorCode for ResError {
    fn error_code(&self) -> &'static str {
        match self.code.as_str() {
            INVALID_REQUEST => "E_INVALID_REQUEST",
            INVALID_PARAMS => "E_INVALID_PARAMS",
            UNSUPPORTED_PROTOCOL => "E_UNSUPPORTED_PROTOCOL",
            NO_SUBSCRIPTION => "E_NO_SUBSCRIPTION",
            NOT_FOUND => "E_NOT_FOUND",
            TIMEOUT => "E_TIMEOUT",
            CHAR_NOT_FOUND => "E_CHAR_NOT_FOUND",
            _ => "E_PROTOCOL",
        }
    }

    fn retryable(&self) -> bool {
        self.code == TIMEOUT
    }
}

/// Protocol error codes the client reacts to or logs specially.
pub const INVALID_REQUEST: &str = "system.invalidRequest";
pub const INVALID_PARAMS: &str = "system.invalidParams";
pub const UNSUPPORTED_PROTOCOL: &str = "system.unsupportedProtocol";
pub const NO_SUBSCRIPTION: &str = "system.noSubscription";
pub const NOT_FOUND: &str = "system.notFound";
pub const TIMEOUT: &str = "system.timeout";
pub const CHAR_NOT_FOUND: &str = "core.charNotFound";

// =============================================================================
// OUTBOUND
// =============================================================================

/// Request parameters. Always an object on the wire, possibly empty.
pub type Params = Map<String, Value>;

/// Convert a JSON object into request params. Anything else yields empty params.
#[must_use]
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

/// Protocol verbs. The verb is the first segment of every request method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Version,
    Subscribe,
    Unsubscribe,
    Get,
    Call,
    Auth,
}

impl Verb {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Get => "get",
            Self::Call => "call",
            Self::Auth => "auth",
        }
    }

    /// Build a method name from this verb and dotted path segments.
    ///
    /// Empty segments are skipped, so `Verb::Version.method(&[])` is `"version"`.
    #[must_use]
    pub fn method(self, segments: &[&str]) -> String {
        let mut method = self.as_str().to_owned();
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            method.push('.');
            method.push_str(segment);
        }
        method
    }
}

/// One outbound request frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id. Omitted for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: Params,
}

impl RequestFrame {
    #[must_use]
    pub fn new(id: Option<u64>, method: impl Into<String>, params: Params) -> Self {
        Self { id, method: method.into(), params }
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Encode a request frame as JSON text.
#[must_use]
pub fn encode_request(frame: &RequestFrame) -> String {
    // String keys and JSON values always serialize; the fallback is unreachable.
    serde_json::to_string(frame).unwrap_or_default()
}

// =============================================================================
// INBOUND
// =============================================================================

/// One inbound frame. Any combination of fields may be present; the client
/// checks each independently.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ResError>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    /// The decoded frame exactly as received.
    #[serde(skip)]
    pub raw: Value,
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON or mistyped fields and
/// [`CodecError::NotAnObject`] when the top level is not an object.
pub fn decode_frame(text: &str) -> Result<InboundFrame, CodecError> {
    let raw: Value = serde_json::from_str(text)?;
    if !raw.is_object() {
        return Err(CodecError::NotAnObject);
    }
    let mut frame = InboundFrame::deserialize(&raw)?;
    frame.raw = raw;
    Ok(frame)
}

impl InboundFrame {
    /// Resource sets carried in `result` and `data`, in that order.
    #[must_use]
    pub fn resource_sets(&self) -> Vec<ResourceSet> {
        [self.result.as_ref(), self.data.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(ResourceSet::from_value)
            .collect()
    }

    /// Split `event` into `(rid, name)` on the last dot.
    #[must_use]
    pub fn event_target(&self) -> Option<(&str, &str)> {
        let event = self.event.as_deref()?;
        Some(event.rsplit_once('.').unwrap_or(("", event)))
    }
}

/// Models, collections and per-resource errors returned by subscribe/get/call.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ResourceSet {
    #[serde(default)]
    pub models: Map<String, Value>,
    #[serde(default)]
    pub collections: Map<String, Value>,
    #[serde(default)]
    pub errors: HashMap<String, ResError>,
}

impl ResourceSet {
    /// Extract a resource set from a `result` or `data` object.
    ///
    /// Returns `None` when the object carries none of the set keys.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if !["models", "collections", "errors"].iter().any(|k| object.contains_key(*k)) {
            return None;
        }
        Self::deserialize(value).ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.collections.is_empty() && self.errors.is_empty()
    }
}

// =============================================================================
// STRUCTURAL EVENTS
// =============================================================================

/// Event names that describe resource-graph mutations rather than
/// application activity. These never reach application handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuralEvent {
    Add,
    Change,
    Create,
    Delete,
    Patch,
    Reset,
    Reaccess,
    Remove,
    Unsubscribe,
}

impl StructuralEvent {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "add" => Some(Self::Add),
            "change" => Some(Self::Change),
            "create" => Some(Self::Create),
            "delete" => Some(Self::Delete),
            "patch" => Some(Self::Patch),
            "reset" => Some(Self::Reset),
            "reaccess" => Some(Self::Reaccess),
            "remove" => Some(Self::Remove),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::Reset => "reset",
            Self::Reaccess => "reaccess",
            Self::Remove => "remove",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Payload of a `change` event.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Payload of an `add` event.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AddEvent {
    #[serde(default)]
    pub idx: usize,
    #[serde(default)]
    pub value: Value,
}

/// Payload of a `remove` event.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RemoveEvent {
    #[serde(default)]
    pub idx: usize,
}

/// True for the `{"action": "delete"}` marker used in `change` values.
#[must_use]
pub fn is_delete_marker(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.len() == 1 && m.get("action").and_then(Value::as_str) == Some("delete"))
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
