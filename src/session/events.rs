//! Typed application events.
//!
//! Every application event carries a `type` naming one of a closed set of
//! kinds. Each kind maps to exactly one payload shape:
//!
//! | kinds                                                              | shape                      |
//! |--------------------------------------------------------------------|----------------------------|
//! | say, pose, wakeup, sleep, leave, arrive, describe, action          | [`CharacterMessage`]       |
//! | ooc                                                                | [`CharacterPoseableMessage`] |
//! | whisper, message, warn, mail, address, controlRequest              | [`TargetedCharacterMessage`] |
//! | travel                                                             | [`TargetRoomMessage`]      |
//! | summon, join, leadRequest, followRequest, follow, stopFollow, stopLead | [`TargetedCharacterEvent`] |

use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::AppEvent;

// =============================================================================
// KINDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Say,
    Pose,
    Wakeup,
    Sleep,
    Leave,
    Arrive,
    Describe,
    Action,
    Ooc,
    Whisper,
    Message,
    Warn,
    Mail,
    Address,
    ControlRequest,
    Travel,
    Summon,
    Join,
    LeadRequest,
    FollowRequest,
    Follow,
    StopFollow,
    StopLead,
}

/// Payload layout shared by a group of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    CharacterMessage,
    CharacterPoseableMessage,
    TargetedCharacterMessage,
    TargetRoomMessage,
    TargetedCharacterEvent,
}

impl EventKind {
    pub const ALL: [EventKind; 23] = [
        Self::Say,
        Self::Pose,
        Self::Wakeup,
        Self::Sleep,
        Self::Leave,
        Self::Arrive,
        Self::Describe,
        Self::Action,
        Self::Ooc,
        Self::Whisper,
        Self::Message,
        Self::Warn,
        Self::Mail,
        Self::Address,
        Self::ControlRequest,
        Self::Travel,
        Self::Summon,
        Self::Join,
        Self::LeadRequest,
        Self::FollowRequest,
        Self::Follow,
        Self::StopFollow,
        Self::StopLead,
    ];

    /// Parse the wire `type` field.
    #[must_use]
    pub fn from_type(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Say => "say",
            Self::Pose => "pose",
            Self::Wakeup => "wakeup",
            Self::Sleep => "sleep",
            Self::Leave => "leave",
            Self::Arrive => "arrive",
            Self::Describe => "describe",
            Self::Action => "action",
            Self::Ooc => "ooc",
            Self::Whisper => "whisper",
            Self::Message => "message",
            Self::Warn => "warn",
            Self::Mail => "mail",
            Self::Address => "address",
            Self::ControlRequest => "controlRequest",
            Self::Travel => "travel",
            Self::Summon => "summon",
            Self::Join => "join",
            Self::LeadRequest => "leadRequest",
            Self::FollowRequest => "followRequest",
            Self::Follow => "follow",
            Self::StopFollow => "stopFollow",
            Self::StopLead => "stopLead",
        }
    }

    #[must_use]
    pub fn shape(self) -> PayloadShape {
        match self {
            Self::Say
            | Self::Pose
            | Self::Wakeup
            | Self::Sleep
            | Self::Leave
            | Self::Arrive
            | Self::Describe
            | Self::Action => PayloadShape::CharacterMessage,
            Self::Ooc => PayloadShape::CharacterPoseableMessage,
            Self::Whisper | Self::Message | Self::Warn | Self::Mail | Self::Address | Self::ControlRequest => {
                PayloadShape::TargetedCharacterMessage
            }
            Self::Travel => PayloadShape::TargetRoomMessage,
            Self::Summon
            | Self::Join
            | Self::LeadRequest
            | Self::FollowRequest
            | Self::Follow
            | Self::StopFollow
            | Self::StopLead => PayloadShape::TargetedCharacterEvent,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// A character as it appears inside an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CharacterRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

impl CharacterRef {
    /// `"name surname"`, or the id when the event carried no name.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.name, &self.surname) {
            (Some(name), Some(surname)) if !surname.is_empty() => format!("{name} {surname}"),
            (Some(name), _) => name.clone(),
            _ => self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoomRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterMessage {
    pub character: CharacterRef,
    pub message: String,
    pub puppeteer: Option<CharacterRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterPoseableMessage {
    pub character: CharacterRef,
    pub message: String,
    pub pose: bool,
    pub puppeteer: Option<CharacterRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedCharacterMessage {
    pub character: CharacterRef,
    pub message: String,
    pub target: CharacterRef,
    /// Every addressed character. Always includes `target`.
    pub targets: Vec<CharacterRef>,
    pub ooc: bool,
    pub pose: bool,
    pub puppeteer: Option<CharacterRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRoomMessage {
    pub character: CharacterRef,
    pub message: String,
    pub target_room: RoomRef,
    pub puppeteer: Option<CharacterRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedCharacterEvent {
    pub character: CharacterRef,
    pub target: CharacterRef,
    pub puppeteer: Option<CharacterRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    CharacterMessage(CharacterMessage),
    CharacterPoseableMessage(CharacterPoseableMessage),
    TargetedCharacterMessage(TargetedCharacterMessage),
    TargetRoomMessage(TargetRoomMessage),
    TargetedCharacterEvent(TargetedCharacterEvent),
}

impl EventPayload {
    /// The character that caused the event.
    #[must_use]
    pub fn character(&self) -> &CharacterRef {
        match self {
            Self::CharacterMessage(p) => &p.character,
            Self::CharacterPoseableMessage(p) => &p.character,
            Self::TargetedCharacterMessage(p) => &p.character,
            Self::TargetRoomMessage(p) => &p.character,
            Self::TargetedCharacterEvent(p) => &p.character,
        }
    }

    /// Message text. Targeted character events carry none.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::CharacterMessage(p) => Some(&p.message),
            Self::CharacterPoseableMessage(p) => Some(&p.message),
            Self::TargetedCharacterMessage(p) => Some(&p.message),
            Self::TargetRoomMessage(p) => Some(&p.message),
            Self::TargetedCharacterEvent(_) => None,
        }
    }

    #[must_use]
    pub fn puppeteer(&self) -> Option<&CharacterRef> {
        match self {
            Self::CharacterMessage(p) => p.puppeteer.as_ref(),
            Self::CharacterPoseableMessage(p) => p.puppeteer.as_ref(),
            Self::TargetedCharacterMessage(p) => p.puppeteer.as_ref(),
            Self::TargetRoomMessage(p) => p.puppeteer.as_ref(),
            Self::TargetedCharacterEvent(p) => p.puppeteer.as_ref(),
        }
    }

    /// The targeted character, for shapes that have one.
    #[must_use]
    pub fn target(&self) -> Option<&CharacterRef> {
        match self {
            Self::TargetedCharacterMessage(p) => Some(&p.target),
            Self::TargetedCharacterEvent(p) => Some(&p.target),
            _ => None,
        }
    }
}

/// A classified application event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub id: Option<String>,
    /// Server timestamp in milliseconds.
    pub time: Option<i64>,
    pub sig: Option<String>,
    /// Resource the event arrived on.
    pub rid: String,
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn character(&self) -> &CharacterRef {
        self.payload.character()
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.payload.message()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = self.character().display_name();
        match (&self.payload, self.message()) {
            (EventPayload::TargetRoomMessage(p), Some(msg)) => {
                let room = p.target_room.name.as_deref().unwrap_or(&p.target_room.id);
                write!(f, "{} {who} -> {room}: {msg}", self.kind)
            }
            (_, Some(msg)) => match self.payload.target() {
                Some(target) => write!(f, "{} {who} -> {}: {msg}", self.kind, target.display_name()),
                None => write!(f, "{} {who}: {msg}", self.kind),
            },
            (_, None) => match self.payload.target() {
                Some(target) => write!(f, "{} {who} -> {}", self.kind, target.display_name()),
                None => write!(f, "{} {who}", self.kind),
            },
        }
    }
}

// =============================================================================
// CLASSIFY
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    sig: Option<String>,
    #[serde(default, rename = "char")]
    character: CharacterRef,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    puppeteer: Option<CharacterRef>,
    #[serde(default)]
    target: Option<CharacterRef>,
    #[serde(default)]
    targets: Option<Vec<CharacterRef>>,
    #[serde(default, rename = "targetRoom")]
    target_room: Option<RoomRef>,
    #[serde(default)]
    pose: Option<bool>,
    #[serde(default)]
    ooc: Option<bool>,
}

/// Turn a raw application event into a typed [`Event`].
///
/// Events without a `type`, with an unknown `type`, or with mistyped fields
/// are logged and yield `None`.
#[must_use]
pub fn classify(raw: &AppEvent) -> Option<Event> {
    let wire = match WireEvent::deserialize(&raw.data) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(rid = %raw.rid, name = %raw.name, error = %e, "events: undecodable event data");
            return None;
        }
    };
    let Some(type_name) = wire.kind.as_deref() else {
        debug!(rid = %raw.rid, name = %raw.name, "events: event without type ignored");
        return None;
    };
    let Some(kind) = EventKind::from_type(type_name) else {
        warn!(rid = %raw.rid, event_type = %type_name, "events: unknown event type");
        return None;
    };

    let character = wire.character;
    let message = wire.msg.unwrap_or_default();
    let puppeteer = wire.puppeteer.filter(|p| !p.id.is_empty());
    let payload = match kind.shape() {
        PayloadShape::CharacterMessage => EventPayload::CharacterMessage(CharacterMessage { character, message, puppeteer }),
        PayloadShape::CharacterPoseableMessage => EventPayload::CharacterPoseableMessage(CharacterPoseableMessage {
            character,
            message,
            pose: wire.pose.unwrap_or(false),
            puppeteer,
        }),
        PayloadShape::TargetedCharacterMessage => {
            let target = wire.target.unwrap_or_default();
            let mut targets = wire.targets.unwrap_or_default();
            if targets.len() > 1 {
                debug!(rid = %raw.rid, count = targets.len(), "events: multiple targets");
            }
            if !target.id.is_empty() && !targets.iter().any(|t| t.id == target.id) {
                targets.push(target.clone());
            }
            EventPayload::TargetedCharacterMessage(TargetedCharacterMessage {
                character,
                message,
                target,
                targets,
                ooc: wire.ooc.unwrap_or(false),
                pose: wire.pose.unwrap_or(false),
                puppeteer,
            })
        }
        PayloadShape::TargetRoomMessage => EventPayload::TargetRoomMessage(TargetRoomMessage {
            character,
            message,
            target_room: wire.target_room.unwrap_or_default(),
            puppeteer,
        }),
        PayloadShape::TargetedCharacterEvent => EventPayload::TargetedCharacterEvent(TargetedCharacterEvent {
            character,
            target: wire.target.unwrap_or_default(),
            puppeteer,
        }),
    };

    Some(Event { kind, id: wire.id, time: wire.time, sig: wire.sig, rid: raw.rid.clone(), payload })
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
