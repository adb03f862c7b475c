//! Read-only views over cached characters, rooms, exits and areas.
//!
//! A view is just an id plus a session handle. Every accessor is a cache
//! lookup, so it reflects the latest patches and may subscribe to the
//! resource on first use. A character view also carries shortcuts for the
//! directed actions, sent as the bot's character.
//!
//! Holding a view keeps its session alive.

use crate::cache::ResourceValue;
use crate::client::Client;
use crate::request::Request;

use super::actions::MessageStyle;
use super::{Session, SessionError};

impl Session {
    #[must_use]
    pub fn character(&self, id: &str) -> CharacterView {
        CharacterView { session: self.clone(), id: id.to_owned() }
    }

    #[must_use]
    pub fn room(&self, id: &str) -> RoomView {
        RoomView { session: self.clone(), id: id.to_owned() }
    }

    #[must_use]
    pub fn exit(&self, id: &str) -> ExitView {
        ExitView { session: self.clone(), id: id.to_owned() }
    }

    #[must_use]
    pub fn area(&self, id: &str) -> AreaView {
        AreaView { session: self.clone(), id: id.to_owned() }
    }
}

async fn text(client: &Client, rid: &str, path: &[&str]) -> Option<String> {
    client.lookup(rid, path).await?.as_str().map(ToOwned::to_owned)
}

async fn flag(client: &Client, rid: &str, key: &str) -> Option<bool> {
    client.lookup(rid, &[key]).await?.as_bool()
}

async fn number(client: &Client, rid: &str, key: &str) -> Option<i64> {
    client.lookup(rid, &[key]).await?.as_i64()
}

/// Strings held in a list field, e.g. an exit's `keys.data`.
async fn strings(client: &Client, rid: &str, path: &[&str]) -> Vec<String> {
    client
        .lookup(rid, path)
        .await
        .as_ref()
        .and_then(ResourceValue::as_sequence)
        .map(|items| items.iter().filter_map(ResourceValue::as_str).map(ToOwned::to_owned).collect())
        .unwrap_or_default()
}

/// Ids behind a list of references, e.g. a room's `chars`.
async fn referenced_ids(client: &Client, rid: &str, key: &str) -> Vec<String> {
    let Some(ResourceValue::Sequence(items)) = client.lookup(rid, &[key]).await else {
        return Vec::new();
    };
    let mut ids = Vec::with_capacity(items.len());
    for item in &items {
        let id = match item {
            ResourceValue::Reference(target) => text(client, target, &["id"]).await,
            ResourceValue::Mapping(map) => map.get("id").and_then(ResourceValue::as_str).map(ToOwned::to_owned),
            _ => None,
        };
        ids.extend(id);
    }
    ids
}

// =============================================================================
// CHARACTER
// =============================================================================

#[derive(Clone)]
pub struct CharacterView {
    session: Session,
    id: String,
}

impl CharacterView {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn client(&self) -> &Client {
        self.session.client()
    }

    fn rid(&self) -> String {
        format!("core.char.{}", self.id)
    }

    pub async fn name(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["name"]).await
    }

    pub async fn surname(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["surname"]).await
    }

    /// `"name surname"`, skipping whichever part is missing.
    pub async fn full_name(&self) -> String {
        let parts = [self.name().await, self.surname().await];
        parts.into_iter().flatten().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
    }

    pub async fn awake(&self) -> bool {
        flag(self.client(), &self.rid(), "awake").await.unwrap_or(false)
    }

    pub async fn gender(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["gender"]).await
    }

    pub async fn species(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["species"]).await
    }

    pub async fn status(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["status"]).await
    }

    pub async fn state(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["state"]).await
    }

    pub async fn avatar(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["avatar"]).await
    }

    /// The server's `type` field, e.g. `"bot"` or `"puppet"`.
    pub async fn kind(&self) -> Option<String> {
        text(self.client(), &self.rid(), &["type"]).await
    }

    /// Tag keys, whether the server sends them as a list or a tag model.
    pub async fn tags(&self) -> Vec<String> {
        match self.client().lookup(&self.rid(), &["tags"]).await {
            Some(ResourceValue::Mapping(map)) => map.into_keys().collect(),
            Some(ResourceValue::Sequence(items)) => {
                items.iter().filter_map(ResourceValue::as_str).map(ToOwned::to_owned).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Idle level as reported by the server.
    pub async fn idle(&self) -> Option<i64> {
        number(self.client(), &self.rid(), "idle").await
    }

    /// Milliseconds since epoch of the last time the character was awake.
    pub async fn last_awake(&self) -> Option<i64> {
        number(self.client(), &self.rid(), "lastAwake").await
    }

    pub fn message(&self, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        self.session.message(&self.id, msg, style)
    }

    pub fn whisper(&self, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        self.session.whisper(&self.id, msg, style)
    }

    pub fn address(&self, msg: &str, style: MessageStyle) -> Result<Request, SessionError> {
        self.session.address(&self.id, msg, style)
    }

    /// Ask this character to come to the bot.
    pub fn summon(&self) -> Result<Request, SessionError> {
        self.session.summon(&self.id)
    }

    /// Ask to go where this character is.
    pub fn join(&self) -> Result<Request, SessionError> {
        self.session.join(&self.id)
    }
}

impl std::fmt::Debug for CharacterView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacterView").field("id", &self.id).finish_non_exhaustive()
    }
}

// =============================================================================
// ROOM
// =============================================================================

#[derive(Clone)]
pub struct RoomView {
    session: Session,
    id: String,
}

impl RoomView {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn client(&self) -> &Client {
        self.session.client()
    }

    fn details(&self) -> String {
        format!("core.room.{}.details", self.id)
    }

    /// Name from the details model, falling back to the base room model.
    pub async fn name(&self) -> Option<String> {
        match text(self.client(), &self.details(), &["name"]).await {
            Some(name) => Some(name),
            None => text(self.client(), &format!("core.room.{}", self.id), &["name"]).await,
        }
    }

    pub async fn description(&self) -> Option<String> {
        text(self.client(), &self.details(), &["desc"]).await
    }

    pub async fn image(&self) -> Option<String> {
        text(self.client(), &self.details(), &["image"]).await
    }

    pub async fn area(&self) -> Option<AreaView> {
        let id = text(self.client(), &self.details(), &["area", "id"]).await?;
        Some(self.session.area(&id))
    }

    pub async fn owner(&self) -> Option<CharacterView> {
        let id = text(self.client(), &self.details(), &["owner", "id"]).await?;
        Some(self.session.character(&id))
    }

    /// Position on the area map.
    pub async fn map_x(&self) -> Option<i64> {
        number(self.client(), &self.details(), "mapX").await
    }

    pub async fn map_y(&self) -> Option<i64> {
        number(self.client(), &self.details(), "mapY").await
    }

    /// Number of awake characters in the room.
    pub async fn pop(&self) -> Option<i64> {
        number(self.client(), &self.details(), "pop").await
    }

    /// Characters present in the room.
    pub async fn characters(&self) -> Vec<CharacterView> {
        referenced_ids(self.client(), &self.details(), "chars")
            .await
            .iter()
            .map(|id| self.session.character(id))
            .collect()
    }

    pub async fn exits(&self) -> Vec<ExitView> {
        referenced_ids(self.client(), &self.details(), "exits").await.iter().map(|id| self.session.exit(id)).collect()
    }

    pub async fn is_dark(&self) -> bool {
        flag(self.client(), &self.details(), "isDark").await.unwrap_or(false)
    }

    pub async fn is_home(&self) -> bool {
        flag(self.client(), &self.details(), "isHome").await.unwrap_or(false)
    }

    pub async fn is_quiet(&self) -> bool {
        flag(self.client(), &self.details(), "isQuiet").await.unwrap_or(false)
    }

    pub async fn is_teleport(&self) -> bool {
        flag(self.client(), &self.details(), "isTeleport").await.unwrap_or(false)
    }

    pub async fn private(&self) -> bool {
        flag(self.client(), &self.details(), "private").await.unwrap_or(false)
    }

    /// Whether sleeping characters are swept out of the room.
    pub async fn autosweep(&self) -> bool {
        flag(self.client(), &self.details(), "autosweep").await.unwrap_or(false)
    }

    /// Milliseconds a character may sleep before being swept.
    pub async fn autosweep_delay(&self) -> Option<i64> {
        number(self.client(), &self.details(), "autosweepDelay").await
    }
}

impl std::fmt::Debug for RoomView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomView").field("id", &self.id).finish_non_exhaustive()
    }
}

// =============================================================================
// EXIT
// =============================================================================

#[derive(Clone)]
pub struct ExitView {
    session: Session,
    id: String,
}

impl ExitView {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn client(&self) -> &Client {
        self.session.client()
    }

    fn details(&self) -> String {
        format!("core.exit.{}.details", self.id)
    }

    pub async fn name(&self) -> Option<String> {
        match text(self.client(), &self.details(), &["name"]).await {
            Some(name) => Some(name),
            None => text(self.client(), &format!("core.exit.{}", self.id), &["name"]).await,
        }
    }

    /// Keywords that trigger the exit.
    pub async fn keys(&self) -> Vec<String> {
        let keys = strings(self.client(), &self.details(), &["keys", "data"]).await;
        if !keys.is_empty() {
            return keys;
        }
        strings(self.client(), &format!("core.exit.{}", self.id), &["keys", "data"]).await
    }

    pub async fn leave_message(&self) -> Option<String> {
        text(self.client(), &self.details(), &["leaveMsg"]).await
    }

    pub async fn arrive_message(&self) -> Option<String> {
        text(self.client(), &self.details(), &["arriveMsg"]).await
    }

    pub async fn travel_message(&self) -> Option<String> {
        text(self.client(), &self.details(), &["travelMsg"]).await
    }

    pub async fn hidden(&self) -> bool {
        flag(self.client(), &self.details(), "hidden").await.unwrap_or(false)
    }

    /// Milliseconds since epoch when the exit was made.
    pub async fn created(&self) -> Option<i64> {
        number(self.client(), &self.details(), "created").await
    }

    /// The room this exit leads to.
    pub async fn target_room(&self) -> Option<RoomView> {
        let id = text(self.client(), &self.details(), &["targetRoom", "id"]).await?;
        Some(self.session.room(&id))
    }
}

impl std::fmt::Debug for ExitView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitView").field("id", &self.id).finish_non_exhaustive()
    }
}

// =============================================================================
// AREA
// =============================================================================

#[derive(Clone)]
pub struct AreaView {
    session: Session,
    id: String,
}

impl AreaView {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn client(&self) -> &Client {
        self.session.client()
    }

    fn details(&self) -> String {
        format!("core.area.{}.details", self.id)
    }

    /// Name from the details model, falling back to the base area model.
    pub async fn name(&self) -> Option<String> {
        match text(self.client(), &self.details(), &["name"]).await {
            Some(name) => Some(name),
            None => text(self.client(), &format!("core.area.{}", self.id), &["name"]).await,
        }
    }

    pub async fn about(&self) -> Option<String> {
        text(self.client(), &self.details(), &["about"]).await
    }

    pub async fn short_description(&self) -> Option<String> {
        text(self.client(), &self.details(), &["shortDesc"]).await
    }

    pub async fn image(&self) -> Option<String> {
        text(self.client(), &self.details(), &["image"]).await
    }

    pub async fn rules(&self) -> Option<String> {
        text(self.client(), &self.details(), &["rules"]).await
    }

    /// Position on the parent area's map.
    pub async fn map_x(&self) -> Option<i64> {
        number(self.client(), &self.details(), "mapX").await
    }

    pub async fn map_y(&self) -> Option<i64> {
        number(self.client(), &self.details(), "mapY").await
    }

    pub async fn owner(&self) -> Option<CharacterView> {
        let id = text(self.client(), &self.details(), &["owner", "id"]).await?;
        Some(self.session.character(&id))
    }

    /// The enclosing area, if any.
    pub async fn parent(&self) -> Option<AreaView> {
        let id = text(self.client(), &self.details(), &["parent", "id"]).await?;
        Some(self.session.area(&id))
    }

    /// Rooms listed directly under this area.
    pub async fn children(&self) -> Vec<RoomView> {
        referenced_ids(self.client(), &self.details(), "children").await.iter().map(|id| self.session.room(id)).collect()
    }

    /// Number of awake characters in the area.
    pub async fn pop(&self) -> Option<i64> {
        number(self.client(), &self.details(), "pop").await
    }

    /// Awake characters in the area's private rooms (`prv`).
    pub async fn private_pop(&self) -> Option<i64> {
        number(self.client(), &self.details(), "prv").await
    }

    pub async fn private(&self) -> bool {
        flag(self.client(), &self.details(), "private").await.unwrap_or(false)
    }
}

impl std::fmt::Debug for AreaView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AreaView").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "views_test.rs"]
mod tests;
