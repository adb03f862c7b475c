//! Local mirror of the server-side resource graph.
//!
//! DESIGN
//! ======
//! Resources are keyed by RID and are either a model (key/value map) or a
//! collection (ordered list). Values are decoded into [`ResourceValue`]
//! once, when they enter the cache, so soft references are an explicit
//! variant rather than an object that happens to carry a `rid` key.
//!
//! Lookups walk a path under the lock until they hit a reference, then
//! release the lock and continue from the referenced RID. A RID that is not
//! cached is fetched through the [`ResourceFetcher`] seam; a RID whose fetch
//! failed with a protocol error is remembered and short-circuits every later
//! lookup until [`Cache::clear`]. Concurrent lookups of the same missing RID
//! share one fetch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use frames::{ErrorCode, ResourceSet};

use crate::request::RequestError;

/// Upper bound on reference hops in one lookup. Guards against cycles.
const MAX_REFERENCE_HOPS: usize = 32;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("resource {rid} is not cached")]
    NotCached { rid: String },
    #[error("resource {rid} is not a {expected}")]
    ShapeMismatch { rid: String, expected: &'static str },
    #[error("index {idx} out of range for {rid} (len {len})")]
    IndexOutOfRange { rid: String, idx: usize, len: usize },
    #[error("resource {rid} is not a collection")]
    NotCollection { rid: String },
}

impl ErrorCode for CacheError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotCached { .. } => "E_NOT_CACHED",
            Self::ShapeMismatch { .. } => "E_SHAPE_MISMATCH",
            Self::IndexOutOfRange { .. } => "E_INDEX_OUT_OF_RANGE",
            Self::NotCollection { .. } => "E_NOT_COLLECTION",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// One value inside a cached resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Scalar(Value),
    Sequence(Vec<ResourceValue>),
    Mapping(BTreeMap<String, ResourceValue>),
    /// Soft or hard reference to another resource by RID.
    Reference(String),
}

impl ResourceValue {
    /// Decode a wire value. An object with a string `rid` becomes a reference.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => match map.get("rid").and_then(Value::as_str) {
                Some(rid) => Self::Reference(rid.to_owned()),
                None => Self::Mapping(decode_map(map)),
            },
            other => Self::Scalar(other),
        }
    }

    /// Encode back to JSON. References become `{"rid": ...}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::Sequence(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Mapping(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Self::Reference(rid) => serde_json::json!({ "rid": rid }),
        }
    }

    /// Child at one path segment: a key for mappings, a decimal index for
    /// sequences.
    #[must_use]
    pub fn child(&self, segment: &str) -> Option<&ResourceValue> {
        match self {
            Self::Mapping(map) => map.get(segment),
            Self::Sequence(items) => items.get(segment.parse::<usize>().ok()?),
            Self::Scalar(_) | Self::Reference(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(v) => v.as_str(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(v) => v.as_bool(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(v) => v.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Self::Reference(rid) => Some(rid),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sequence(&self) -> Option<&[ResourceValue]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_mapping(&self) -> Option<&BTreeMap<String, ResourceValue>> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }
}

fn decode_map(map: Map<String, Value>) -> BTreeMap<String, ResourceValue> {
    map.into_iter().map(|(k, v)| (k, ResourceValue::from_json(v))).collect()
}

/// A cached resource. Its shape never changes once cached.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Model(BTreeMap<String, ResourceValue>),
    Collection(Vec<ResourceValue>),
}

impl Resource {
    /// Decode a `models` entry. Non-object input yields an empty model.
    #[must_use]
    pub fn model(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Model(decode_map(map)),
            _ => Self::Model(BTreeMap::new()),
        }
    }

    /// Decode a `collections` entry. Non-array input yields an empty collection.
    #[must_use]
    pub fn collection(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Collection(items.into_iter().map(ResourceValue::from_json).collect()),
            _ => Self::Collection(Vec::new()),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Collection(_) => "collection",
        }
    }

    fn child(&self, segment: &str) -> Option<&ResourceValue> {
        match self {
            Self::Model(map) => map.get(segment),
            Self::Collection(items) => items.get(segment.parse::<usize>().ok()?),
        }
    }

    fn to_value(&self) -> ResourceValue {
        match self {
            Self::Model(map) => ResourceValue::Mapping(map.clone()),
            Self::Collection(items) => ResourceValue::Sequence(items.clone()),
        }
    }
}

/// Fetches a missing resource into the cache, typically by subscribing.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Make `rid` available in the cache.
    ///
    /// # Errors
    ///
    /// A [`RequestError::Protocol`] marks the RID as errored; any other error
    /// leaves it eligible for a later retry.
    async fn fetch(&self, rid: &str) -> Result<(), RequestError>;
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Default)]
struct CacheState {
    resources: HashMap<String, Resource>,
    errored: HashSet<String>,
    /// One gate per RID with a fetch in flight.
    fetching: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

enum Walk {
    Value(ResourceValue),
    Missing,
    Follow { rid: String, consumed: usize },
}

#[derive(Default)]
pub struct Cache {
    state: Mutex<CacheState>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `path` inside `rid`, following references and fetching
    /// resources that are not cached yet. Never fails: anything unresolved
    /// yields `None`.
    pub async fn get(&self, fetcher: &dyn ResourceFetcher, rid: &str, path: &[&str]) -> Option<ResourceValue> {
        let mut rid = rid.to_owned();
        let mut rest = path;
        for _ in 0..MAX_REFERENCE_HOPS {
            if !self.ensure(fetcher, &rid).await {
                return None;
            }
            match self.walk(&rid, rest) {
                Walk::Value(value) => return Some(value),
                Walk::Missing => return None,
                Walk::Follow { rid: next, consumed } => {
                    rid = next;
                    rest = &rest[consumed..];
                }
            }
        }
        warn!(%rid, "cache: reference chain too deep");
        None
    }

    /// [`Cache::get`] with a fallback.
    pub async fn get_or(
        &self,
        fetcher: &dyn ResourceFetcher,
        rid: &str,
        path: &[&str],
        default: ResourceValue,
    ) -> ResourceValue {
        self.get(fetcher, rid, path).await.unwrap_or(default)
    }

    async fn ensure(&self, fetcher: &dyn ResourceFetcher, rid: &str) -> bool {
        if let Some(ready) = self.settled(rid) {
            return ready;
        }

        let gate = self.state().fetching.entry(rid.to_owned()).or_default().clone();
        let _turn = gate.lock().await;
        if let Some(ready) = self.settled(rid) {
            debug!(%rid, "cache: fetched by a concurrent lookup");
            return ready;
        }

        let fetched = fetcher.fetch(rid).await;
        self.state().fetching.remove(rid);
        match fetched {
            Ok(()) => {}
            Err(RequestError::Protocol(err)) => {
                warn!(%rid, code = %err.code, message = %err.message, "cache: fetch failed, marking errored");
                self.mark_errored(rid);
                return false;
            }
            Err(e) => {
                warn!(%rid, error = %e, code = e.error_code(), "cache: fetch failed");
                return false;
            }
        }

        let state = self.state();
        if state.resources.contains_key(rid) {
            return true;
        }
        if !state.errored.contains(rid) {
            warn!(%rid, "cache: resource still missing after fetch");
        }
        false
    }

    /// `Some(true)` if cached, `Some(false)` if errored, `None` if a fetch is
    /// needed.
    fn settled(&self, rid: &str) -> Option<bool> {
        let state = self.state();
        if state.resources.contains_key(rid) {
            return Some(true);
        }
        if state.errored.contains(rid) {
            debug!(%rid, "cache: errored resource, using default");
            return Some(false);
        }
        None
    }

    fn walk(&self, rid: &str, path: &[&str]) -> Walk {
        let state = self.state();
        let Some(resource) = state.resources.get(rid) else {
            return Walk::Missing;
        };
        let Some((first, rest)) = path.split_first() else {
            return Walk::Value(resource.to_value());
        };
        let Some(mut node) = resource.child(first) else {
            return Walk::Missing;
        };
        for (i, segment) in rest.iter().enumerate() {
            if let ResourceValue::Reference(next) = node {
                return Walk::Follow { rid: next.clone(), consumed: i + 1 };
            }
            match node.child(segment) {
                Some(child) => node = child,
                None => return Walk::Missing,
            }
        }
        match node {
            ResourceValue::Reference(next) => Walk::Follow { rid: next.clone(), consumed: path.len() },
            other => Walk::Value(other.clone()),
        }
    }

    /// Store `resource` under `rid`, replacing any previous value of the
    /// same shape.
    ///
    /// # Errors
    ///
    /// [`CacheError::ShapeMismatch`] if `rid` is cached with the other shape.
    pub fn set(&self, rid: &str, resource: Resource) -> Result<(), CacheError> {
        let mut state = self.state();
        if let Some(existing) = state.resources.get(rid) {
            if existing.shape() != resource.shape() {
                return Err(CacheError::ShapeMismatch { rid: rid.to_owned(), expected: existing.shape() });
            }
        }
        state.errored.remove(rid);
        state.resources.insert(rid.to_owned(), resource);
        Ok(())
    }

    /// Apply a sparse patch to a model. A delete marker removes the key.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotCached`] or [`CacheError::ShapeMismatch`] for a
    /// collection.
    pub fn change(&self, rid: &str, values: &Map<String, Value>) -> Result<(), CacheError> {
        let mut state = self.state();
        let model = match state.resources.get_mut(rid) {
            Some(Resource::Model(model)) => model,
            Some(Resource::Collection(_)) => {
                return Err(CacheError::ShapeMismatch { rid: rid.to_owned(), expected: "model" });
            }
            None => return Err(CacheError::NotCached { rid: rid.to_owned() }),
        };
        for (key, value) in values {
            if frames::is_delete_marker(value) {
                model.remove(key);
            } else {
                model.insert(key.clone(), ResourceValue::from_json(value.clone()));
            }
        }
        Ok(())
    }

    /// Insert `value` at `idx` in a collection.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotCached`], [`CacheError::NotCollection`], or
    /// [`CacheError::IndexOutOfRange`] when `idx > len`.
    pub fn add(&self, rid: &str, idx: usize, value: Value) -> Result<(), CacheError> {
        let mut state = self.state();
        let items = collection_mut(&mut state, rid)?;
        if idx > items.len() {
            return Err(CacheError::IndexOutOfRange { rid: rid.to_owned(), idx, len: items.len() });
        }
        items.insert(idx, ResourceValue::from_json(value));
        Ok(())
    }

    /// Remove and return the value at `idx` in a collection.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotCached`], [`CacheError::NotCollection`], or
    /// [`CacheError::IndexOutOfRange`] when `idx >= len`.
    pub fn remove(&self, rid: &str, idx: usize) -> Result<ResourceValue, CacheError> {
        let mut state = self.state();
        let items = collection_mut(&mut state, rid)?;
        if idx >= items.len() {
            return Err(CacheError::IndexOutOfRange { rid: rid.to_owned(), idx, len: items.len() });
        }
        Ok(items.remove(idx))
    }

    /// Merge a resource set from a response or event. Per-resource errors
    /// are logged and remembered.
    pub fn merge(&self, set: &ResourceSet) {
        for (rid, value) in &set.models {
            if let Err(e) = self.set(rid, Resource::model(value.clone())) {
                warn!(%rid, error = %e, code = e.error_code(), "cache: model not merged");
            }
        }
        for (rid, value) in &set.collections {
            if let Err(e) = self.set(rid, Resource::collection(value.clone())) {
                warn!(%rid, error = %e, code = e.error_code(), "cache: collection not merged");
            }
        }
        for (rid, err) in &set.errors {
            warn!(%rid, code = %err.code, message = %err.message, "cache: resource error");
            self.mark_errored(rid);
        }
    }

    #[must_use]
    pub fn contains(&self, rid: &str) -> bool {
        self.state().resources.contains_key(rid)
    }

    /// Snapshot of a cached resource without fetching or following references.
    #[must_use]
    pub fn resource(&self, rid: &str) -> Option<Resource> {
        self.state().resources.get(rid).cloned()
    }

    pub fn delete(&self, rid: &str) -> Option<Resource> {
        self.state().resources.remove(rid)
    }

    /// Drop every resource and forget errored RIDs.
    pub fn clear(&self) {
        let mut state = self.state();
        state.resources.clear();
        state.errored.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().resources.is_empty()
    }

    #[must_use]
    pub fn is_errored(&self, rid: &str) -> bool {
        self.state().errored.contains(rid)
    }

    fn mark_errored(&self, rid: &str) {
        self.state().errored.insert(rid.to_owned());
    }
}

fn collection_mut<'a>(state: &'a mut CacheState, rid: &str) -> Result<&'a mut Vec<ResourceValue>, CacheError> {
    match state.resources.get_mut(rid) {
        Some(Resource::Collection(items)) => Ok(items),
        Some(Resource::Model(_)) => Err(CacheError::NotCollection { rid: rid.to_owned() }),
        None => Err(CacheError::NotCached { rid: rid.to_owned() }),
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
