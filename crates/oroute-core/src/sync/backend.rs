//! Contract of the hierarchical realtime store rooms are replicated through.

use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),
    #[error("Backend disconnected")]
    Disconnected,
    #[error("Backend error: {0}")]
    Other(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Slash separated location in the store, e.g. `rooms/abc/lines/xyz`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DbPath {
    segments: Vec<String>,
}

impl DbPath {
    /// The root of the store.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path, ignoring leading and trailing slashes.
    pub fn parse(path: &str) -> BackendResult<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| !is_valid_segment(s)) {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn child(&self, key: impl AsRef<str>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.as_ref().to_string());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    /// Last segment, `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` is `other` or lies below it.
    pub fn starts_with(&self, other: &DbPath) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| matches!(c, '.' | '#' | '$' | '[' | ']') || c.is_control())
}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl FromStr for DbPath {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Handle returned by [`Backend::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// What a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// One event per child appearing under the path. Existing children are replayed.
    ChildAdded,
    /// One event per child disappearing from under the path.
    ChildRemoved,
    /// The full value at the path, on subscribe and after every change.
    Value,
}

/// Payload of a [`RemoteEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEventKind {
    ChildAdded { key: String, value: Value },
    ChildRemoved { key: String, value: Value },
    /// `Value::Null` when nothing is stored at the path.
    Value(Value),
}

/// A change delivered to one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub subscription: SubscriptionId,
    pub path: DbPath,
    pub kind: RemoteEventKind,
}

/// Key of the server timestamp placeholder.
pub const SERVER_VALUE_KEY: &str = ".sv";

/// Realtime hierarchical key-value store.
///
/// Writes are fire-and-forget for the caller. Events are not
/// pushed through callbacks; the owner drains them with [`Backend::poll_events`]
/// once per frame and routes them by [`SubscriptionId`].
pub trait Backend {
    /// Replace the value at `path`. Writing `Value::Null` removes it.
    fn set(&self, path: &DbPath, value: Value) -> BackendResult<()>;

    /// Write several children of `path` at once, leaving the others alone.
    fn update(&self, path: &DbPath, fields: Map<String, Value>) -> BackendResult<()>;

    fn remove(&self, path: &DbPath) -> BackendResult<()>;

    /// Allocate a new unique child key under `path` without writing anything.
    fn push_key(&self, path: &DbPath) -> BackendResult<String>;

    fn subscribe(&self, path: &DbPath, kind: SubscriptionKind) -> BackendResult<SubscriptionId>;

    /// Stop a subscription. Unknown ids are ignored and no further events
    /// are delivered for the id.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Take all events delivered since the last call, in delivery order.
    fn poll_events(&self) -> Vec<RemoteEvent>;

    /// Placeholder the backend replaces with its own clock on write.
    fn server_timestamp(&self) -> Value {
        json!({ SERVER_VALUE_KEY: "timestamp" })
    }
}

impl<T: Backend + ?Sized> Backend for &T {
    fn set(&self, path: &DbPath, value: Value) -> BackendResult<()> {
        (**self).set(path, value)
    }

    fn update(&self, path: &DbPath, fields: Map<String, Value>) -> BackendResult<()> {
        (**self).update(path, fields)
    }

    fn remove(&self, path: &DbPath) -> BackendResult<()> {
        (**self).remove(path)
    }

    fn push_key(&self, path: &DbPath) -> BackendResult<String> {
        (**self).push_key(path)
    }

    fn subscribe(&self, path: &DbPath, kind: SubscriptionKind) -> BackendResult<SubscriptionId> {
        (**self).subscribe(path, kind)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        (**self).unsubscribe(id)
    }

    fn poll_events(&self) -> Vec<RemoteEvent> {
        (**self).poll_events()
    }

    fn server_timestamp(&self) -> Value {
        (**self).server_timestamp()
    }
}

/// Whether `value` is the server timestamp placeholder.
pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(SERVER_VALUE_KEY) == Some(&json!("timestamp")))
}
