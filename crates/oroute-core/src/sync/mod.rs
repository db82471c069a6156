//! Room replication over a realtime hierarchical backend.
//!
//! Local edits are applied immediately and written fire-and-forget.
//! Remote changes arrive as [`RemoteEvent`]s that the owning
//! [`RoomSession`] drains once per frame.

pub mod backend;
pub mod lines;
pub mod memory;
pub mod session;
pub mod view;

pub use backend::{
    Backend, BackendError, BackendResult, DbPath, RemoteEvent, RemoteEventKind, SubscriptionId,
    SubscriptionKind,
};
pub use lines::{LineReplicator, StrokeWatch};
pub use memory::{MemoryBackend, MemoryDatabase};
pub use session::{RoomId, RoomSession, SessionEvent, create_room};
pub use view::{ViewBroadcast, ViewMode, ViewSharing, ViewUpdate};
