//! O-Route Core Library
//!
//! Platform-agnostic view transform, stroke engine and room synchronization
//! for the O-Route collaborative map whiteboard.

pub mod canvas;
pub mod config;
pub mod gesture;
pub mod image;
pub mod input;
pub mod lines;
pub mod math;
pub mod sync;
pub mod view;

pub use canvas::LocalCanvas;
pub use config::{CanvasConfig, ConfigError};
pub use gesture::{DrawingTarget, GestureController};
pub use image::{ImageRef, ImageStore, MemoryImageStore, UploadError, UploadMetadata, UploadResult};
pub use input::{InputEvent, Mode, Modifiers};
pub use lines::{CompositionMode, DrawLine, LineId, Lines};
pub use math::{Segment, VectorExt};
pub use sync::{
    Backend, BackendError, BackendResult, DbPath, MemoryBackend, MemoryDatabase, RoomId,
    RoomSession, SessionEvent, ViewBroadcast, ViewMode, create_room,
};
pub use view::ViewModel;
