//! An online room: gestures, strokes, view sharing and background image
//! bound to one backend connection for the lifetime of the session.

use super::backend::{Backend, BackendResult, DbPath, RemoteEvent, RemoteEventKind, SubscriptionId, SubscriptionKind};
use super::lines::LineReplicator;
use super::view::{ViewMode, ViewSharing, ViewUpdate};
use crate::config::CanvasConfig;
use crate::gesture::{DrawingTarget, GestureController};
use crate::image::{ImageStore, UploadMetadata, UploadResult};
use crate::input::{InputEvent, Mode};
use crate::lines::{LineId, Lines};
use crate::view::ViewModel;
use kurbo::{Point, Size};
use serde::Serialize;
use serde_json::{Value, json};

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Key of a room under `rooms`.
pub type RoomId = String;

/// Changes the host should react to after a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Background image URL, `None` when the room has no image yet.
    ImageChanged(Option<String>),
    /// Nothing is stored for the room.
    RoomNotFound,
    ViewModeChanged(ViewMode),
    LinesChanged,
    ViewChanged,
}

fn rooms_path() -> DbPath {
    DbPath::root().child("rooms")
}

/// Create an empty room and return its id.
pub fn create_room(backend: &dyn Backend) -> BackendResult<RoomId> {
    let rooms = rooms_path();
    let key = backend.push_key(&rooms)?;
    backend.set(
        &rooms.child(&key),
        json!({
            "image": "",
            "lines": {},
            "timestamp": backend.server_timestamp(),
        }),
    )?;
    log::info!("Created room {}", key);
    Ok(key)
}

/// A joined room. Subscriptions are opened by [`RoomSession::join`] and
/// closed by [`RoomSession::leave`] or on drop.
pub struct RoomSession<B: Backend> {
    backend: B,
    room_id: RoomId,
    room_path: DbPath,
    gestures: GestureController,
    lines: Lines,
    replicator: LineReplicator,
    sharing: ViewSharing,
    image_url: Option<String>,
    image_sub: Option<SubscriptionId>,
    closed: bool,
}

impl<B: Backend> RoomSession<B> {
    /// Enter a room and start listening for its strokes and image.
    pub fn join(backend: B, room_id: &str, config: CanvasConfig) -> BackendResult<Self> {
        let room_path = DbPath::parse(&format!("rooms/{}", room_id))?;
        let interval = config.broadcast_interval();
        let mut replicator = LineReplicator::new(&room_path);
        replicator.open(&backend);
        let image_sub = backend.subscribe(&room_path.child("image"), SubscriptionKind::Value)?;

        log::info!("Joined room {}", room_id);
        Ok(Self {
            sharing: ViewSharing::new(&room_path, interval),
            backend,
            room_id: room_id.to_string(),
            room_path,
            gestures: GestureController::new(config),
            lines: Lines::new(),
            replicator,
            image_url: None,
            image_sub: Some(image_sub),
            closed: false,
        })
    }

    /// Close every subscription and leave the room.
    pub fn leave(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.replicator.teardown(&self.backend);
        self.sharing.teardown(&self.backend);
        if let Some(id) = self.image_sub.take() {
            self.backend.unsubscribe(id);
        }
        log::info!("Left room {}", self.room_id);
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn room_path(&self) -> &DbPath {
        &self.room_path
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lines(&self) -> &Lines {
        &self.lines
    }

    pub fn replicator(&self) -> &LineReplicator {
        &self.replicator
    }

    pub fn view(&self) -> ViewModel {
        self.gestures.view()
    }

    pub fn mode(&self) -> Mode {
        self.gestures.mode()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.sharing.mode()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn viewport(&self) -> Size {
        self.gestures.viewport()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.gestures.set_mode(mode);
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.gestures.set_viewport(viewport);
        self.sharing.mark_dirty();
        if let Some(view) = self.sharing.refit(viewport) {
            self.gestures.set_view(view);
        }
    }

    /// Switch viewpoint sharing role.
    pub fn set_view_mode(&mut self, mode: ViewMode) {
        if let Err(e) = self.sharing.set_mode(&self.backend, mode) {
            log::warn!("Failed to switch view mode to {:?}: {}", mode, e);
        }
    }

    /// Feed one input event. Returns whether the view changed.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        let mut target = RoomTarget {
            backend: &self.backend,
            replicator: &mut self.replicator,
            lines: &mut self.lines,
        };
        let changed = self.gestures.handle_event(event, &mut target);
        if changed {
            self.sharing.mark_dirty();
        }
        changed
    }

    /// Run one frame: momentum, remote events, leader publish.
    pub fn frame(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }

        if self.gestures.tick() {
            self.sharing.mark_dirty();
            events.push(SessionEvent::ViewChanged);
        }

        let mut lines_changed = false;
        // Subscriptions opened while handling a batch replay into the next one.
        loop {
            let batch = self.backend.poll_events();
            if batch.is_empty() {
                break;
            }
            for event in batch {
                lines_changed |= self.route(&event, &mut events);
            }
        }
        if lines_changed {
            events.push(SessionEvent::LinesChanged);
        }

        let view = self.gestures.view();
        self.sharing
            .publish(&self.backend, &view, self.gestures.viewport(), now);
        events
    }

    /// Dispatch one remote event by subscription. Returns whether strokes changed.
    fn route(&mut self, event: &RemoteEvent, events: &mut Vec<SessionEvent>) -> bool {
        let sub = event.subscription;
        if Some(sub) == self.image_sub {
            events.extend(self.on_image(event));
            return false;
        }
        if !self.sharing.owns_subscription(sub) {
            return self.replicator.handle_event(&self.backend, &mut self.lines, event);
        }
        let viewport = self.gestures.viewport();
        match self.sharing.handle_event(&self.backend, event, viewport) {
            Some(ViewUpdate::Follow(view)) => {
                if view != self.gestures.view() {
                    self.gestures.set_view(view);
                    events.push(SessionEvent::ViewChanged);
                }
            }
            Some(ViewUpdate::Demoted) => {
                events.push(SessionEvent::ViewModeChanged(self.sharing.mode()));
            }
            None => {}
        }
        false
    }

    fn on_image(&mut self, event: &RemoteEvent) -> Option<SessionEvent> {
        let RemoteEventKind::Value(value) = &event.kind else {
            return None;
        };
        let url = match value {
            Value::Null => return Some(SessionEvent::RoomNotFound),
            Value::String(url) => (!url.is_empty()).then(|| url.clone()),
            other => {
                log::debug!("Ignoring image value {}", other);
                return None;
            }
        };
        if url == self.image_url {
            return None;
        }
        self.image_url = url.clone();
        Some(SessionEvent::ImageChanged(url))
    }

    /// Remove every stroke in the room.
    pub fn clear_all_lines(&mut self) {
        self.replicator.clear_all(&self.backend, &mut self.lines);
    }

    /// Upload a background image and point the room at it.
    ///
    /// On failure the room's image is left unchanged; show
    /// [`UploadError::notice`](crate::image::UploadError::notice) to the user.
    pub async fn upload_image<S>(&mut self, store: &S, name: &str, bytes: Vec<u8>) -> UploadResult<String>
    where
        S: ImageStore + ?Sized,
    {
        let stored = async {
            let image = store.upload(name, bytes, UploadMetadata::default()).await?;
            store.download_url(&image).await
        };
        let url = match stored.await {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Image upload failed: {}", e);
                return Err(e);
            }
        };

        let path = self.room_path.child("image");
        if let Err(e) = self.backend.set(&path, json!(url)) {
            log::warn!("Failed to store image URL: {}", e);
        }
        self.image_url = Some(url.clone());
        Ok(url)
    }
}

impl<B: Backend> Drop for RoomSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Gesture edits routed through the replicator.
struct RoomTarget<'a> {
    backend: &'a dyn Backend,
    replicator: &'a mut LineReplicator,
    lines: &'a mut Lines,
}

impl DrawingTarget for RoomTarget<'_> {
    fn lines(&self) -> &Lines {
        self.lines
    }

    fn add_point_to_drawing_line(&mut self, point: Point) {
        self.replicator.add_point(self.backend, self.lines, point);
    }

    fn end_drawing(&mut self) {
        self.replicator.end_drawing(self.backend, self.lines);
    }

    fn remove_lines(&mut self, ids: &[LineId]) {
        self.replicator.remove_lines(self.backend, self.lines, ids);
    }
}
