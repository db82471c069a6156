//! Leader/follower viewpoint sharing.
//!
//! The leader writes a random token to `view/leaderId` once and then
//! publishes the content-space centre, visible area and rotation of its view
//! at a bounded rate. Followers fit their own viewport onto that payload.
//!
//! Election is last-writer-wins on the token slot: a leader that sees a
//! foreign token demotes itself. This is eventually consistent and not
//! leader-safe; two clients promoting in the same tick both publish until
//! one of them observes the other's token.

use super::backend::{Backend, BackendResult, DbPath, RemoteEvent, RemoteEventKind, SubscriptionId, SubscriptionKind};
use crate::view::ViewModel;
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use uuid::Uuid;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Viewpoint sharing role of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Purely local view.
    #[default]
    Single,
    Leader,
    Follower,
}

/// Shared payload stored at `rooms/{room}/view`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewBroadcast {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<String>,
    /// Content point at the leader's screen centre.
    pub center: Point,
    /// Leader viewport size in content units.
    pub area: Size,
    pub rotation: f64,
}

impl ViewBroadcast {
    /// Describe what `view` shows inside `viewport`.
    pub fn from_view(view: &ViewModel, viewport: Size) -> Self {
        Self {
            leader_id: None,
            center: view.visible_center(viewport),
            area: view.visible_area(viewport),
            rotation: view.rotation,
        }
    }

    /// View that shows the same region inside a local `viewport`.
    pub fn fit(&self, viewport: Size) -> Option<ViewModel> {
        ViewModel::fit(self.center, self.area, self.rotation, viewport)
    }
}

/// Outcome of a view event for the owning session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewUpdate {
    /// Follower view derived from a new payload.
    Follow(ViewModel),
    /// Another client took leadership; now following.
    Demoted,
}

/// Publishes or follows the shared viewpoint of one room.
#[derive(Debug)]
pub struct ViewSharing {
    view_path: DbPath,
    mode: ViewMode,
    token: Option<String>,
    leader_sub: Option<SubscriptionId>,
    follow_sub: Option<SubscriptionId>,
    interval: Duration,
    last_publish: Option<Instant>,
    dirty: bool,
    /// Latest complete payload seen while following.
    followed: Option<ViewBroadcast>,
}

impl ViewSharing {
    pub fn new(room_path: &DbPath, interval: Duration) -> Self {
        Self {
            view_path: room_path.child("view"),
            mode: ViewMode::Single,
            token: None,
            leader_sub: None,
            follow_sub: None,
            interval,
            last_publish: None,
            dirty: false,
            followed: None,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Leader identity token, only while leading.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn view_path(&self) -> &DbPath {
        &self.view_path
    }

    pub fn owns_subscription(&self, id: SubscriptionId) -> bool {
        self.leader_sub == Some(id) || self.follow_sub == Some(id)
    }

    /// Switch role, closing the previous role's subscriptions first.
    pub fn set_mode(&mut self, backend: &dyn Backend, mode: ViewMode) -> BackendResult<()> {
        self.teardown(backend);
        self.mode = mode;
        match mode {
            ViewMode::Single => {}
            ViewMode::Leader => {
                let token = Uuid::new_v4().to_string();
                let slot = self.view_path.child("leaderId");
                backend.set(&slot, json!(token))?;
                self.leader_sub = Some(backend.subscribe(&slot, SubscriptionKind::Value)?);
                self.token = Some(token);
                self.dirty = true;
                self.last_publish = None;
            }
            ViewMode::Follower => {
                self.follow_sub = Some(backend.subscribe(&self.view_path, SubscriptionKind::Value)?);
            }
        }
        log::info!("View mode is now {:?}", mode);
        Ok(())
    }

    /// Record that the local view changed since the last publish.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a leader publish is due at `now`.
    pub fn should_publish(&self, now: Instant) -> bool {
        if self.mode != ViewMode::Leader || !self.dirty {
            return false;
        }
        match self.last_publish {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Publish the leader's view if due. Returns whether a write was made.
    pub fn publish(&mut self, backend: &dyn Backend, view: &ViewModel, viewport: Size, now: Instant) -> bool {
        if !self.should_publish(now) || viewport.is_zero_area() {
            return false;
        }
        let payload = ViewBroadcast::from_view(view, viewport);
        let mut fields = Map::new();
        fields.insert("center".to_string(), json!(payload.center));
        fields.insert("area".to_string(), json!(payload.area));
        fields.insert("rotation".to_string(), json!(payload.rotation));
        if let Err(e) = backend.update(&self.view_path, fields) {
            log::warn!("Failed to publish view: {}", e);
            return false;
        }
        self.last_publish = Some(now);
        self.dirty = false;
        true
    }

    /// Apply a remote event addressed to one of this component's subscriptions.
    pub fn handle_event(&mut self, backend: &dyn Backend, event: &RemoteEvent, viewport: Size) -> Option<ViewUpdate> {
        let RemoteEventKind::Value(value) = &event.kind else {
            return None;
        };
        let sub = Some(event.subscription);

        if sub == self.leader_sub {
            let Value::String(leader) = value else {
                return None;
            };
            if self.token.as_deref() == Some(leader.as_str()) {
                return None;
            }
            log::info!("Leadership taken by {}, following", leader);
            if let Err(e) = self.set_mode(backend, ViewMode::Follower) {
                log::warn!("Failed to follow new leader: {}", e);
            }
            return Some(ViewUpdate::Demoted);
        }

        if sub == self.follow_sub {
            let payload: ViewBroadcast = match serde_json::from_value(value.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    log::debug!("Ignoring incomplete view payload: {}", e);
                    return None;
                }
            };
            let view = payload.fit(viewport);
            self.followed = Some(payload);
            return view.map(ViewUpdate::Follow);
        }

        None
    }

    /// Fit the last followed payload onto a new local viewport.
    pub fn refit(&self, viewport: Size) -> Option<ViewModel> {
        if self.mode != ViewMode::Follower {
            return None;
        }
        self.followed.as_ref()?.fit(viewport)
    }

    /// Close every subscription of the current role.
    pub fn teardown(&mut self, backend: &dyn Backend) {
        for id in self.leader_sub.take().into_iter().chain(self.follow_sub.take()) {
            backend.unsubscribe(id);
        }
        self.token = None;
        self.followed = None;
    }
}
