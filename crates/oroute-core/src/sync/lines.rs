//! Stroke replication between the local [`Lines`] and a room's `lines` collection.

use super::backend::{Backend, DbPath, RemoteEvent, RemoteEventKind, SubscriptionId, SubscriptionKind};
use crate::lines::{CompositionMode, DrawLine, LineId, Lines, now_millis};
use kurbo::Point;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Listener lifecycle for a stroke someone else is drawing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StrokeWatch {
    #[default]
    NotWatching,
    Watching {
        points: SubscriptionId,
        is_drawing: SubscriptionId,
        /// x coordinate waiting for its y partner.
        pending_x: Option<(usize, f64)>,
    },
    Closed,
}

/// Projects local stroke edits onto the backend and applies remote ones.
#[derive(Debug)]
pub struct LineReplicator {
    lines_path: DbPath,
    added: Option<SubscriptionId>,
    removed: Option<SubscriptionId>,
    watches: HashMap<LineId, StrokeWatch>,
    /// Strokes created by this session.
    own: HashSet<LineId>,
    drawing: Option<LineId>,
}

impl LineReplicator {
    /// Replicator for `{room}/lines`.
    pub fn new(room_path: &DbPath) -> Self {
        Self {
            lines_path: room_path.child("lines"),
            added: None,
            removed: None,
            watches: HashMap::new(),
            own: HashSet::new(),
            drawing: None,
        }
    }

    pub fn lines_path(&self) -> &DbPath {
        &self.lines_path
    }

    /// Id of the stroke this session is extending.
    pub fn drawing_line(&self) -> Option<&str> {
        self.drawing.as_deref()
    }

    pub fn watch(&self, id: &str) -> StrokeWatch {
        self.watches.get(id).copied().unwrap_or_default()
    }

    /// Number of strokes with open point listeners.
    pub fn active_watch_count(&self) -> usize {
        self.watches
            .values()
            .filter(|w| matches!(w, StrokeWatch::Watching { .. }))
            .count()
    }

    pub fn owns_subscription(&self, id: SubscriptionId) -> bool {
        self.added == Some(id)
            || self.removed == Some(id)
            || self.watches.values().any(|w| match w {
                StrokeWatch::Watching {
                    points, is_drawing, ..
                } => *points == id || *is_drawing == id,
                _ => false,
            })
    }

    /// Subscribe to child added/removed on the collection.
    pub fn open(&mut self, backend: &dyn Backend) {
        if self.added.is_some() {
            return;
        }
        self.added = subscribe(backend, &self.lines_path, SubscriptionKind::ChildAdded);
        self.removed = subscribe(backend, &self.lines_path, SubscriptionKind::ChildRemoved);
    }

    /// Extend the drawing stroke, or start a new one if there is none or it was removed.
    pub fn add_point(&mut self, backend: &dyn Backend, lines: &mut Lines, point: Point) {
        if let Some(id) = self.drawing.clone() {
            let offset = lines.get(&id).map(|line| line.points.len());
            if let Some(offset) = offset {
                lines.append_point(&id, point);
                let mut fields = Map::new();
                fields.insert(offset.to_string(), json!(point.x));
                fields.insert((offset + 1).to_string(), json!(point.y));
                let path = self.lines_path.child(&id).child("points");
                if let Err(e) = backend.update(&path, fields) {
                    log::warn!("Failed to append point to {}: {}", path, e);
                }
                return;
            }
            log::debug!("Drawing line {} was removed, starting a new one", id);
        }
        self.start_line(backend, lines, point);
    }

    fn start_line(&mut self, backend: &dyn Backend, lines: &mut Lines, point: Point) {
        let id = match backend.push_key(&self.lines_path) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Failed to allocate line key: {}", e);
                Uuid::new_v4().to_string()
            }
        };
        let line = DrawLine::new(point, CompositionMode::Draw, now_millis());
        let record = match serde_json::to_value(&line) {
            Ok(Value::Object(mut record)) => {
                record.insert("timestamp".to_string(), backend.server_timestamp());
                Some(Value::Object(record))
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to encode line {}: {}", id, e);
                None
            }
        };
        lines.insert_line(id.clone(), line);
        self.own.insert(id.clone());
        self.drawing = Some(id.clone());

        if let Some(record) = record {
            let path = self.lines_path.child(&id);
            if let Err(e) = backend.set(&path, record) {
                log::warn!("Failed to create line {}: {}", path, e);
            }
        }
    }

    /// Finish the drawing stroke.
    pub fn end_drawing(&mut self, backend: &dyn Backend, lines: &mut Lines) {
        let Some(id) = self.drawing.take() else {
            return;
        };
        // A stroke removed mid-draw must not be recreated by the flag write.
        if !lines.finalize(&id) {
            return;
        }
        let mut fields = Map::new();
        fields.insert("isDrawing".to_string(), Value::Bool(false));
        let path = self.lines_path.child(&id);
        if let Err(e) = backend.update(&path, fields) {
            log::warn!("Failed to finish line {}: {}", path, e);
        }
    }

    /// Remove whole strokes locally and remotely.
    pub fn remove_lines(&mut self, backend: &dyn Backend, lines: &mut Lines, ids: &[LineId]) {
        lines.remove(ids);
        for id in ids {
            self.forget(backend, id);
            let path = self.lines_path.child(id);
            if let Err(e) = backend.remove(&path) {
                log::warn!("Failed to remove line {}: {}", path, e);
            }
        }
    }

    /// Remove every stroke with a single delete of the collection.
    pub fn clear_all(&mut self, backend: &dyn Backend, lines: &mut Lines) {
        lines.clear();
        self.close_watches(backend);
        self.own.clear();
        self.drawing = None;
        if let Err(e) = backend.remove(&self.lines_path) {
            log::warn!("Failed to clear {}: {}", self.lines_path, e);
        }
    }

    /// Apply a remote event. Returns whether `lines` changed.
    pub fn handle_event(&mut self, backend: &dyn Backend, lines: &mut Lines, event: &RemoteEvent) -> bool {
        let sub = Some(event.subscription);
        if sub == self.added {
            if let RemoteEventKind::ChildAdded { key, value } = &event.kind {
                return self.on_line_added(backend, lines, key, value);
            }
            return false;
        }
        if sub == self.removed {
            if let RemoteEventKind::ChildRemoved { key, .. } = &event.kind {
                let existed = lines.contains(key);
                lines.remove([key]);
                self.forget(backend, key);
                return existed;
            }
            return false;
        }

        let Some((id, points)) = self.watched_line(event.subscription) else {
            return false;
        };
        match &event.kind {
            RemoteEventKind::ChildAdded { key, value } if event.subscription == points => {
                self.on_point_added(lines, &id, key, value)
            }
            RemoteEventKind::Value(value) if event.subscription != points => {
                if value == &Value::Bool(true) {
                    return false;
                }
                self.close_watch(backend, &id);
                lines.finalize(&id)
            }
            _ => false,
        }
    }

    /// Line and points subscription of the watch `sub` belongs to.
    fn watched_line(&self, sub: SubscriptionId) -> Option<(LineId, SubscriptionId)> {
        self.watches.iter().find_map(|(id, watch)| match watch {
            StrokeWatch::Watching {
                points, is_drawing, ..
            } if *points == sub || *is_drawing == sub => Some((id.clone(), *points)),
            _ => None,
        })
    }

    /// Stage x values and merge complete pairs by index.
    fn on_point_added(&mut self, lines: &mut Lines, id: &str, key: &str, value: &Value) -> bool {
        let (Ok(index), Some(value)) = (key.parse::<usize>(), value.as_f64()) else {
            log::debug!("Ignoring malformed point {:?} for line {}", key, id);
            return false;
        };
        let Some(StrokeWatch::Watching { pending_x, .. }) = self.watches.get_mut(id) else {
            return false;
        };
        if index % 2 == 0 {
            *pending_x = Some((index, value));
            return false;
        }
        match pending_x.take() {
            Some((x_index, x)) if x_index + 1 == index => {
                let wrote_x = lines.merge_remote_point(id, x_index, x);
                let wrote_y = lines.merge_remote_point(id, index, value);
                wrote_x || wrote_y
            }
            _ => {
                // Unpaired y: only overwrite, never make the array odd.
                let known = lines.get(id).is_some_and(|line| index < line.points.len());
                known && lines.merge_remote_point(id, index, value)
            }
        }
    }

    fn on_line_added(&mut self, backend: &dyn Backend, lines: &mut Lines, key: &str, value: &Value) -> bool {
        if self.own.contains(key) {
            // Only the authoritative timestamp is taken for our own strokes.
            return match value.get("timestamp").and_then(Value::as_i64) {
                Some(timestamp) => lines.set_timestamp(key, timestamp),
                None => false,
            };
        }

        let line: DrawLine = match serde_json::from_value(value.clone()) {
            Ok(line) => line,
            Err(e) => {
                log::debug!("Ignoring malformed line {}: {}", key, e);
                return false;
            }
        };
        let drawing = line.is_drawing;
        lines.merge_remote(key, line);

        if drawing && self.watch(key) == StrokeWatch::NotWatching {
            let path = self.lines_path.child(key);
            let points = subscribe(backend, &path.child("points"), SubscriptionKind::ChildAdded);
            let is_drawing = subscribe(backend, &path.child("isDrawing"), SubscriptionKind::Value);
            match (points, is_drawing) {
                (Some(points), Some(is_drawing)) => {
                    self.watches.insert(
                        key.to_string(),
                        StrokeWatch::Watching {
                            points,
                            is_drawing,
                            pending_x: None,
                        },
                    );
                }
                (points, is_drawing) => {
                    for id in points.into_iter().chain(is_drawing) {
                        backend.unsubscribe(id);
                    }
                }
            }
        }
        true
    }

    /// Close a stroke's listeners exactly once.
    fn close_watch(&mut self, backend: &dyn Backend, id: &str) {
        if let Some(watch) = self.watches.get_mut(id) {
            if let StrokeWatch::Watching {
                points, is_drawing, ..
            } = *watch
            {
                backend.unsubscribe(points);
                backend.unsubscribe(is_drawing);
                *watch = StrokeWatch::Closed;
            }
        }
    }

    fn close_watches(&mut self, backend: &dyn Backend) {
        let ids: Vec<LineId> = self.watches.keys().cloned().collect();
        for id in ids {
            self.close_watch(backend, &id);
        }
        self.watches.clear();
    }

    fn forget(&mut self, backend: &dyn Backend, id: &str) {
        self.close_watch(backend, id);
        self.watches.remove(id);
        self.own.remove(id);
    }

    /// Close every subscription this replicator opened.
    pub fn teardown(&mut self, backend: &dyn Backend) {
        self.close_watches(backend);
        for id in self.added.take().into_iter().chain(self.removed.take()) {
            backend.unsubscribe(id);
        }
    }
}

fn subscribe(backend: &dyn Backend, path: &DbPath, kind: SubscriptionKind) -> Option<SubscriptionId> {
    match backend.subscribe(path, kind) {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("Failed to subscribe to {}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::{MemoryBackend, MemoryDatabase};

    struct Client {
        backend: MemoryBackend,
        lines: Lines,
        replicator: LineReplicator,
    }

    impl Client {
        fn join(db: &MemoryDatabase) -> Self {
            let backend = db.connect();
            let mut replicator = LineReplicator::new(&DbPath::parse("rooms/r").unwrap());
            replicator.open(&backend);
            Self {
                backend,
                lines: Lines::new(),
                replicator,
            }
        }

        fn pump(&mut self) -> bool {
            let mut changed = false;
            for event in self.backend.poll_events() {
                changed |= self.replicator.handle_event(&self.backend, &mut self.lines, &event);
            }
            changed
        }

        fn draw(&mut self, x: f64, y: f64) {
            self.replicator
                .add_point(&self.backend, &mut self.lines, Point::new(x, y));
        }

        fn end(&mut self) {
            self.replicator.end_drawing(&self.backend, &mut self.lines);
        }
    }

    #[test]
    fn test_local_stroke_is_written_incrementally() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        alice.draw(1.0, 2.0);
        alice.draw(3.0, 4.0);
        let id = alice.replicator.drawing_line().unwrap().to_string();

        let stored = db.get(&alice.replicator.lines_path().child(&id));
        assert_eq!(stored["points"], json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(stored["isDrawing"], json!(true));
        assert_eq!(stored["compositionMode"], json!("source-over"));
        assert!(stored["timestamp"].is_i64());

        alice.end();
        let stored = db.get(&alice.replicator.lines_path().child(&id));
        assert_eq!(stored["isDrawing"], json!(false));
        assert!(!alice.lines.get(&id).unwrap().is_drawing);
    }

    #[test]
    fn test_own_line_takes_server_timestamp_only() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        alice.draw(1.0, 2.0);
        alice.draw(3.0, 4.0);
        let id = alice.replicator.drawing_line().unwrap().to_string();
        alice.pump();

        let server = db.get(&alice.replicator.lines_path().child(&id).child("timestamp"));
        let line = alice.lines.get(&id).unwrap();
        assert_eq!(json!(line.timestamp), server);
        assert_eq!(line.points, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(alice.replicator.active_watch_count(), 0);
    }

    #[test]
    fn test_foreign_stroke_is_watched_until_finished() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        let mut bob = Client::join(&db);

        alice.draw(0.0, 0.0);
        let id = alice.replicator.drawing_line().unwrap().to_string();
        assert!(bob.pump());
        assert!(matches!(bob.replicator.watch(&id), StrokeWatch::Watching { .. }));

        alice.draw(5.0, 0.0);
        alice.draw(5.0, 5.0);
        bob.pump();
        assert_eq!(bob.lines.get(&id).unwrap().points, vec![0.0, 0.0, 5.0, 0.0, 5.0, 5.0]);

        alice.end();
        bob.pump();
        assert_eq!(bob.replicator.watch(&id), StrokeWatch::Closed);
        assert!(!bob.lines.get(&id).unwrap().is_drawing);
        assert_eq!(bob.backend.subscription_count(), 2);

        // Nothing more arrives once closed.
        alice.pump();
        assert!(!bob.pump());
    }

    #[test]
    fn test_finished_foreign_stroke_is_not_watched() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        alice.draw(0.0, 0.0);
        alice.draw(1.0, 1.0);
        alice.end();

        let mut bob = Client::join(&db);
        bob.pump();
        assert_eq!(bob.lines.len(), 1);
        assert_eq!(bob.replicator.active_watch_count(), 0);
        let (_, line) = bob.lines.iter().next().unwrap();
        assert_eq!(line.points, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_remote_remove_mid_draw_starts_new_line() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        let mut bob = Client::join(&db);

        alice.draw(0.0, 0.0);
        let first = alice.replicator.drawing_line().unwrap().to_string();
        bob.pump();
        let ids = vec![first.clone()];
        bob.replicator.remove_lines(&bob.backend, &mut bob.lines, &ids);
        assert_eq!(bob.replicator.watch(&first), StrokeWatch::NotWatching);

        alice.pump();
        assert!(!alice.lines.contains(&first));

        alice.draw(1.0, 1.0);
        let second = alice.replicator.drawing_line().unwrap().to_string();
        assert_ne!(first, second);
        assert!(db.get(&alice.replicator.lines_path().child(&first)).is_null());
        assert_eq!(alice.lines.get(&second).unwrap().points, vec![1.0, 1.0]);
    }

    #[test]
    fn test_end_after_remote_remove_writes_nothing() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        let mut bob = Client::join(&db);
        alice.draw(0.0, 0.0);
        let id = alice.replicator.drawing_line().unwrap().to_string();
        bob.pump();
        bob.replicator.clear_all(&bob.backend, &mut bob.lines);

        alice.pump();
        alice.end();
        assert!(db.get(alice.replicator.lines_path()).is_null());
        assert!(!alice.lines.contains(&id));
    }

    #[test]
    fn test_clear_all_reaches_everyone() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        let mut bob = Client::join(&db);
        alice.draw(0.0, 0.0);
        alice.end();
        bob.draw(2.0, 2.0);
        bob.end();
        alice.pump();
        bob.pump();
        assert_eq!(alice.lines.len(), 2);

        alice.replicator.clear_all(&alice.backend, &mut alice.lines);
        bob.pump();
        assert!(bob.lines.is_empty());
    }

    #[test]
    fn test_teardown_closes_everything() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        let mut bob = Client::join(&db);
        alice.draw(0.0, 0.0);
        bob.pump();
        assert_eq!(bob.backend.subscription_count(), 4);

        bob.replicator.teardown(&bob.backend);
        assert_eq!(bob.backend.subscription_count(), 0);
        assert_eq!(bob.replicator.active_watch_count(), 0);
    }

    #[test]
    fn test_unpaired_y_is_not_appended() {
        let db = MemoryDatabase::new();
        let mut alice = Client::join(&db);
        let mut bob = Client::join(&db);
        alice.draw(0.0, 0.0);
        let id = alice.replicator.drawing_line().unwrap().to_string();
        bob.pump();

        let points = alice.replicator.lines_path().child(&id).child("points");
        let mut fields = Map::new();
        fields.insert("3".to_string(), json!(9.0));
        alice.backend.update(&points, fields).unwrap();
        bob.pump();
        assert_eq!(bob.lines.get(&id).unwrap().points, vec![0.0, 0.0]);
    }
}
