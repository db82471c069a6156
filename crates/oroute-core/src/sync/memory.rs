//! In-memory realtime store shared by any number of local clients.

use super::backend::{
    Backend, BackendError, BackendResult, DbPath, RemoteEvent, RemoteEventKind, SubscriptionId,
    SubscriptionKind, is_server_timestamp,
};
use crate::lines::now_millis;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Shared JSON tree. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Arrays are stored as objects keyed by index; empty objects are pruned.
    root: Map<String, Value>,
    clock: i64,
    next_key: u64,
    next_client: u64,
    next_subscription: u64,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    queues: HashMap<u64, Vec<RemoteEvent>>,
}

struct Subscription {
    client: u64,
    path: DbPath,
    kind: SubscriptionKind,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection with its own event queue.
    pub fn connect(&self) -> MemoryBackend {
        let client = match self.inner.write() {
            Ok(mut inner) => {
                inner.next_client += 1;
                let client = inner.next_client;
                inner.queues.insert(client, Vec::new());
                client
            }
            Err(e) => {
                log::warn!("Memory database lock poisoned: {}", e);
                0
            }
        };
        MemoryBackend {
            database: self.clone(),
            client,
        }
    }

    /// Current value at `path`, `Value::Null` if absent.
    pub fn get(&self, path: &DbPath) -> Value {
        match self.inner.read() {
            Ok(inner) => inner.read(path),
            Err(_) => Value::Null,
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> BackendResult<T>) -> BackendResult<T> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| BackendError::Other(format!("Lock error: {}", e)))?;
        f(&mut inner)
    }
}

impl Inner {
    fn node(&self, path: &DbPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.root.get(first)?;
        for segment in rest {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    fn read(&self, path: &DbPath) -> Value {
        if path.is_root() {
            return to_external(&Value::Object(self.root.clone()));
        }
        self.node(path).map(to_external).unwrap_or(Value::Null)
    }

    /// Stored children of `path` in key order.
    fn children(&self, path: &DbPath) -> Vec<(String, Value)> {
        let map = if path.is_root() {
            Some(&self.root)
        } else {
            self.node(path).and_then(Value::as_object)
        };
        let Some(map) = map else {
            return Vec::new();
        };
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort_by(|a, b| compare_keys(a, b));
        keys.into_iter()
            .map(|key| (key.clone(), to_external(&map[key])))
            .collect()
    }

    fn tick(&mut self) -> i64 {
        self.clock = (self.clock + 1).max(now_millis());
        self.clock
    }

    fn write(&mut self, path: &DbPath, value: Value) {
        let timestamp = self.tick();
        let value = to_internal(value, timestamp);
        let Some((last, parents)) = path.segments().split_last() else {
            self.root = match value {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            return;
        };

        let mut map = &mut self.root;
        for segment in parents {
            let entry = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            map = next;
        }
        if value.is_null() {
            map.remove(last);
        } else {
            map.insert(last.clone(), value);
        }
        prune(&mut self.root);
    }

    /// Snapshot what each subscription currently observes.
    fn observe(&self) -> HashMap<SubscriptionId, Value> {
        self.subscriptions
            .iter()
            .map(|(id, sub)| (*id, self.read(&sub.path)))
            .collect()
    }

    /// Queue events for every subscription whose observed value changed.
    fn dispatch(&mut self, before: HashMap<SubscriptionId, Value>) {
        let mut outgoing = Vec::new();
        for (id, sub) in &self.subscriptions {
            let old = before.get(id).cloned().unwrap_or(Value::Null);
            let new = self.read(&sub.path);
            if old == new {
                continue;
            }
            let kinds = match sub.kind {
                SubscriptionKind::Value => vec![RemoteEventKind::Value(new)],
                SubscriptionKind::ChildAdded => added_children(&old, &new)
                    .into_iter()
                    .map(|(key, value)| RemoteEventKind::ChildAdded { key, value })
                    .collect(),
                SubscriptionKind::ChildRemoved => added_children(&new, &old)
                    .into_iter()
                    .map(|(key, value)| RemoteEventKind::ChildRemoved { key, value })
                    .collect(),
            };
            for kind in kinds {
                outgoing.push((
                    sub.client,
                    RemoteEvent {
                        subscription: *id,
                        path: sub.path.clone(),
                        kind,
                    },
                ));
            }
        }
        // Deterministic delivery order across subscriptions.
        outgoing.sort_by_key(|(_, event)| event.subscription);
        for (client, event) in outgoing {
            if let Some(queue) = self.queues.get_mut(&client) {
                queue.push(event);
            }
        }
    }

    fn mutate(&mut self, client: u64, f: impl FnOnce(&mut Inner)) -> BackendResult<()> {
        if !self.queues.contains_key(&client) {
            return Err(BackendError::Disconnected);
        }
        let before = self.observe();
        f(self);
        self.dispatch(before);
        Ok(())
    }
}

/// Children of `new` that are absent from `old`, in key order.
fn added_children(old: &Value, new: &Value) -> Vec<(String, Value)> {
    let Some(new) = as_children(new) else {
        return Vec::new();
    };
    let old = as_children(old).unwrap_or_default();
    new.into_iter()
        .filter(|(key, _)| !old.iter().any(|(k, _)| k == key))
        .collect()
}

fn as_children(value: &Value) -> Option<Vec<(String, Value)>> {
    match value {
        Value::Object(map) => {
            let mut children: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            children.sort_by(|a, b| compare_keys(&a.0, &b.0));
            Some(children)
        }
        Value::Array(items) => Some(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
        ),
        _ => None,
    }
}

/// Integer keys first in numeric order, then the rest lexicographically.
fn compare_keys(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Convert a written value into stored form: arrays become index-keyed
/// objects, nulls vanish and timestamp placeholders resolve.
fn to_internal(value: Value, timestamp: i64) -> Value {
    if is_server_timestamp(&value) {
        return Value::from(timestamp);
    }
    match value {
        Value::Array(items) => {
            let map = items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), to_internal(v, timestamp)))
                .collect();
            Value::Object(map)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, to_internal(v, timestamp)))
                .collect(),
        ),
        other => other,
    }
}

/// Convert stored form back: objects keyed `0..n` read as arrays.
fn to_external(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let dense = !map.is_empty()
                && (0..map.len()).all(|i| map.contains_key(&i.to_string()));
            if dense {
                Value::Array(
                    (0..map.len())
                        .map(|i| to_external(&map[&i.to_string()]))
                        .collect(),
                )
            } else {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), to_external(v))).collect())
            }
        }
        other => other.clone(),
    }
}

/// Drop empty objects left behind by removals.
fn prune(map: &mut Map<String, Value>) {
    map.retain(|_, value| match value {
        Value::Object(child) => {
            prune(child);
            !child.is_empty()
        }
        Value::Null => false,
        _ => true,
    });
}

/// One client connection to a [`MemoryDatabase`].
pub struct MemoryBackend {
    database: MemoryDatabase,
    client: u64,
}

impl MemoryBackend {
    pub fn database(&self) -> &MemoryDatabase {
        &self.database
    }

    /// Drop every subscription and stop accepting writes.
    pub fn disconnect(&self) {
        if let Ok(mut inner) = self.database.inner.write() {
            inner.queues.remove(&self.client);
            let client = self.client;
            inner.subscriptions.retain(|_, sub| sub.client != client);
        }
    }

    /// Number of live subscriptions held by this client.
    pub fn subscription_count(&self) -> usize {
        self.database
            .inner
            .read()
            .map(|inner| {
                inner
                    .subscriptions
                    .values()
                    .filter(|sub| sub.client == self.client)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Backend for MemoryBackend {
    fn set(&self, path: &DbPath, value: Value) -> BackendResult<()> {
        self.database
            .with_inner(|inner| inner.mutate(self.client, |inner| inner.write(path, value)))
    }

    fn update(&self, path: &DbPath, fields: Map<String, Value>) -> BackendResult<()> {
        let mut targets = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let relative = DbPath::parse(&key)?;
            let mut target = path.clone();
            for segment in relative.segments() {
                target = target.child(segment);
            }
            targets.push((target, value));
        }
        self.database.with_inner(|inner| {
            inner.mutate(self.client, |inner| {
                for (target, value) in targets {
                    inner.write(&target, value);
                }
            })
        })
    }

    fn remove(&self, path: &DbPath) -> BackendResult<()> {
        self.set(path, Value::Null)
    }

    fn push_key(&self, _path: &DbPath) -> BackendResult<String> {
        self.database.with_inner(|inner| {
            if !inner.queues.contains_key(&self.client) {
                return Err(BackendError::Disconnected);
            }
            inner.next_key += 1;
            let timestamp = inner.tick();
            // Chronologically sortable, unique within the database.
            Ok(format!("k{:013}{:06}", timestamp, inner.next_key))
        })
    }

    fn subscribe(&self, path: &DbPath, kind: SubscriptionKind) -> BackendResult<SubscriptionId> {
        self.database.with_inner(|inner| {
            let client = self.client;
            if !inner.queues.contains_key(&client) {
                return Err(BackendError::Disconnected);
            }
            inner.next_subscription += 1;
            let id = SubscriptionId(inner.next_subscription);
            inner.subscriptions.insert(
                id,
                Subscription {
                    client,
                    path: path.clone(),
                    kind,
                },
            );

            let replay: Vec<RemoteEventKind> = match kind {
                SubscriptionKind::Value => vec![RemoteEventKind::Value(inner.read(path))],
                SubscriptionKind::ChildAdded => inner
                    .children(path)
                    .into_iter()
                    .map(|(key, value)| RemoteEventKind::ChildAdded { key, value })
                    .collect(),
                SubscriptionKind::ChildRemoved => Vec::new(),
            };
            if let Some(queue) = inner.queues.get_mut(&client) {
                queue.extend(replay.into_iter().map(|kind| RemoteEvent {
                    subscription: id,
                    path: path.clone(),
                    kind,
                }));
            }
            Ok(id)
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut inner) = self.database.inner.write() {
            if inner.subscriptions.remove(&id).is_some() {
                if let Some(queue) = inner.queues.get_mut(&self.client) {
                    queue.retain(|event| event.subscription != id);
                }
            }
        }
    }

    fn poll_events(&self) -> Vec<RemoteEvent> {
        match self.database.inner.write() {
            Ok(mut inner) => inner
                .queues
                .get_mut(&self.client)
                .map(std::mem::take)
                .unwrap_or_default(),
            Err(e) => {
                log::warn!("Memory database lock poisoned: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> DbPath {
        DbPath::parse(s).unwrap()
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected object"),
        }
    }

    #[test]
    fn test_set_get_roundtrip_arrays() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        client
            .set(&path("rooms/r/lines/a"), json!({"points": [1.0, 2.0], "isDrawing": true}))
            .unwrap();
        assert_eq!(db.get(&path("rooms/r/lines/a/points")), json!([1.0, 2.0]));
        assert_eq!(db.get(&path("rooms/r/lines/a/points/1")), json!(2.0));
    }

    #[test]
    fn test_update_appends_by_index() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let points = path("l/a/points");
        client.set(&points, json!([0.0, 0.0])).unwrap();
        client
            .update(&points, fields(json!({"2": 5.0, "3": 6.0})))
            .unwrap();
        assert_eq!(db.get(&points), json!([0.0, 0.0, 5.0, 6.0]));
    }

    #[test]
    fn test_update_keeps_other_fields() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        client.set(&path("v"), json!({"leaderId": "x", "rotation": 1.0})).unwrap();
        client.update(&path("v"), fields(json!({"rotation": 2.0}))).unwrap();
        assert_eq!(db.get(&path("v")), json!({"leaderId": "x", "rotation": 2.0}));
    }

    #[test]
    fn test_server_timestamp_resolves() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        client
            .set(&path("a"), json!({"timestamp": client.server_timestamp()}))
            .unwrap();
        let first = db.get(&path("a/timestamp")).as_i64().unwrap();
        client
            .set(&path("b"), json!({"timestamp": client.server_timestamp()}))
            .unwrap();
        let second = db.get(&path("b/timestamp")).as_i64().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        client.set(&path("rooms/r/lines/a"), json!({"x": 1})).unwrap();
        client.remove(&path("rooms/r/lines/a")).unwrap();
        assert_eq!(db.get(&path("rooms/r")), Value::Null);
    }

    #[test]
    fn test_child_added_replays_and_fans_out() {
        let db = MemoryDatabase::new();
        let writer = db.connect();
        let reader = db.connect();
        let lines = path("rooms/r/lines");
        writer.set(&lines.child("a"), json!({"n": 1})).unwrap();

        let sub = reader.subscribe(&lines, SubscriptionKind::ChildAdded).unwrap();
        let own = writer.subscribe(&lines, SubscriptionKind::ChildAdded).unwrap();
        writer.poll_events();
        let replay = reader.poll_events();
        assert_eq!(replay.len(), 1);
        assert_eq!(
            replay[0].kind,
            RemoteEventKind::ChildAdded {
                key: "a".into(),
                value: json!({"n": 1})
            }
        );

        writer.set(&lines.child("b"), json!({"n": 2})).unwrap();
        // Updating an existing child is not an addition.
        writer.set(&lines.child("a"), json!({"n": 3})).unwrap();
        let events = reader.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscription, sub);
        assert!(matches!(&events[0].kind, RemoteEventKind::ChildAdded { key, .. } if key == "b"));

        let echoed = writer.poll_events();
        assert_eq!(echoed.len(), 1);
        assert_eq!(echoed[0].subscription, own);
    }

    #[test]
    fn test_child_added_orders_numeric_keys() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let points = path("p");
        let values: Vec<f64> = (0..12).map(f64::from).collect();
        client.set(&points, json!(values)).unwrap();
        client.subscribe(&points, SubscriptionKind::ChildAdded).unwrap();
        let keys: Vec<String> = client
            .poll_events()
            .into_iter()
            .filter_map(|e| match e.kind {
                RemoteEventKind::ChildAdded { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..12).map(|i: i32| i.to_string()).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_child_removed() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let lines = path("lines");
        client.set(&lines.child("a"), json!(1)).unwrap();
        client.set(&lines.child("b"), json!(2)).unwrap();
        client.subscribe(&lines, SubscriptionKind::ChildRemoved).unwrap();
        assert!(client.poll_events().is_empty());

        client.remove(&lines).unwrap();
        let events = client.poll_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1].kind, RemoteEventKind::ChildRemoved { key, value } if key == "b" && value == &json!(2)));
    }

    #[test]
    fn test_value_subscription() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let image = path("rooms/r/image");
        client.subscribe(&image, SubscriptionKind::Value).unwrap();
        assert_eq!(client.poll_events()[0].kind, RemoteEventKind::Value(Value::Null));

        client.set(&image, json!("memory://1")).unwrap();
        client.set(&image, json!("memory://1")).unwrap();
        let events = client.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RemoteEventKind::Value(json!("memory://1")));
    }

    #[test]
    fn test_unsubscribe_drops_queued_events() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let sub = client.subscribe(&path("x"), SubscriptionKind::Value).unwrap();
        client.set(&path("x"), json!(1)).unwrap();
        client.unsubscribe(sub);
        client.set(&path("x"), json!(2)).unwrap();
        assert!(client.poll_events().is_empty());
        assert_eq!(client.subscription_count(), 0);
    }

    #[test]
    fn test_disconnected_client_rejects_writes() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        client.subscribe(&path("x"), SubscriptionKind::Value).unwrap();
        client.disconnect();
        assert!(matches!(client.set(&path("x"), json!(1)), Err(BackendError::Disconnected)));
        assert!(matches!(client.push_key(&path("x")), Err(BackendError::Disconnected)));
        assert_eq!(client.subscription_count(), 0);
    }

    #[test]
    fn test_push_keys_are_unique_and_ordered() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let a = client.push_key(&path("rooms")).unwrap();
        let b = client.push_key(&path("rooms")).unwrap();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_invalid_update_key() {
        let db = MemoryDatabase::new();
        let client = db.connect();
        let result = client.update(&path("x"), fields(json!({"a//b": 1})));
        assert!(matches!(result, Err(BackendError::InvalidPath(_))));
    }
}
