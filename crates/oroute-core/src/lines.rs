//! Freehand strokes and the stroke collection.

use crate::math::Segment;
use kurbo::Point;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{SystemTime, UNIX_EPOCH};
#[cfg(target_arch = "wasm32")]
use web_time::{SystemTime, UNIX_EPOCH};

/// Stroke identifier. Local strokes use uuids, replicated strokes use backend keys.
pub type LineId = String;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// How a stroke is composited over the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompositionMode {
    #[default]
    #[serde(rename = "source-over")]
    Draw,
    #[serde(rename = "destination-out")]
    EraseMarker,
}

/// One freehand stroke.
///
/// Points are stored flat as `x, y` pairs in content space, so the geometry
/// does not depend on the current view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawLine {
    /// Someone is still extending this stroke.
    #[serde(default)]
    pub is_drawing: bool,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default)]
    pub composition_mode: CompositionMode,
}

/// Older records store timestamps as numeric strings.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Float(v) => Ok(v as i64),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl DrawLine {
    /// Start a stroke at `point`.
    pub fn new(point: Point, composition_mode: CompositionMode, timestamp: i64) -> Self {
        Self {
            is_drawing: true,
            timestamp,
            points: vec![point.x, point.y],
            composition_mode,
        }
    }

    pub fn add_point(&mut self, point: Point) {
        self.points.push(point.x);
        self.points.push(point.y);
    }

    pub fn end_drawing(&mut self) {
        self.is_drawing = false;
    }

    /// Number of complete points.
    pub fn point_count(&self) -> usize {
        self.points.len() / 2
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.points.chunks_exact(2).map(|p| Point::new(p[0], p[1]))
    }

    /// Consecutive point pairs as segments.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.points
            .chunks_exact(2)
            .zip(self.points.chunks_exact(2).skip(1))
            .map(|(a, b)| Segment::new(Point::new(a[0], a[1]), Point::new(b[0], b[1])))
    }

    /// Whether any segment of this stroke intersects `segment`.
    pub fn is_crossing(&self, segment: &Segment) -> bool {
        self.segments().any(|s| s.intersects(segment))
    }
}

/// All strokes of a canvas, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lines {
    lines: HashMap<LineId, DrawLine>,
}

impl Lines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new stroke with a fresh id and return that id.
    pub fn start_line(&mut self, point: Point, composition_mode: CompositionMode) -> LineId {
        let id = Uuid::new_v4().to_string();
        self.lines
            .insert(id.clone(), DrawLine::new(point, composition_mode, now_millis()));
        id
    }

    /// Insert or replace a stroke under a known key.
    pub fn insert_line(&mut self, id: LineId, line: DrawLine) {
        self.lines.insert(id, line);
    }

    /// Append a point to a stroke. Returns `false` if the stroke is gone.
    pub fn append_point(&mut self, id: &str, point: Point) -> bool {
        match self.lines.get_mut(id) {
            Some(line) => {
                line.add_point(point);
                true
            }
            None => false,
        }
    }

    /// Mark a stroke as finished. Returns `false` if the stroke is gone.
    pub fn finalize(&mut self, id: &str) -> bool {
        match self.lines.get_mut(id) {
            Some(line) => {
                line.end_drawing();
                true
            }
            None => false,
        }
    }

    /// Remove whole strokes. Absent ids are ignored.
    pub fn remove<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.lines.remove(id.as_ref());
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Ids of every stroke crossed by `segment`.
    pub fn hit_lines(&self, segment: &Segment) -> HashSet<LineId> {
        self.lines
            .iter()
            .filter(|(_, line)| line.is_crossing(segment))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Replace a stroke with a remote snapshot (last writer wins).
    pub fn merge_remote(&mut self, id: &str, snapshot: DrawLine) {
        self.lines.insert(id.to_string(), snapshot);
    }

    /// Write one flat coordinate received from a remote participant.
    ///
    /// Existing indices are overwritten, `index == len` appends, gaps and
    /// unknown strokes are ignored. Returns whether anything was written.
    pub fn merge_remote_point(&mut self, id: &str, index: usize, value: f64) -> bool {
        let Some(line) = self.lines.get_mut(id) else {
            return false;
        };
        match index.cmp(&line.points.len()) {
            std::cmp::Ordering::Less => line.points[index] = value,
            std::cmp::Ordering::Equal => line.points.push(value),
            std::cmp::Ordering::Greater => {
                log::debug!("Ignoring point {} for line {} with {} values", index, id, line.points.len());
                return false;
            }
        }
        true
    }

    /// Overwrite a stroke's timestamp with an authoritative one.
    pub fn set_timestamp(&mut self, id: &str, timestamp: i64) -> bool {
        match self.lines.get_mut(id) {
            Some(line) => {
                line.timestamp = timestamp;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&DrawLine> {
        self.lines.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lines.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LineId, &DrawLine)> {
        self.lines.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &LineId> {
        self.lines.keys()
    }
}
