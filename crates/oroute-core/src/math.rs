//! Vector helpers, segment intersection and rotation snapping.
//!
//! Positions are [`kurbo::Point`] and deltas are [`kurbo::Vec2`]; both are
//! plain `Copy` values, so every helper here returns a new value.

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

/// Rotation and angle helpers in degrees.
pub trait VectorExt {
    /// Rotate by `degrees` using the standard rotation matrix.
    fn rotated_degrees(self, degrees: f64) -> Self;
    /// Angle of the vector measured from the positive x axis, in degrees.
    fn angle_degrees(self) -> f64;
}

impl VectorExt for Vec2 {
    fn rotated_degrees(self, degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Vec2::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    fn angle_degrees(self) -> f64 {
        self.y.atan2(self.x).to_degrees()
    }
}

/// A line segment between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Parametric intersection test with closed `[0, 1]` bounds.
    ///
    /// Parallel and collinear segments (`D == 0`) never intersect, even when
    /// they overlap. Touching endpoints count as an intersection.
    pub fn intersects(&self, other: &Segment) -> bool {
        let (x1, y1) = (self.start.x, self.start.y);
        let (x2, y2) = (self.end.x, self.end.y);
        let (x3, y3) = (other.start.x, other.start.y);
        let (x4, y4) = (other.end.x, other.end.y);

        let d = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
        if d == 0.0 {
            return false;
        }

        let t = ((x1 - x3) * (y3 - y4) - (y1 - y3) * (x3 - x4)) / d;
        let u = ((x1 - x3) * (y1 - y2) - (y1 - y3) * (x1 - x2)) / d;

        (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
    }
}

/// Return the candidate with the smallest magnitude.
///
/// Used to pick the shortest equivalent of an angle delta among
/// `{d, d + 360, d - 360}`.
pub fn closest_to_zero(candidates: &[f64]) -> f64 {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0)
}

/// Smallest-magnitude equivalent of an angle delta in degrees.
pub fn shortest_angle_delta(delta: f64) -> f64 {
    closest_to_zero(&[delta, delta + 360.0, delta - 360.0])
}

/// Multiple of `step` lying within `tolerance` of `degrees`, if any.
pub fn snap_rotation(degrees: f64, step: f64, tolerance: f64) -> Option<f64> {
    if step <= 0.0 || !degrees.is_finite() {
        return None;
    }
    let nearest = (degrees / step).round() * step;
    ((degrees - nearest).abs() < tolerance).then_some(nearest)
}

/// Adjust a rotation delta so the resulting rotation snaps onto a multiple of
/// `step` when it would land within `tolerance` of one.
///
/// The snapped delta is `target - current`, which makes `current + delta`
/// land on `target` exactly.
pub fn snap_rotation_delta(current: f64, delta: f64, step: f64, tolerance: f64) -> f64 {
    match snap_rotation(current + delta, step, tolerance) {
        Some(target) => target - current,
        None => delta,
    }
}
