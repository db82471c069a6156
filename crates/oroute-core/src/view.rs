//! View transform for pan/zoom/rotate navigation.

use crate::math::VectorExt;
use kurbo::{Affine, Point, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Affine mapping from content space to screen space.
///
/// `position` is the on-screen offset of the content origin, `scale` is
/// uniform and `rotation` is in degrees within `[0, 360)`. Every operator
/// returns a new value; a `ViewModel` is never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub position: Vec2,
    pub scale: f64,
    pub rotation: f64,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: 1.0,
            rotation: 0.0,
        }
    }
}

impl ViewModel {
    /// Identity view.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_position(self, position: Vec2) -> Self {
        Self { position, ..self }
    }

    #[must_use]
    pub fn with_scale(self, scale: f64) -> Self {
        Self { scale, ..self }
    }

    #[must_use]
    pub fn with_rotation(self, rotation: f64) -> Self {
        Self {
            rotation: rotation.rem_euclid(360.0),
            ..self
        }
    }

    /// Move the content by a screen-space delta.
    #[must_use]
    pub fn pan(self, movement: Vec2) -> Self {
        self.with_position(self.position + movement)
    }

    /// Scale by `factor`, keeping the content point under `center` in place.
    ///
    /// The resulting scale is clamped to `[min, max]`, with `max` winning
    /// when the range is inverted. Factors that are not finite and positive
    /// leave the view unchanged.
    #[must_use]
    pub fn zoom_at(self, center: Point, factor: f64, min: f64, max: f64) -> Self {
        if !(factor.is_finite() && factor > 0.0) {
            return self;
        }
        let local = (center.to_vec2() - self.position) / self.scale;
        let scale = (self.scale * factor).max(min).min(max);
        Self {
            position: center.to_vec2() - local * scale,
            scale,
            ..self
        }
    }

    /// Rotate the view around a screen point by `degrees`.
    #[must_use]
    pub fn rotate_at(self, center: Point, degrees: f64) -> Self {
        let center = center.to_vec2();
        let offset = (self.position - center).rotated_degrees(degrees);
        Self {
            position: center + offset,
            rotation: (self.rotation + degrees).rem_euclid(360.0),
            ..self
        }
    }

    /// Content to screen transform.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.position)
            * Affine::rotate(self.rotation.to_radians())
            * Affine::scale(self.scale)
    }

    /// Screen to content transform.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.scale)
            * Affine::rotate(-self.rotation.to_radians())
            * Affine::translate(-self.position)
    }

    /// Undo translation, rotation and scale of a screen point.
    pub fn screen_to_content(&self, screen: Point) -> Point {
        self.inverse_transform() * screen
    }

    pub fn content_to_screen(&self, content: Point) -> Point {
        self.transform() * content
    }

    /// Content point at the middle of the viewport.
    pub fn visible_center(&self, viewport: Size) -> Point {
        self.screen_to_content(Point::new(viewport.width / 2.0, viewport.height / 2.0))
    }

    /// Viewport size expressed in content units.
    pub fn visible_area(&self, viewport: Size) -> Size {
        Size::new(viewport.width / self.scale, viewport.height / self.scale)
    }

    /// Derive a view that shows `area` around `center` inside `viewport`.
    ///
    /// The scale fits the more constraining axis. Returns `None` for an empty
    /// area or viewport.
    pub fn fit(center: Point, area: Size, rotation: f64, viewport: Size) -> Option<Self> {
        if area.width <= 0.0 || area.height <= 0.0 || viewport.is_zero_area() {
            return None;
        }
        let scale = (viewport.width / area.width).min(viewport.height / area.height);
        if !scale.is_finite() {
            return None;
        }
        let screen_center = Vec2::new(viewport.width / 2.0, viewport.height / 2.0);
        let offset = (center.to_vec2() * scale).rotated_degrees(rotation);
        Some(Self {
            position: screen_center - offset,
            scale,
            rotation: rotation.rem_euclid(360.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point_eq(a: Point, b: Point) {
        assert!((a.x - b.x).abs() < 1e-9, "{a:?} != {b:?}");
        assert!((a.y - b.y).abs() < 1e-9, "{a:?} != {b:?}");
    }

    #[test]
    fn test_default_is_identity() {
        let view = ViewModel::new();
        let p = Point::new(12.0, -7.0);
        assert_point_eq(view.content_to_screen(p), p);
    }

    #[test]
    fn test_pan() {
        let view = ViewModel::new().pan(Vec2::new(10.0, 20.0));
        assert_eq!(view.position, Vec2::new(10.0, 20.0));
    }

    #[test]
    fn test_zoom_keeps_point_under_cursor() {
        let view = ViewModel::new()
            .pan(Vec2::new(30.0, -20.0))
            .rotate_at(Point::new(100.0, 100.0), 33.0)
            .with_scale(1.3);
        let center = Point::new(250.0, 140.0);
        let content = view.screen_to_content(center);

        for factor in [0.5, 1.7, 3.0] {
            let zoomed = view.zoom_at(center, factor, 0.1, 5.0);
            assert_point_eq(zoomed.content_to_screen(content), center);
        }
    }

    #[test]
    fn test_zoom_clamp() {
        let mut view = ViewModel::new();
        for _ in 0..20 {
            view = view.zoom_at(Point::ZERO, 1000.0, 0.1, 5.0);
        }
        assert!((view.scale - 5.0).abs() < f64::EPSILON);

        for _ in 0..20 {
            view = view.zoom_at(Point::ZERO, 0.0001, 0.1, 5.0);
        }
        assert!((view.scale - 0.1).abs() < f64::EPSILON);

        for factor in [-2.0, 0.0, f64::NAN, f64::INFINITY] {
            let next = view.zoom_at(Point::ZERO, factor, 0.1, 5.0);
            assert!(next.scale >= 0.1 && next.scale <= 5.0);
        }
    }

    #[test]
    fn test_zoom_with_inverted_range_does_not_panic() {
        let view = ViewModel::new().zoom_at(Point::ZERO, 2.0, 6.0, 5.0);
        assert_eq!(view.scale, 5.0);
        let view = ViewModel::new().zoom_at(Point::ZERO, 2.0, f64::NAN, f64::NAN);
        assert_eq!(view.scale, 2.0);
    }

    #[test]
    fn test_rotate_keeps_center_fixed() {
        let view = ViewModel::new().pan(Vec2::new(40.0, 10.0)).with_scale(2.0);
        let center = Point::new(100.0, 50.0);
        let content = view.screen_to_content(center);
        let rotated = view.rotate_at(center, 45.0);
        assert_point_eq(rotated.content_to_screen(content), center);
        assert!((rotated.rotation - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_wraps() {
        let view = ViewModel::new().with_rotation(350.0).rotate_at(Point::ZERO, 20.0);
        assert!((view.rotation - 10.0).abs() < 1e-9);
        let view = view.rotate_at(Point::ZERO, -30.0);
        assert!((view.rotation - 340.0).abs() < 1e-9);
    }

    #[test]
    fn test_screen_content_roundtrip_with_rotation() {
        let view = ViewModel::new()
            .pan(Vec2::new(15.0, 25.0))
            .with_scale(1.5)
            .with_rotation(120.0);
        let screen = Point::new(123.0, 456.0);
        assert_point_eq(view.content_to_screen(view.screen_to_content(screen)), screen);
    }

    #[test]
    fn test_fit_centers_content_point() {
        let viewport = Size::new(400.0, 300.0);
        let view = ViewModel::fit(Point::new(50.0, 50.0), Size::new(200.0, 100.0), 0.0, viewport)
            .unwrap();
        assert!((view.scale - 2.0).abs() < f64::EPSILON);
        assert_point_eq(view.content_to_screen(Point::new(50.0, 50.0)), Point::new(200.0, 150.0));
    }

    #[test]
    fn test_fit_inverts_visible_center_and_area() {
        let viewport = Size::new(640.0, 480.0);
        let leader = ViewModel::new()
            .pan(Vec2::new(-80.0, 35.0))
            .with_scale(1.25)
            .rotate_at(Point::new(320.0, 240.0), 30.0);
        let follower = ViewModel::fit(
            leader.visible_center(viewport),
            leader.visible_area(viewport),
            leader.rotation,
            viewport,
        )
        .unwrap();
        assert!((follower.scale - leader.scale).abs() < 1e-9);
        assert!((follower.position - leader.position).hypot() < 1e-9);
    }

    #[test]
    fn test_fit_rejects_empty_area() {
        assert!(ViewModel::fit(Point::ZERO, Size::ZERO, 0.0, Size::new(10.0, 10.0)).is_none());
    }
}
