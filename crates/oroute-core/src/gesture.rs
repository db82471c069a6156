//! Gesture interpretation: pointer, touch and wheel input to view and stroke updates.

use crate::config::CanvasConfig;
use crate::input::{InputEvent, Mode};
use crate::lines::{LineId, Lines};
use crate::math::{Segment, VectorExt, shortest_angle_delta, snap_rotation};
use crate::view::ViewModel;
use kurbo::{Point, Size, Vec2};

/// Receiver of stroke edits produced by gestures.
///
/// Implemented by the local canvas and by the online room, which replicates
/// each edit. Implementations must tolerate stale ids silently.
pub trait DrawingTarget {
    fn lines(&self) -> &Lines;
    /// Extend the line being drawn, starting a new one if there is none.
    fn add_point_to_drawing_line(&mut self, point: Point);
    fn end_drawing(&mut self);
    fn remove_lines(&mut self, ids: &[LineId]);
}

/// Per-gesture samples. Reset whenever a gesture starts or ends.
#[derive(Debug, Clone, Copy, Default)]
struct GestureState {
    /// Last pointer position (or pinch midpoint) on screen.
    pointer_before: Option<Point>,
    pinch_distance_before: Option<f64>,
    pinch_angle_before: Option<f64>,
    /// Last erase sample in content space.
    erase_before: Option<Point>,
    /// Screen delta of the latest drag sample.
    velocity: Vec2,
}

/// In-flight inertia after a pan release.
#[derive(Debug, Clone, Copy)]
struct Momentum {
    velocity: Vec2,
}

/// Unsnapped rotation tracked across samples so a snapped view can be
/// rotated away from the axis again.
#[derive(Debug, Clone, Copy)]
struct RotationAnchor {
    applied: f64,
    raw: f64,
}

/// Turns raw input into [`ViewModel`] updates and stroke edits.
#[derive(Debug, Clone)]
pub struct GestureController {
    config: CanvasConfig,
    mode: Mode,
    view: ViewModel,
    viewport: Size,
    state: GestureState,
    momentum: Option<Momentum>,
    rotation_anchor: Option<RotationAnchor>,
}

impl GestureController {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            config,
            mode: Mode::default(),
            view: ViewModel::default(),
            viewport: Size::ZERO,
            state: GestureState::default(),
            momentum: None,
            rotation_anchor: None,
        }
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch interaction mode. Samples of the previous mode are dropped.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            self.mode = mode;
            self.state = GestureState::default();
        }
    }

    pub fn view(&self) -> ViewModel {
        self.view
    }

    /// Replace the view wholesale (remote broadcast, reset).
    pub fn set_view(&mut self, view: ViewModel) {
        self.view = view;
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
    }

    pub fn is_momentum_active(&self) -> bool {
        self.momentum.is_some()
    }

    /// Process one input event. Returns whether the view changed.
    pub fn handle_event(&mut self, event: &InputEvent, target: &mut dyn DrawingTarget) -> bool {
        let before = self.view;

        if event.begins_gesture() {
            self.cancel_momentum();
        }

        match event {
            InputEvent::PointerDown { .. } | InputEvent::TouchStart { .. } => {
                self.state = GestureState::default();
            }
            InputEvent::PointerMove { position, pressed } => {
                if *pressed {
                    self.one_pointer_move(*position, target);
                }
            }
            InputEvent::PointerUp { .. } => {
                self.release(target, true);
            }
            InputEvent::TouchMove { touches } => match touches.as_slice() {
                [first, second, ..] => self.two_pointer_move(*first, *second),
                [only] => self.one_pointer_move(*only, target),
                [] => {}
            },
            InputEvent::TouchEnd { touches } => {
                self.release(target, touches.is_empty());
            }
            InputEvent::Wheel {
                position,
                delta_y,
                modifiers,
            } => {
                if modifiers.ctrl {
                    self.wheel_rotate(*delta_y);
                } else {
                    self.wheel_zoom(*position, *delta_y);
                }
            }
        }

        self.view != before
    }

    /// Advance momentum by one animation frame. Returns whether the view moved.
    pub fn tick(&mut self) -> bool {
        let Some(momentum) = self.momentum else {
            return false;
        };
        if momentum.velocity.hypot() < self.config.momentum_stop_speed {
            self.momentum = None;
            return false;
        }
        self.view = self.view.pan(momentum.velocity);
        self.momentum = Some(Momentum {
            velocity: momentum.velocity / self.config.friction,
        });
        true
    }

    pub fn cancel_momentum(&mut self) {
        self.momentum = None;
        self.state.velocity = Vec2::ZERO;
    }

    fn one_pointer_move(&mut self, screen: Point, target: &mut dyn DrawingTarget) {
        match self.mode {
            Mode::Move => {
                if let Some(before) = self.state.pointer_before {
                    let movement = screen - before;
                    self.view = self.view.pan(movement);
                    self.state.velocity = movement;
                }
                self.state.pointer_before = Some(screen);
            }
            Mode::Draw => {
                let content = self.view.screen_to_content(screen);
                target.add_point_to_drawing_line(content);
            }
            Mode::Erase => {
                let content = self.view.screen_to_content(screen);
                if let Some(before) = self.state.erase_before {
                    let hits = target.lines().hit_lines(&Segment::new(before, content));
                    if !hits.is_empty() {
                        let ids: Vec<LineId> = hits.into_iter().collect();
                        target.remove_lines(&ids);
                    }
                }
                self.state.erase_before = Some(content);
            }
        }
    }

    /// Pan, zoom and rotate derived from the same pinch sample, applied as one update.
    fn two_pointer_move(&mut self, first: Point, second: Point) {
        if self.mode != Mode::Move {
            return;
        }

        let span = second - first;
        let midpoint = first.midpoint(second);
        let distance = span.hypot().max(self.config.min_pinch_distance);
        let angle = span.angle_degrees();

        let mut view = self.view;

        if let Some(before) = self.state.pointer_before {
            let movement = midpoint - before;
            view = view.pan(movement);
            self.state.velocity = movement;
        }
        self.state.pointer_before = Some(midpoint);

        if let Some(before) = self.state.pinch_distance_before {
            view = view.zoom_at(
                midpoint,
                distance / before,
                self.config.scale_min,
                self.config.scale_max,
            );
        }
        self.state.pinch_distance_before = Some(distance);

        if let Some(before) = self.state.pinch_angle_before {
            let delta = shortest_angle_delta(angle - before);
            let applied = self.snapped_rotation_delta(view.rotation, delta);
            view = view.rotate_at(midpoint, applied);
        }
        self.state.pinch_angle_before = Some(angle);

        self.view = view;
    }

    fn release(&mut self, target: &mut dyn DrawingTarget, all_released: bool) {
        match self.mode {
            Mode::Move => {
                if all_released {
                    self.start_momentum();
                }
            }
            Mode::Draw => target.end_drawing(),
            Mode::Erase => {}
        }
        self.state = GestureState::default();
    }

    fn start_momentum(&mut self) {
        let velocity = self.state.velocity;
        if velocity.hypot() >= self.config.momentum_stop_speed {
            self.momentum = Some(Momentum { velocity });
        }
    }

    fn wheel_zoom(&mut self, position: Point, delta_y: f64) {
        let factor = self
            .config
            .scale_by
            .powf(-delta_y / self.config.scroll_per_scale);
        self.view = self
            .view
            .zoom_at(position, factor, self.config.scale_min, self.config.scale_max);
    }

    fn wheel_rotate(&mut self, delta_y: f64) {
        if self.viewport.is_zero_area() {
            return;
        }
        let center = Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0);
        let delta = delta_y * self.config.rotate_by;
        let applied = self.snapped_rotation_delta(self.view.rotation, delta);
        self.view = self.view.rotate_at(center, applied);
    }

    /// Delta that moves `current` to the snapped form of the accumulated
    /// unsnapped rotation plus `delta`.
    fn snapped_rotation_delta(&mut self, current: f64, delta: f64) -> f64 {
        let raw = match self.rotation_anchor {
            Some(anchor) if anchor.applied == current => anchor.raw,
            _ => current,
        };
        let raw = (raw + delta).rem_euclid(360.0);
        let target = snap_rotation(
            raw,
            self.config.snap_step_degrees,
            self.config.snap_tolerance_degrees,
        )
        .unwrap_or(raw);
        let applied = target - current;
        self.rotation_anchor = Some(RotationAnchor {
            applied: (current + applied).rem_euclid(360.0),
            raw,
        });
        applied
    }
}
