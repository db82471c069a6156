//! Raw input vocabulary accepted from the host UI.

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// What single-pointer drags do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Move,
    Draw,
    Erase,
}

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

/// Pointer, touch and wheel events in screen coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    PointerDown {
        position: Point,
    },
    /// `pressed` is false for hover moves with no button held; those are ignored.
    PointerMove {
        position: Point,
        #[serde(default = "default_pressed")]
        pressed: bool,
    },
    PointerUp {
        position: Point,
    },
    TouchStart {
        touches: Vec<Point>,
    },
    TouchMove {
        touches: Vec<Point>,
    },
    /// `touches` lists the fingers still down after the release.
    TouchEnd {
        #[serde(default)]
        touches: Vec<Point>,
    },
    Wheel {
        position: Point,
        delta_y: f64,
        #[serde(default)]
        modifiers: Modifiers,
    },
}

fn default_pressed() -> bool {
    true
}

impl InputEvent {
    /// Events that start a new gesture and must stop momentum.
    pub fn begins_gesture(&self) -> bool {
        matches!(
            self,
            InputEvent::PointerDown { .. } | InputEvent::TouchStart { .. } | InputEvent::Wheel { .. }
        )
    }
}
