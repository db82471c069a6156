//! O-Route Application
//!
//! Headless driver that replays scripted pointer, touch and wheel input
//! against a local canvas or an in-memory room and reports the result.

mod script;

pub use script::{Outcome, Script, ScriptError, Step, Target, run};
