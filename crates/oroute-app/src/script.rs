//! Scripted sessions: replay input against a local canvas or an in-memory room.

use kurbo::Size;
use oroute_core::sync::{BackendError, MemoryBackend, MemoryDatabase, create_room};
use oroute_core::{
    CanvasConfig, ConfigError, ImageStore, InputEvent, Lines, LocalCanvas, MemoryImageStore, Mode,
    RoomSession, SessionEvent, UploadMetadata, ViewMode, ViewModel,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default frame spacing, roughly 60 fps.
const DEFAULT_FRAME_MS: u64 = 16;

/// Script errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Where the script runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    /// Offline canvas with no replication.
    #[default]
    Local,
    /// A freshly created room.
    NewRoom,
    /// Join a room id in a fresh, empty in-memory database. Nothing is
    /// stored there, so this always reports `room_not_found`.
    Room(String),
}

/// One scripted action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Mode { mode: Mode },
    ViewMode { mode: ViewMode },
    Viewport { width: f64, height: f64 },
    Input { event: InputEvent },
    Frame {
        #[serde(default = "default_frame_count")]
        count: u32,
        #[serde(default = "default_frame_ms")]
        interval_ms: u64,
    },
    /// Upload a file, or `size` synthetic bytes when no path is given.
    Upload {
        name: String,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        size: usize,
    },
    Clear,
}

fn default_frame_count() -> u32 {
    1
}

fn default_frame_ms() -> u64 {
    DEFAULT_FRAME_MS
}

/// A full script document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub target: Target,
    pub viewport: Option<Size>,
    pub config: Option<CanvasConfig>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let script: Self = serde_json::from_str(json)?;
        if let Some(config) = &script.config {
            config.validate()?;
        }
        Ok(script)
    }
}

/// Final state after a script ran.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub view: ViewModel,
    pub lines: Lines,
    pub image: Option<String>,
    pub events: Vec<SessionEvent>,
    /// User-facing notices such as failed uploads.
    pub notices: Vec<String>,
}

/// Execute a script to completion.
pub fn run(script: &Script) -> Result<Outcome, ScriptError> {
    let config = script.config.clone().unwrap_or_default();
    let store = MemoryImageStore::new();

    match &script.target {
        Target::Local => Ok(run_local(script, config, &store)),
        Target::NewRoom => {
            let database = MemoryDatabase::new();
            let room = create_room(&database.connect())?;
            run_room(script, config, &store, database.connect(), &room)
        }
        Target::Room(room) => {
            let database = MemoryDatabase::new();
            run_room(script, config, &store, database.connect(), room)
        }
    }
}

fn upload_bytes(path: &Option<PathBuf>, size: usize) -> std::io::Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path),
        None => Ok(vec![0; size]),
    }
}

fn run_local(script: &Script, config: CanvasConfig, store: &MemoryImageStore) -> Outcome {
    let mut canvas = LocalCanvas::new(config);
    let mut notices = Vec::new();
    if let Some(viewport) = script.viewport {
        canvas.set_viewport(viewport);
    }

    for step in &script.steps {
        match step {
            Step::Mode { mode } => canvas.set_mode(*mode),
            Step::ViewMode { mode } => {
                log::warn!("View mode {:?} needs a room, ignored", mode);
            }
            Step::Viewport { width, height } => canvas.set_viewport(Size::new(*width, *height)),
            Step::Input { event } => {
                canvas.handle_input(event);
            }
            Step::Frame { count, .. } => {
                for _ in 0..*count {
                    canvas.frame();
                }
            }
            Step::Upload { name, path, size } => {
                let uploaded = upload_bytes(path, *size)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| {
                        pollster::block_on(async {
                            let image = store.upload(name, bytes, UploadMetadata::default()).await?;
                            store.download_url(&image).await
                        })
                        .map_err(|e| {
                            log::warn!("Image upload failed: {}", e);
                            e.notice().to_string()
                        })
                    });
                match uploaded {
                    Ok(url) => canvas.set_image_url(url),
                    Err(notice) => notices.push(notice),
                }
            }
            Step::Clear => canvas.clear_all_lines(),
        }
    }

    Outcome {
        room: None,
        view: canvas.view(),
        lines: canvas.lines().clone(),
        image: canvas.image_url().map(str::to_string),
        events: Vec::new(),
        notices,
    }
}

fn run_room(
    script: &Script,
    config: CanvasConfig,
    store: &MemoryImageStore,
    backend: MemoryBackend,
    room: &str,
) -> Result<Outcome, ScriptError> {
    let mut session = RoomSession::join(backend, room, config)?;
    let mut notices = Vec::new();
    let mut events = Vec::new();
    let mut clock = Instant::now();
    if let Some(viewport) = script.viewport {
        session.set_viewport(viewport);
    }

    for step in &script.steps {
        match step {
            Step::Mode { mode } => session.set_mode(*mode),
            Step::ViewMode { mode } => session.set_view_mode(*mode),
            Step::Viewport { width, height } => session.set_viewport(Size::new(*width, *height)),
            Step::Input { event } => {
                session.handle_input(event);
            }
            Step::Frame { count, interval_ms } => {
                for _ in 0..*count {
                    clock += Duration::from_millis(*interval_ms);
                    events.extend(session.frame(clock));
                }
            }
            Step::Upload { name, path, size } => {
                let bytes = upload_bytes(path, *size)?;
                if let Err(e) = pollster::block_on(session.upload_image(store, name, bytes)) {
                    notices.push(e.notice().to_string());
                }
            }
            Step::Clear => session.clear_all_lines(),
        }
    }
    // Deliver whatever the last steps wrote.
    events.extend(session.frame(clock));

    let outcome = Outcome {
        room: Some(session.room_id().to_string()),
        view: session.view(),
        lines: session.lines().clone(),
        image: session.image_url().map(str::to_string),
        events,
        notices,
    };
    session.leave();
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAW_SCRIPT: &str = r#"{
        "viewport": {"width": 800.0, "height": 600.0},
        "steps": [
            {"type": "mode", "mode": "draw"},
            {"type": "input", "event": {"type": "pointer_down", "position": {"x": 0.0, "y": 0.0}}},
            {"type": "input", "event": {"type": "pointer_move", "position": {"x": 0.0, "y": 0.0}}},
            {"type": "input", "event": {"type": "pointer_move", "position": {"x": 5.0, "y": 0.0}}},
            {"type": "input", "event": {"type": "pointer_move", "position": {"x": 5.0, "y": 5.0}}},
            {"type": "input", "event": {"type": "pointer_up", "position": {"x": 5.0, "y": 5.0}}}
        ]
    }"#;

    #[test]
    fn test_local_draw_script() {
        let script = Script::from_json(DRAW_SCRIPT).unwrap();
        assert_eq!(script.target, Target::Local);
        let outcome = run(&script).unwrap();
        assert_eq!(outcome.lines.len(), 1);
        let (_, line) = outcome.lines.iter().next().unwrap();
        assert_eq!(line.points, vec![0.0, 0.0, 5.0, 0.0, 5.0, 5.0]);
        assert!(!line.is_drawing);
    }

    #[test]
    fn test_new_room_script() {
        let mut script = Script::from_json(DRAW_SCRIPT).unwrap();
        script.target = Target::NewRoom;
        script.steps.push(Step::Upload {
            name: "map.png".into(),
            path: None,
            size: 8,
        });
        let outcome = run(&script).unwrap();
        assert!(outcome.room.is_some());
        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.image.as_deref(), Some("memory://map.png"));
        assert!(outcome.notices.is_empty());
    }

    #[test]
    fn test_unknown_room_reports_not_found() {
        let script = Script {
            target: Target::Room("nowhere".into()),
            ..Script::default()
        };
        let outcome = run(&script).unwrap();
        assert_eq!(outcome.events, vec![SessionEvent::RoomNotFound]);
    }

    #[test]
    fn test_oversized_upload_gives_notice() {
        let script = Script {
            steps: vec![Step::Upload {
                name: "huge.png".into(),
                path: None,
                size: oroute_core::image::MAX_UPLOAD_BYTES + 1,
            }],
            ..Script::default()
        };
        let outcome = run(&script).unwrap();
        assert!(outcome.image.is_none());
        assert_eq!(outcome.notices.len(), 1);
    }

    #[test]
    fn test_target_layout() {
        let target: Target = serde_json::from_str(r#"{"kind": "room", "id": "abc"}"#).unwrap();
        assert_eq!(target, Target::Room("abc".into()));
        let target: Target = serde_json::from_str(r#"{"kind": "new_room"}"#).unwrap();
        assert_eq!(target, Target::NewRoom);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Script::from_json(r#"{"config": {"scale_min": 0.0}}"#);
        assert!(matches!(result, Err(ScriptError::Config(_))));
    }
}
