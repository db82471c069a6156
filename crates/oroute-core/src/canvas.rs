//! Local-only canvas: strokes and view with no replication.

use crate::config::CanvasConfig;
use crate::gesture::{DrawingTarget, GestureController};
use crate::input::{InputEvent, Mode};
use crate::lines::{CompositionMode, LineId, Lines};
use crate::view::ViewModel;
use kurbo::{Point, Size};

/// A canvas that keeps everything in memory for a single user.
#[derive(Debug, Clone)]
pub struct LocalCanvas {
    lines: Lines,
    gestures: GestureController,
    image_url: Option<String>,
    drawing: Option<LineId>,
}

impl Default for LocalCanvas {
    fn default() -> Self {
        Self::new(CanvasConfig::default())
    }
}

impl LocalCanvas {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            lines: Lines::new(),
            gestures: GestureController::new(config),
            image_url: None,
            drawing: None,
        }
    }

    pub fn lines(&self) -> &Lines {
        &self.lines
    }

    pub fn view(&self) -> ViewModel {
        self.gestures.view()
    }

    pub fn mode(&self) -> Mode {
        self.gestures.mode()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.gestures.set_mode(mode);
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.gestures.set_viewport(viewport);
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    /// Set the background image. An empty string clears it.
    pub fn set_image_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.image_url = (!url.is_empty()).then_some(url);
    }

    pub fn drawing_line(&self) -> Option<&str> {
        self.drawing.as_deref()
    }

    /// Feed one input event. Returns whether the view changed.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        let mut target = LocalTarget {
            lines: &mut self.lines,
            drawing: &mut self.drawing,
        };
        self.gestures.handle_event(event, &mut target)
    }

    /// Advance one animation frame. Returns whether the view moved.
    pub fn frame(&mut self) -> bool {
        self.gestures.tick()
    }

    pub fn clear_all_lines(&mut self) {
        self.lines.clear();
        self.drawing = None;
    }
}

/// Borrowed view of the canvas state that gestures edit.
struct LocalTarget<'a> {
    lines: &'a mut Lines,
    drawing: &'a mut Option<LineId>,
}

impl DrawingTarget for LocalTarget<'_> {
    fn lines(&self) -> &Lines {
        self.lines
    }

    fn add_point_to_drawing_line(&mut self, point: Point) {
        if let Some(id) = self.drawing.as_deref() {
            if self.lines.append_point(id, point) {
                return;
            }
            log::debug!("Drawing line {} is gone, starting a new one", id);
        }
        *self.drawing = Some(self.lines.start_line(point, CompositionMode::Draw));
    }

    fn end_drawing(&mut self) {
        if let Some(id) = self.drawing.take() {
            self.lines.finalize(&id);
        }
    }

    fn remove_lines(&mut self, ids: &[LineId]) {
        if self.drawing.as_ref().is_some_and(|id| ids.contains(id)) {
            *self.drawing = None;
        }
        self.lines.remove(ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(kind: &str, x: f64, y: f64) -> InputEvent {
        let position = Point::new(x, y);
        match kind {
            "down" => InputEvent::PointerDown { position },
            "up" => InputEvent::PointerUp { position },
            _ => InputEvent::PointerMove {
                position,
                pressed: true,
            },
        }
    }

    fn draw_stroke(canvas: &mut LocalCanvas, points: &[(f64, f64)]) {
        let (x, y) = points[0];
        canvas.handle_input(&pointer("down", x, y));
        for &(x, y) in points {
            canvas.handle_input(&pointer("move", x, y));
        }
        let (x, y) = points[points.len() - 1];
        canvas.handle_input(&pointer("up", x, y));
    }

    #[test]
    fn test_draw_then_erase() {
        let mut canvas = LocalCanvas::default();
        canvas.set_viewport(Size::new(800.0, 600.0));
        canvas.set_mode(Mode::Draw);
        draw_stroke(&mut canvas, &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        draw_stroke(&mut canvas, &[(50.0, 50.0), (60.0, 50.0)]);
        assert_eq!(canvas.lines().len(), 2);
        assert!(canvas.drawing_line().is_none());
        assert!(canvas.lines().iter().all(|(_, line)| !line.is_drawing));

        canvas.set_mode(Mode::Erase);
        draw_stroke(&mut canvas, &[(5.0, 5.0), (15.0, 5.0)]);
        assert_eq!(canvas.lines().len(), 1);
        let (_, left) = canvas.lines().iter().next().unwrap();
        assert_eq!(left.points, vec![50.0, 50.0, 60.0, 50.0]);
    }

    #[test]
    fn test_erasing_active_line_starts_fresh() {
        let mut canvas = LocalCanvas::default();
        let mut target = LocalTarget {
            lines: &mut canvas.lines,
            drawing: &mut canvas.drawing,
        };
        target.add_point_to_drawing_line(Point::new(0.0, 0.0));
        target.add_point_to_drawing_line(Point::new(10.0, 0.0));
        let first = target.drawing.clone().unwrap();
        target.remove_lines(std::slice::from_ref(&first));
        target.add_point_to_drawing_line(Point::new(20.0, 0.0));

        let second = canvas.drawing.clone().unwrap();
        assert_ne!(first, second);
        assert_eq!(canvas.lines.get(&second).unwrap().points, vec![20.0, 0.0]);
    }

    #[test]
    fn test_clear_all_lines() {
        let mut canvas = LocalCanvas::default();
        canvas.set_mode(Mode::Draw);
        draw_stroke(&mut canvas, &[(1.0, 1.0), (2.0, 2.0)]);
        canvas.clear_all_lines();
        assert!(canvas.lines().is_empty());
    }

    #[test]
    fn test_image_url() {
        let mut canvas = LocalCanvas::default();
        assert!(canvas.image_url().is_none());
        canvas.set_image_url("memory://map.png");
        assert_eq!(canvas.image_url(), Some("memory://map.png"));
        canvas.set_image_url("");
        assert!(canvas.image_url().is_none());
    }

    #[test]
    fn test_frame_runs_momentum() {
        let mut canvas = LocalCanvas::default();
        canvas.handle_input(&pointer("down", 0.0, 0.0));
        canvas.handle_input(&pointer("move", 0.0, 0.0));
        canvas.handle_input(&pointer("move", 0.0, 20.0));
        canvas.handle_input(&pointer("up", 0.0, 20.0));
        assert!(canvas.frame());
        assert!(canvas.view().position.y > 20.0);
    }

    #[test]
    fn test_unvalidated_config_survives_wheel() {
        let mut canvas = LocalCanvas::new(CanvasConfig {
            scale_min: 6.0,
            scale_max: 5.0,
            ..CanvasConfig::default()
        });
        canvas.set_viewport(Size::new(800.0, 600.0));
        assert!(canvas.handle_input(&InputEvent::Wheel {
            position: Point::new(400.0, 300.0),
            delta_y: -160.0,
            modifiers: Default::default(),
        }));
        assert_eq!(canvas.view().scale, 5.0);
    }
}
