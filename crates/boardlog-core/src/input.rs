//! Turns pointer and keyboard input into actions.
//!
//! Intermediate frames of a gesture come out as [`InputOutcome::Preview`]
//! and are meant for an ephemeral overlay only. A gesture produces at most
//! one [`InputOutcome::Commit`], on release or text confirm.

use crate::action::{Action, DEFAULT_FONT_SIZE, DEFAULT_STROKE_WIDTH, SerializableColor, ShapeVariant};
use crate::sync::Throttle;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Pen,
    Line,
    Rectangle,
    Circle,
    Text,
}

impl Tool {
    fn shape_variant(self) -> Option<ShapeVariant> {
        match self {
            Tool::Line => Some(ShapeVariant::Line),
            Tool::Rectangle => Some(ShapeVariant::Rectangle),
            Tool::Circle => Some(ShapeVariant::Circle),
            Tool::Pen | Tool::Text => None,
        }
    }
}

/// Keys the text editor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    Backspace,
    Char(char),
}

/// Result of feeding one input event to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    None,
    /// Draw on the overlay; do not record or send.
    Preview(Action),
    /// A finalized action.
    Commit(Action),
}

/// In-progress gesture.
#[derive(Debug, Clone, Default, PartialEq)]
enum Gesture {
    #[default]
    Idle,
    Stroke { points: Vec<Point> },
    Drag {
        variant: ShapeVariant,
        start: Point,
        current: Point,
    },
    Typing { anchor: Point, buffer: String },
}

/// Current tool, style and gesture.
#[derive(Debug, Clone)]
pub struct InputController {
    tool: Tool,
    gesture: Gesture,
    throttle: Throttle,
    pub color: SerializableColor,
    pub stroke_width: f64,
    pub font_size: f64,
    pub author_id: String,
}

impl Default for InputController {
    fn default() -> Self {
        Self::new(Throttle::default().interval())
    }
}

impl InputController {
    /// Create a controller that emits at most one preview per `preview_interval`.
    pub fn new(preview_interval: Duration) -> Self {
        Self {
            tool: Tool::default(),
            gesture: Gesture::Idle,
            throttle: Throttle::new(preview_interval),
            color: SerializableColor::black(),
            stroke_width: DEFAULT_STROKE_WIDTH,
            font_size: DEFAULT_FONT_SIZE,
            author_id: String::new(),
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Switch tools. Any open text entry is finalized as on blur; other
    /// gestures are dropped.
    pub fn set_tool(&mut self, tool: Tool) -> InputOutcome {
        let outcome = self.blur();
        self.tool = tool;
        self.gesture = Gesture::Idle;
        outcome
    }

    pub fn is_active(&self) -> bool {
        self.gesture != Gesture::Idle
    }

    pub fn is_editing_text(&self) -> bool {
        matches!(self.gesture, Gesture::Typing { .. })
    }

    pub fn pointer_down(&mut self, point: Point) -> InputOutcome {
        // A click elsewhere while typing finalizes the open text first.
        if self.is_editing_text() {
            let outcome = self.blur();
            if outcome != InputOutcome::None {
                return outcome;
            }
        }

        self.throttle.reset();
        self.gesture = match self.tool {
            Tool::Pen => Gesture::Stroke {
                points: vec![point],
            },
            Tool::Text => Gesture::Typing {
                anchor: point,
                buffer: String::new(),
            },
            tool => match tool.shape_variant() {
                Some(variant) => Gesture::Drag {
                    variant,
                    start: point,
                    current: point,
                },
                None => Gesture::Idle,
            },
        };
        InputOutcome::None
    }

    /// Pointer moved; previews are rate-limited against the wall clock.
    pub fn pointer_move(&mut self, point: Point) -> InputOutcome {
        self.pointer_move_at(point, Instant::now())
    }

    /// Pointer moved at `now`.
    pub fn pointer_move_at(&mut self, point: Point, now: Instant) -> InputOutcome {
        match &mut self.gesture {
            Gesture::Stroke { points } => {
                if points.last() != Some(&point) {
                    points.push(point);
                }
            }
            Gesture::Drag { current, .. } => *current = point,
            Gesture::Idle | Gesture::Typing { .. } => return InputOutcome::None,
        }
        if !self.throttle.ready(now) {
            return InputOutcome::None;
        }
        self.preview().map_or(InputOutcome::None, InputOutcome::Preview)
    }

    pub fn pointer_up(&mut self, point: Point) -> InputOutcome {
        match std::mem::take(&mut self.gesture) {
            Gesture::Stroke { mut points } => {
                if points.last() != Some(&point) {
                    points.push(point);
                }
                if points.len() < 2 {
                    return InputOutcome::None;
                }
                InputOutcome::Commit(self.style(Action::path(points)))
            }
            Gesture::Drag { variant, start, .. } => {
                if start == point {
                    return InputOutcome::None;
                }
                InputOutcome::Commit(self.style(Action::shape(variant, start, point)))
            }
            typing @ Gesture::Typing { .. } => {
                // The text box stays open until confirmed.
                self.gesture = typing;
                InputOutcome::None
            }
            Gesture::Idle => InputOutcome::None,
        }
    }

    pub fn key(&mut self, key: Key) -> InputOutcome {
        let Gesture::Typing { buffer, .. } = &mut self.gesture else {
            return InputOutcome::None;
        };
        match key {
            Key::Enter => self.finish_text(),
            Key::Escape => {
                self.gesture = Gesture::Idle;
                InputOutcome::None
            }
            Key::Backspace => {
                buffer.pop();
                self.preview().map_or(InputOutcome::None, InputOutcome::Preview)
            }
            Key::Char(c) if !c.is_control() => {
                buffer.push(c);
                self.preview().map_or(InputOutcome::None, InputOutcome::Preview)
            }
            Key::Char(_) => InputOutcome::None,
        }
    }

    /// Focus left the editor: commit non-empty text, discard empty text.
    pub fn blur(&mut self) -> InputOutcome {
        if self.is_editing_text() {
            self.finish_text()
        } else {
            InputOutcome::None
        }
    }

    /// Abandon the current gesture without committing.
    pub fn cancel(&mut self) {
        self.gesture = Gesture::Idle;
    }

    /// The overlay action for the gesture in progress, if any.
    pub fn preview(&self) -> Option<Action> {
        let action = match &self.gesture {
            Gesture::Idle => return None,
            Gesture::Stroke { points } => Action::path(points.clone()),
            Gesture::Drag {
                variant,
                start,
                current,
            } => Action::shape(*variant, *start, *current),
            Gesture::Typing { anchor, buffer } => {
                if buffer.is_empty() {
                    return None;
                }
                Action::text(buffer.clone(), *anchor)
            }
        };
        Some(self.style(action))
    }

    fn finish_text(&mut self) -> InputOutcome {
        match std::mem::take(&mut self.gesture) {
            Gesture::Typing { anchor, buffer } if !buffer.trim().is_empty() => {
                InputOutcome::Commit(self.style(Action::text(buffer, anchor)))
            }
            _ => InputOutcome::None,
        }
    }

    fn style(&self, mut action: Action) -> Action {
        if let crate::action::ActionPayload::Text { font_size, .. } = &mut action.payload {
            *font_size = self.font_size;
        }
        action
            .with_color(self.color)
            .with_stroke_width(self.stroke_width)
            .by(self.author_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ActionPayload};

    fn controller(tool: Tool) -> InputController {
        let mut input = InputController::default();
        input.author_id = "alice".to_string();
        input.set_tool(tool);
        input
    }

    #[test]
    fn test_pen_commits_on_release() {
        let mut input = controller(Tool::Pen);
        let t0 = Instant::now();
        input.pointer_down(Point::new(0.0, 0.0));
        input.pointer_move_at(Point::new(5.0, 5.0), t0);
        match input.pointer_up(Point::new(10.0, 10.0)) {
            InputOutcome::Commit(action) => {
                assert_eq!(action.author_id, "alice");
                match action.payload {
                    ActionPayload::Path { points } => assert_eq!(points.len(), 3),
                    other => panic!("Expected path, got {:?}", other),
                }
            }
            other => panic!("Expected commit, got {:?}", other),
        }
        assert!(!input.is_active());
    }

    #[test]
    fn test_pen_click_without_movement_not_committed() {
        let mut input = controller(Tool::Pen);
        input.pointer_down(Point::new(3.0, 3.0));
        assert_eq!(input.pointer_up(Point::new(3.0, 3.0)), InputOutcome::None);
    }

    #[test]
    fn test_previews_are_throttled() {
        let mut input = controller(Tool::Pen);
        let t0 = Instant::now();
        input.pointer_down(Point::ZERO);
        assert!(matches!(
            input.pointer_move_at(Point::new(1.0, 0.0), t0),
            InputOutcome::Preview(_)
        ));
        assert_eq!(
            input.pointer_move_at(Point::new(2.0, 0.0), t0 + Duration::from_millis(4)),
            InputOutcome::None
        );
        assert!(matches!(
            input.pointer_move_at(Point::new(3.0, 0.0), t0 + Duration::from_millis(20)),
            InputOutcome::Preview(_)
        ));
        // Throttled frames still contribute points.
        match input.preview().map(|a| a.payload) {
            Some(ActionPayload::Path { points }) => assert_eq!(points.len(), 4),
            other => panic!("Expected path preview, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_drag_commits_single_shape() {
        let mut input = controller(Tool::Rectangle);
        input.pointer_down(Point::new(0.0, 0.0));
        input.pointer_move_at(Point::new(2.0, 2.0), Instant::now());
        match input.pointer_up(Point::new(5.0, 5.0)) {
            InputOutcome::Commit(action) => assert_eq!(
                action.payload,
                ActionPayload::Shape {
                    variant: ShapeVariant::Rectangle,
                    start: Point::new(0.0, 0.0),
                    end: Point::new(5.0, 5.0),
                }
            ),
            other => panic!("Expected commit, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_drag_not_committed() {
        let mut input = controller(Tool::Circle);
        input.pointer_down(Point::new(1.0, 1.0));
        assert_eq!(input.pointer_up(Point::new(1.0, 1.0)), InputOutcome::None);
    }

    #[test]
    fn test_text_confirm_with_enter() {
        let mut input = controller(Tool::Text);
        input.font_size = 24.0;
        input.pointer_down(Point::new(2.0, 2.0));
        assert_eq!(input.pointer_up(Point::new(2.0, 2.0)), InputOutcome::None);
        assert!(input.is_editing_text());

        input.key(Key::Char('h'));
        input.key(Key::Char('x'));
        input.key(Key::Backspace);
        input.key(Key::Char('i'));
        match input.key(Key::Enter) {
            InputOutcome::Commit(action) => assert_eq!(
                action.payload,
                ActionPayload::Text {
                    content: "hi".to_string(),
                    anchor: Point::new(2.0, 2.0),
                    font_size: 24.0,
                }
            ),
            other => panic!("Expected commit, got {:?}", other),
        }
    }

    #[test]
    fn test_text_escape_discards() {
        let mut input = controller(Tool::Text);
        input.pointer_down(Point::ZERO);
        input.key(Key::Char('a'));
        assert_eq!(input.key(Key::Escape), InputOutcome::None);
        assert!(!input.is_active());
    }

    #[test]
    fn test_blur_commits_non_empty_and_discards_empty() {
        let mut input = controller(Tool::Text);
        input.pointer_down(Point::ZERO);
        assert_eq!(input.blur(), InputOutcome::None);

        input.pointer_down(Point::ZERO);
        input.key(Key::Char('a'));
        match input.blur() {
            InputOutcome::Commit(action) => assert_eq!(action.kind(), ActionKind::Text),
            other => panic!("Expected commit, got {:?}", other),
        }
    }

    #[test]
    fn test_click_elsewhere_commits_open_text() {
        let mut input = controller(Tool::Text);
        input.pointer_down(Point::ZERO);
        input.key(Key::Char('a'));
        assert!(matches!(
            input.pointer_down(Point::new(50.0, 50.0)),
            InputOutcome::Commit(_)
        ));
    }

    #[test]
    fn test_style_applied() {
        let mut input = controller(Tool::Line);
        input.color = SerializableColor::from_hex("#ff0000").unwrap();
        input.stroke_width = 4.0;
        input.pointer_down(Point::ZERO);
        match input.pointer_up(Point::new(1.0, 0.0)) {
            InputOutcome::Commit(action) => {
                assert_eq!(action.color.to_hex(), "#ff0000");
                assert_eq!(action.stroke_width, 4.0);
            }
            other => panic!("Expected commit, got {:?}", other),
        }
    }
}
