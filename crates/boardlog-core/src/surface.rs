//! Drawing surfaces and deterministic replay.

use crate::action::{Action, ActionPayload, SerializableColor, ShapeVariant};
use kurbo::{Circle, Point, Rect, Shape as _};
use serde::{Deserialize, Serialize};

/// Approximate advance of one glyph relative to the font size.
const TEXT_ADVANCE_RATIO: f64 = 0.6;

/// A mutable target that actions are applied to.
///
/// `apply` must depend only on the current state and the action.
pub trait DrawingSurface {
    /// Apply one action on top of the current state.
    fn apply(&mut self, action: &Action);

    /// Return to the blank baseline.
    fn reset(&mut self);
}

/// Reset `surface` and apply `actions` in order.
pub fn replay<'a, S, I>(surface: &mut S, actions: I)
where
    S: DrawingSurface + ?Sized,
    I: IntoIterator<Item = &'a Action>,
{
    surface.reset();
    for action in actions {
        surface.apply(action);
    }
}

/// A resolved drawing primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Primitive {
    Polyline {
        points: Vec<Point>,
        color: SerializableColor,
        width: f64,
    },
    Segment {
        start: Point,
        end: Point,
        color: SerializableColor,
        width: f64,
    },
    /// Rectangle anchored at the drag start with signed extent.
    Rect {
        origin: Point,
        width: f64,
        height: f64,
        color: SerializableColor,
        stroke_width: f64,
    },
    Circle {
        center: Point,
        radius: f64,
        color: SerializableColor,
        stroke_width: f64,
    },
    TextRun {
        anchor: Point,
        content: String,
        color: SerializableColor,
        font_size: f64,
    },
}

impl Primitive {
    /// Resolve an action into the primitive it draws.
    ///
    /// Returns `None` for `clear` and for paths with fewer than two points.
    pub fn from_action(action: &Action) -> Option<Self> {
        let color = action.color;
        match &action.payload {
            ActionPayload::Path { points } if points.len() >= 2 => Some(Primitive::Polyline {
                points: points.clone(),
                color,
                width: action.stroke_width,
            }),
            ActionPayload::Path { .. } | ActionPayload::Clear => None,
            ActionPayload::Shape {
                variant,
                start,
                end,
            } => Some(match variant {
                ShapeVariant::Line => Primitive::Segment {
                    start: *start,
                    end: *end,
                    color,
                    width: action.stroke_width,
                },
                ShapeVariant::Rectangle => Primitive::Rect {
                    origin: *start,
                    width: end.x - start.x,
                    height: end.y - start.y,
                    color,
                    stroke_width: action.stroke_width,
                },
                ShapeVariant::Circle => Primitive::Circle {
                    center: *start,
                    radius: start.distance(*end),
                    color,
                    stroke_width: action.stroke_width,
                },
            }),
            ActionPayload::Text {
                content,
                anchor,
                font_size,
            } => Some(Primitive::TextRun {
                anchor: *anchor,
                content: content.clone(),
                color,
                font_size: *font_size,
            }),
        }
    }

    /// Axis-aligned bounds, ignoring stroke width.
    pub fn bounds(&self) -> Rect {
        match self {
            Primitive::Polyline { points, .. } => match points.split_first() {
                Some((first, rest)) => rest
                    .iter()
                    .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p)),
                None => Rect::ZERO,
            },
            Primitive::Segment { start, end, .. } => Rect::from_points(*start, *end),
            Primitive::Rect {
                origin,
                width,
                height,
                ..
            } => Rect::from_points(*origin, Point::new(origin.x + width, origin.y + height)),
            Primitive::Circle { center, radius, .. } => Circle::new(*center, *radius).bounding_box(),
            Primitive::TextRun {
                anchor,
                content,
                font_size,
                ..
            } => {
                let advance = content.chars().count() as f64 * font_size * TEXT_ADVANCE_RATIO;
                Rect::new(anchor.x, anchor.y - font_size, anchor.x + advance, anchor.y)
            }
        }
    }
}

/// Vector display list: the board as an ordered list of primitives.
///
/// Two surfaces that replayed the same actions compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorSurface {
    primitives: Vec<Primitive>,
}

impl VectorSurface {
    /// Create a blank surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Primitives back to front.
    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_blank(&self) -> bool {
        self.primitives.is_empty()
    }

    /// Bounding box of everything drawn.
    pub fn bounds(&self) -> Option<Rect> {
        self.primitives
            .iter()
            .map(Primitive::bounds)
            .reduce(|a, b| a.union(b))
    }
}

impl DrawingSurface for VectorSurface {
    fn apply(&mut self, action: &Action) {
        if let Err(e) = action.validate() {
            log::warn!("Skipping invalid {} action: {}", action.kind(), e);
            return;
        }
        if action.is_clear() {
            self.reset();
            return;
        }
        if let Some(primitive) = Primitive::from_action(action) {
            self.primitives.push(primitive);
        }
    }

    fn reset(&mut self) {
        self.primitives.clear();
    }
}
