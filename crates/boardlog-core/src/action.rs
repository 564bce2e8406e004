//! Drawing actions: the immutable records a session log is made of.
//!
//! Actions travel as camelCase JSON with a kind-tagged payload:
//! ```json
//! { "actionKind": "shape",
//!   "payload": { "variant": "rectangle", "start": { "x": 0.0, "y": 0.0 }, "end": { "x": 5.0, "y": 5.0 } },
//!   "color": "#1e1e1e", "strokeWidth": 2.0, "authorId": "alice", "createdAt": 1700000000000 }
//! ```

use kurbo::Point;
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{SystemTime, UNIX_EPOCH};

/// Stroke width used when an incoming action omits one.
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;

/// Font size used when a text payload omits one.
pub const DEFAULT_FONT_SIZE: f64 = 16.0;

/// Errors raised while validating an action.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("Non-finite coordinate in {0} payload")]
    NonFiniteCoordinate(ActionKind),
    #[error("Invalid stroke width: {0}")]
    InvalidStrokeWidth(f64),
    #[error("Invalid font size: {0}")]
    InvalidFontSize(f64),
    #[error("Text action has no content")]
    EmptyText,
}

/// Color parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid color: {0}")]
pub struct ColorParseError(String);

/// Serializable color representation (RGBA8).
///
/// On the wire this is a CSS hex string (`#rrggbb`, or `#rrggbbaa` when not opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(color: &str) -> Result<Self, ColorParseError> {
        let invalid = || ColorParseError(color.to_string());
        let hex = color.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };

        match hex.len() {
            3 => Ok(Self::new(
                channel(0..1)? * 17,
                channel(1..2)? * 17,
                channel(2..3)? * 17,
                255,
            )),
            6 => Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
            8 => Ok(Self::new(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => Err(invalid()),
        }
    }

    /// Format as `#rrggbb`, or `#rrggbbaa` when translucent.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for SerializableColor {
    fn default() -> Self {
        Self::black()
    }
}

impl TryFrom<String> for SerializableColor {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<SerializableColor> for String {
    fn from(color: SerializableColor) -> Self {
        color.to_hex()
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// The four action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Path,
    Shape,
    Text,
    Clear,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Path => "path",
            ActionKind::Shape => "shape",
            ActionKind::Text => "text",
            ActionKind::Clear => "clear",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape variants drawn from a start/end drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeVariant {
    #[default]
    Line,
    Rectangle,
    Circle,
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

fn default_stroke_width() -> f64 {
    DEFAULT_STROKE_WIDTH
}

/// Kind-specific action data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionKind", content = "payload", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Free-hand stroke through the points, in order.
    Path { points: Vec<Point> },
    /// Shape computed from a drag's start and end point.
    Shape {
        variant: ShapeVariant,
        start: Point,
        end: Point,
    },
    /// Text run placed at an anchor point.
    Text {
        content: String,
        anchor: Point,
        #[serde(rename = "fontSize", default = "default_font_size")]
        font_size: f64,
    },
    /// Replace the visible board with a blank one.
    Clear,
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::Path { .. } => ActionKind::Path,
            ActionPayload::Shape { .. } => ActionKind::Shape,
            ActionPayload::Text { .. } => ActionKind::Text,
            ActionPayload::Clear => ActionKind::Clear,
        }
    }

    fn points_finite(&self) -> bool {
        let finite = |p: &Point| p.x.is_finite() && p.y.is_finite();
        match self {
            ActionPayload::Path { points } => points.iter().all(finite),
            ActionPayload::Shape { start, end, .. } => finite(start) && finite(end),
            ActionPayload::Text { anchor, .. } => finite(anchor),
            ActionPayload::Clear => true,
        }
    }
}

/// One atomic, immutable drawing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(flatten)]
    pub payload: ActionPayload,
    #[serde(default)]
    pub color: SerializableColor,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default)]
    pub author_id: String,
    /// Milliseconds since the Unix epoch. Display and tie-break only.
    #[serde(default)]
    pub created_at: u64,
}

impl Action {
    /// Create an action with default style, no author, stamped now.
    pub fn new(payload: ActionPayload) -> Self {
        Self {
            payload,
            color: SerializableColor::black(),
            stroke_width: DEFAULT_STROKE_WIDTH,
            author_id: String::new(),
            created_at: now_millis(),
        }
    }

    pub fn path(points: Vec<Point>) -> Self {
        Self::new(ActionPayload::Path { points })
    }

    pub fn shape(variant: ShapeVariant, start: Point, end: Point) -> Self {
        Self::new(ActionPayload::Shape {
            variant,
            start,
            end,
        })
    }

    pub fn text(content: impl Into<String>, anchor: Point) -> Self {
        Self::new(ActionPayload::Text {
            content: content.into(),
            anchor,
            font_size: DEFAULT_FONT_SIZE,
        })
    }

    pub fn clear() -> Self {
        Self::new(ActionPayload::Clear)
    }

    pub fn with_color(mut self, color: SerializableColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_stroke_width(mut self, width: f64) -> Self {
        self.stroke_width = width;
        self
    }

    pub fn by(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = author_id.into();
        self
    }

    pub fn at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    pub fn is_clear(&self) -> bool {
        matches!(self.payload, ActionPayload::Clear)
    }

    /// Reject actions that cannot be replayed deterministically.
    pub fn validate(&self) -> Result<(), ActionError> {
        if !self.payload.points_finite() {
            return Err(ActionError::NonFiniteCoordinate(self.kind()));
        }
        match &self.payload {
            ActionPayload::Clear => Ok(()),
            ActionPayload::Text {
                content, font_size, ..
            } => {
                if content.is_empty() {
                    Err(ActionError::EmptyText)
                } else if !font_size.is_finite() || *font_size <= 0.0 {
                    Err(ActionError::InvalidFontSize(*font_size))
                } else {
                    Ok(())
                }
            }
            _ if !self.stroke_width.is_finite() || self.stroke_width <= 0.0 => {
                Err(ActionError::InvalidStrokeWidth(self.stroke_width))
            }
            _ => Ok(()),
        }
    }
}

/// An action together with the sequence number the log assigned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedAction {
    pub sequence: u64,
    #[serde(flatten)]
    pub action: Action,
}

impl LoggedAction {
    pub fn new(sequence: u64, action: Action) -> Self {
        Self { sequence, action }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
#[cfg(not(target_arch = "wasm32"))]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(target_arch = "wasm32")]
pub fn now_millis() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_hex_forms() {
        assert_eq!(
            SerializableColor::from_hex("#fff").unwrap(),
            SerializableColor::white()
        );
        assert_eq!(
            SerializableColor::from_hex("#ff000080").unwrap(),
            SerializableColor::new(255, 0, 0, 128)
        );
        assert_eq!(SerializableColor::new(30, 30, 30, 255).to_hex(), "#1e1e1e");
        assert!(SerializableColor::from_hex("red").is_err());
        assert!(SerializableColor::from_hex("#12345").is_err());
    }

    #[test]
    fn test_peniko_color_conversion() {
        let color = SerializableColor::new(18, 52, 86, 200);
        let brush: Color = color.into();
        assert_eq!(SerializableColor::from(brush), color);
    }

    #[test]
    fn test_action_wire_shape() {
        let action = Action::path(vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)])
            .by("alice")
            .at(42);
        let json: serde_json::Value = serde_json::to_value(&action).unwrap();

        assert_eq!(json["actionKind"], "path");
        assert_eq!(json["payload"]["points"][1]["x"], 10.0);
        assert_eq!(json["color"], "#000000");
        assert_eq!(json["strokeWidth"], 2.0);
        assert_eq!(json["authorId"], "alice");
        assert_eq!(json["createdAt"], 42);
    }

    #[test]
    fn test_clear_without_payload_field() {
        let action: Action =
            serde_json::from_str(r#"{"actionKind":"clear","authorId":"bob"}"#).unwrap();
        assert!(action.is_clear());
        assert_eq!(action.author_id, "bob");
        assert_eq!(action.stroke_width, DEFAULT_STROKE_WIDTH);
    }

    #[test]
    fn test_coordinates_survive_the_wire_exactly() {
        let awkward = Point::new(0.1 + 0.2, 1.0 / 3.0);
        let action = Action::text("hi", awkward);
        let json = serde_json::to_string(&action).unwrap();
        let decoded: Action = serde_json::from_str(&json).unwrap();

        match decoded.payload {
            ActionPayload::Text { anchor, .. } => {
                assert_eq!(anchor.x.to_bits(), awkward.x.to_bits());
                assert_eq!(anchor.y.to_bits(), awkward.y.to_bits());
            }
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[test]
    fn test_logged_action_is_flat() {
        let logged = LoggedAction::new(7, Action::clear().by("carol").at(5));
        let json: serde_json::Value = serde_json::to_value(&logged).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["actionKind"], "clear");
        assert_eq!(json["authorId"], "carol");
    }

    #[test]
    fn test_validate() {
        assert!(Action::clear().validate().is_ok());
        assert_eq!(
            Action::text("", Point::ZERO).validate(),
            Err(ActionError::EmptyText)
        );
        assert_eq!(
            Action::path(vec![Point::ZERO]).with_stroke_width(0.0).validate(),
            Err(ActionError::InvalidStrokeWidth(0.0))
        );
        assert_eq!(
            Action::shape(ShapeVariant::Circle, Point::ZERO, Point::new(f64::NAN, 0.0))
                .validate(),
            Err(ActionError::NonFiniteCoordinate(ActionKind::Shape))
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<Action, _> =
            serde_json::from_str(r#"{"actionKind":"sticker","payload":{}}"#);
        assert!(result.is_err());
    }
}
