//! Drawing capture: pointer strokes recorded as time-ordered colored points.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::events::{Observers, SubscriptionId};

pub const MIN_BRUSH_SIZE: f32 = 1.0;
pub const MAX_BRUSH_SIZE: f32 = 50.0;

/// The fixed scale every point maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Note {
    C,
    D,
    E,
    G,
    A,
    C2,
}

impl Note {
    pub const ALL: [Note; 6] = [Note::C, Note::D, Note::E, Note::G, Note::A, Note::C2];

    pub fn id(self) -> &'static str {
        match self {
            Note::C => "C",
            Note::D => "D",
            Note::E => "E",
            Note::G => "G",
            Note::A => "A",
            Note::C2 => "C2",
        }
    }

    /// Fundamental frequency in Hz.
    pub fn frequency(self) -> f32 {
        match self {
            Note::C => 261.63,
            Note::D => 293.66,
            Note::E => 329.63,
            Note::G => 392.00,
            Note::A => 440.00,
            Note::C2 => 523.25,
        }
    }

    /// Palette color that draws this note.
    pub fn color(self) -> &'static str {
        match self {
            Note::C => "#ff0080",
            Note::D => "#00ff80",
            Note::E => "#8000ff",
            Note::G => "#ff8000",
            Note::A => "#00ffff",
            Note::C2 => "#ffff00",
        }
    }

    /// Looks up the note drawn by a palette color (case-insensitive).
    pub fn from_color(color: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|note| note.color().eq_ignore_ascii_case(color))
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Returned when a note id is not part of the scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNote(pub String);

impl fmt::Display for UnknownNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown note `{}`", self.0)
    }
}

impl std::error::Error for UnknownNote {}

impl FromStr for Note {
    type Err = UnknownNote;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|note| note.id() == s)
            .ok_or_else(|| UnknownNote(s.to_string()))
    }
}

/// Visual brush style; has no effect on sound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushType {
    #[default]
    Smooth,
    Sparkle,
}

/// One sampled position of a stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub color: String,
    pub note: Note,
    pub brush_size: f32,
    pub brush_type: BrushType,
    /// Seconds since the first point of the drawing.
    pub timestamp: f64,
}

impl Point {
    /// A point drawn with the palette color of `note` and the default brush.
    pub fn new(x: f32, y: f32, note: Note) -> Self {
        Self {
            x,
            y,
            color: note.color().to_string(),
            note,
            brush_size: 10.0,
            brush_type: BrushType::Smooth,
            timestamp: 0.0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.timestamp.is_finite()
    }
}

/// Current brush settings applied to newly captured points.
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub color: String,
    pub note: Note,
    pub size: f32,
    pub kind: BrushType,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            color: Note::C.color().to_string(),
            note: Note::C,
            size: 10.0,
            kind: BrushType::Smooth,
        }
    }
}

/// Stroke lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeEvent {
    Started {
        x: f32,
        y: f32,
        note: Note,
        color: String,
        brush_size: f32,
        brush_type: BrushType,
    },
    Ended {
        stroke_len: usize,
        total_points: usize,
    },
}

/// Records strokes into a flat, draw-ordered point list.
#[derive(Debug, Default)]
pub struct DrawingCapture {
    brush: Brush,
    points: Vec<Point>,
    stroke: Option<Vec<Point>>,
    origin: Option<f64>,
    observers: Observers<StrokeEvent>,
}

impl DrawingCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    /// Selects a palette color. Returns `false` for colors outside the
    /// palette, leaving the brush unchanged.
    pub fn set_color(&mut self, color: &str) -> bool {
        match Note::from_color(color) {
            Some(note) => {
                self.brush.color = color.to_string();
                self.brush.note = note;
                true
            }
            None => false,
        }
    }

    pub fn set_note(&mut self, note: Note) {
        self.brush.color = note.color().to_string();
        self.brush.note = note;
    }

    pub fn set_brush_size(&mut self, size: f32) {
        if size.is_finite() {
            self.brush.size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
        }
    }

    pub fn set_brush_type(&mut self, kind: BrushType) {
        self.brush.kind = kind;
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&StrokeEvent) + 'static) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn is_drawing(&self) -> bool {
        self.stroke.is_some()
    }

    /// Opens a stroke at `(x, y)`. An already open stroke is committed first.
    pub fn begin_stroke(&mut self, x: f32, y: f32, now: f64) {
        if self.stroke.is_some() {
            self.end_stroke();
        }
        let point = self.capture(x, y, now);
        self.stroke = Some(vec![point]);
        self.observers.notify(&StrokeEvent::Started {
            x,
            y,
            note: self.brush.note,
            color: self.brush.color.clone(),
            brush_size: self.brush.size,
            brush_type: self.brush.kind,
        });
    }

    pub fn extend_stroke(&mut self, x: f32, y: f32, now: f64) {
        if self.stroke.is_none() {
            return;
        }
        let point = self.capture(x, y, now);
        if let Some(stroke) = self.stroke.as_mut() {
            stroke.push(point);
        }
    }

    /// Commits the open stroke. Returns the number of points it added.
    pub fn end_stroke(&mut self) -> usize {
        let Some(stroke) = self.stroke.take() else {
            return 0;
        };
        let stroke_len = stroke.len();
        if stroke_len > 0 {
            self.points.extend(stroke);
            self.observers.notify(&StrokeEvent::Ended {
                stroke_len,
                total_points: self.points.len(),
            });
        }
        stroke_len
    }

    pub fn has_content(&self) -> bool {
        !self.points.is_empty()
    }

    /// Copy of every committed point in draw order.
    pub fn export_points(&self) -> Vec<Point> {
        self.points.clone()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Replaces the drawing with previously captured points.
    pub fn load_points(&mut self, points: &[Point]) {
        self.stroke = None;
        self.points = points.to_vec();
        self.origin = None;
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.stroke = None;
        self.origin = None;
    }

    fn capture(&mut self, x: f32, y: f32, now: f64) -> Point {
        let origin = *self.origin.get_or_insert(now);
        Point {
            x,
            y,
            color: self.brush.color.clone(),
            note: self.brush.note,
            brush_size: self.brush.size,
            brush_type: self.brush.kind,
            timestamp: (now - origin).max(0.0),
        }
    }
}
