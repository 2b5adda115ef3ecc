//! Shared whiteboard elements and the last-writer-wins whiteboard mirror.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CollabError, Result};

/// Kind of drawable object on the whiteboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Path,
    Rectangle,
    Circle,
    Text,
    Arrow,
    Sticky,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKind::Path => write!(f, "path"),
            ElementKind::Rectangle => write!(f, "rectangle"),
            ElementKind::Circle => write!(f, "circle"),
            ElementKind::Text => write!(f, "text"),
            ElementKind::Arrow => write!(f, "arrow"),
            ElementKind::Sticky => write!(f, "sticky"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Shape geometry. Which fields are meaningful depends on the element kind:
/// strokes use `points`, boxed shapes use the origin and size, text uses the
/// origin and `text`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Geometry {
    pub fn stroke(points: Vec<Point>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    pub fn boxed(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn label(x: f64, y: f64, text: impl Into<String>) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Check that the geometry carries what `kind` needs to be drawn.
    fn check(&self, kind: ElementKind) -> std::result::Result<(), String> {
        match kind {
            ElementKind::Path if self.points.is_empty() => {
                Err("path needs at least one point".to_string())
            }
            ElementKind::Arrow if self.points.len() < 2 => {
                Err("arrow needs a start and an end point".to_string())
            }
            ElementKind::Rectangle | ElementKind::Circle | ElementKind::Sticky => {
                match (self.x, self.y, self.width, self.height) {
                    (Some(_), Some(_), Some(w), Some(h)) if w >= 0.0 && h >= 0.0 => Ok(()),
                    (Some(_), Some(_), Some(_), Some(_)) => {
                        Err(format!("{} has a negative size", kind))
                    }
                    _ => Err(format!("{} needs x, y, width and height", kind)),
                }
            }
            ElementKind::Text => match (self.x, self.y, &self.text) {
                (Some(_), Some(_), Some(_)) => Ok(()),
                _ => Err("text needs x, y and text".to_string()),
            },
            _ => Ok(()),
        }
    }
}

/// A drawable object owned by a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub geometry: Geometry,
    pub color: String,
    pub stroke_width: f64,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WhiteboardElement {
    /// Create an element with a fresh id, black stroke of width 2.
    pub fn new(kind: ElementKind, geometry: Geometry, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            geometry,
            color: "#000000".to_string(),
            stroke_width: 2.0,
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_stroke_width(mut self, stroke_width: f64) -> Self {
        self.stroke_width = stroke_width;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CollabError::InvalidElement {
            id: self.id.clone(),
            reason,
        };
        if self.id.is_empty() {
            return Err(invalid("empty id".to_string()));
        }
        if !self.stroke_width.is_finite() || self.stroke_width < 0.0 {
            return Err(invalid("stroke width must be a non-negative number".to_string()));
        }
        self.geometry.check(self.kind).map_err(invalid)
    }
}

/// A mutation of the whiteboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WhiteboardChange {
    Add(WhiteboardElement),
    Update(WhiteboardElement),
    #[serde(rename_all = "camelCase")]
    Delete { element_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    Clear { user_id: String },
}

impl WhiteboardChange {
    /// Participant who made the change
    pub fn user_id(&self) -> &str {
        match self {
            WhiteboardChange::Add(element) | WhiteboardChange::Update(element) => &element.user_id,
            WhiteboardChange::Delete { user_id, .. } | WhiteboardChange::Clear { user_id } => {
                user_id
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            WhiteboardChange::Add(element) | WhiteboardChange::Update(element) => {
                element.validate()
            }
            _ => Ok(()),
        }
    }
}

/// Mirror of the whiteboard. Elements are keyed by id and listed in the order
/// they first appeared; later writes to an id replace it in place.
#[derive(Debug, Clone, Default)]
pub struct Whiteboard {
    elements: HashMap<String, WhiteboardElement>,
    order: Vec<String>,
}

impl Whiteboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a whiteboard from elements in display order.
    pub fn from_elements(elements: impl IntoIterator<Item = WhiteboardElement>) -> Self {
        let mut board = Self::new();
        for element in elements {
            board.upsert(element);
        }
        board
    }

    /// Apply a change in receipt order. Returns whether anything changed.
    pub fn apply(&mut self, change: &WhiteboardChange) -> bool {
        match change {
            WhiteboardChange::Add(element) | WhiteboardChange::Update(element) => {
                self.upsert(element.clone());
                true
            }
            WhiteboardChange::Delete { element_id, .. } => self.remove(element_id).is_some(),
            WhiteboardChange::Clear { .. } => {
                let changed = !self.elements.is_empty();
                self.elements.clear();
                self.order.clear();
                changed
            }
        }
    }

    fn upsert(&mut self, element: WhiteboardElement) {
        if !self.elements.contains_key(&element.id) {
            self.order.push(element.id.clone());
        }
        self.elements.insert(element.id.clone(), element);
    }

    fn remove(&mut self, id: &str) -> Option<WhiteboardElement> {
        let removed = self.elements.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&WhiteboardElement> {
        self.elements.get(id)
    }

    /// Elements in display order
    pub fn elements(&self) -> impl Iterator<Item = &WhiteboardElement> {
        self.order.iter().filter_map(|id| self.elements.get(id))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
