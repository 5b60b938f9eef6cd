//! Element model: the unit of synchronization.
//!
//! Elements are serialized with camelCase keys so the wire format matches what
//! drawing clients already speak. Attributes the model does not know about
//! (roughness, opacity, angle, ...) ride along in [`Element::extra`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

pub const DEFAULT_STROKE_COLOR: &str = "#1e1e1e";
pub const DEFAULT_BACKGROUND_COLOR: &str = "transparent";
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;
pub const DEFAULT_FILL_STYLE: &str = "solid";
pub const DEFAULT_FONT_SIZE: f64 = 20.0;

/// Keys that only exist for audit and are never handed to a renderer.
pub const BOOKKEEPING_KEYS: [&str; 4] = ["createdAt", "updatedAt", "syncSource", "version"];

/// Closed set of element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Rectangle,
    Ellipse,
    Diamond,
    Text,
    Arrow,
    Line,
    Freedraw,
}

impl ElementType {
    /// Closed shapes that can contain a text label.
    pub fn is_shape(self) -> bool {
        matches!(self, Self::Rectangle | Self::Ellipse | Self::Diamond)
    }

    /// Elements whose geometry is a list of points.
    pub fn is_linear(self) -> bool {
        matches!(self, Self::Arrow | Self::Line | Self::Freedraw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Ellipse => "ellipse",
            Self::Diamond => "diamond",
            Self::Text => "text",
            Self::Arrow => "arrow",
            Self::Line => "line",
            Self::Freedraw => "freedraw",
        }
    }
}

/// Kind of element allowed inside a shape's `boundElements`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    Text,
    Arrow,
}

/// A weak reference from a shape to a text label or arrow bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BoundKind,
}

impl BoundElement {
    pub fn new(id: impl Into<String>, kind: BoundKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// `boundElements` as received. Anything that is not a list of well-formed
/// `{id, type}` entries is kept as `Malformed` until the binding checker
/// clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundElements {
    Valid(Vec<BoundElement>),
    Malformed(Value),
}

impl BoundElements {
    pub fn entries(&self) -> &[BoundElement] {
        match self {
            BoundElements::Valid(entries) => entries,
            BoundElements::Malformed(_) => &[],
        }
    }
}

/// Arrow endpoint binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrowEndpoint {
    pub id: String,
}

impl ArrowEndpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Who produced the latest write of an element. Audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    Client,
    Api,
    Agent,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Offsets relative to `x,y`. Linear elements only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<[f64; 2]>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_elements: Option<BoundElements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<ArrowEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<ArrowEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_source: Option<SyncSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Element {
    pub fn new(id: impl Into<String>, element_type: ElementType, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            element_type,
            x,
            y,
            width: None,
            height: None,
            points: None,
            stroke_color: None,
            background_color: None,
            stroke_width: None,
            fill_style: None,
            font_size: None,
            text: None,
            container_id: None,
            bound_elements: None,
            start: None,
            end: None,
            created_at: None,
            updated_at: None,
            sync_source: None,
            version: None,
            extra: Map::new(),
        }
    }

    /// Generate a fresh element id.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_points(mut self, points: Vec<[f64; 2]>) -> Self {
        self.points = Some(points);
        self
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    pub fn with_endpoints(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start = start.map(ArrowEndpoint::new);
        self.end = end.map(ArrowEndpoint::new);
        self
    }

    /// Parse an element from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| SyncError::Validation(e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Fill unset style attributes with their documented defaults.
    pub fn apply_defaults(&mut self) {
        self.stroke_color
            .get_or_insert_with(|| DEFAULT_STROKE_COLOR.to_string());
        self.background_color
            .get_or_insert_with(|| DEFAULT_BACKGROUND_COLOR.to_string());
        self.stroke_width.get_or_insert(DEFAULT_STROKE_WIDTH);
        self.fill_style
            .get_or_insert_with(|| DEFAULT_FILL_STYLE.to_string());
        if self.element_type == ElementType::Text {
            self.font_size.get_or_insert(DEFAULT_FONT_SIZE);
        }
    }

    /// Stamp creation bookkeeping. Existing `createdAt` is kept.
    pub fn stamp_created(&mut self, source: SyncSource) {
        let now = Utc::now();
        self.created_at.get_or_insert(now);
        self.updated_at = Some(now);
        self.sync_source = Some(source);
        self.version = Some(1);
    }

    /// Stamp update bookkeeping and bump the version.
    pub fn stamp_updated(&mut self, source: SyncSource) {
        self.updated_at = Some(Utc::now());
        self.sync_source = Some(source);
        self.version = Some(self.version.unwrap_or(0) + 1);
    }

    pub fn strip_bookkeeping(&mut self) {
        self.created_at = None;
        self.updated_at = None;
        self.sync_source = None;
        self.version = None;
        for key in BOOKKEEPING_KEYS {
            self.extra.remove(key);
        }
    }

    /// Entries of `boundElements`, empty if absent or malformed.
    pub fn bound_entries(&self) -> &[BoundElement] {
        self.bound_elements
            .as_ref()
            .map(BoundElements::entries)
            .unwrap_or(&[])
    }

    /// Whether this element carries any weak reference at all.
    pub fn has_bindings(&self) -> bool {
        self.container_id.is_some()
            || self.bound_elements.is_some()
            || self.start.is_some()
            || self.end.is_some()
    }

    /// Ids of every element this one references.
    pub fn referenced_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.bound_entries().iter().map(|b| b.id.as_str()).collect();
        if let Some(container) = &self.container_id {
            ids.push(container);
        }
        if let Some(start) = &self.start {
            ids.push(&start.id);
        }
        if let Some(end) = &self.end {
            ids.push(&end.id);
        }
        ids
    }

    /// Apply a partial update. Keys in `patch` overwrite, `null` removes,
    /// `id` and `type` can't change.
    pub fn merge_patch(&self, patch: &Map<String, Value>) -> Result<Element> {
        let mut current = match self.to_value()? {
            Value::Object(map) => map,
            _ => return Err(SyncError::Validation("element is not an object".into())),
        };
        for (key, value) in patch {
            if key == "id" || key == "type" {
                continue;
            }
            if value.is_null() {
                current.remove(key);
            } else {
                current.insert(key.clone(), value.clone());
            }
        }
        Element::from_value(Value::Object(current))
    }
}
