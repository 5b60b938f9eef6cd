//! WebSocket wire protocol.
//!
//! Every frame is a JSON object tagged by `type`:
//! `{ type, element?, elements?, elementId?, count?, timestamp? }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::element::Element;

/// Viewport a client should scroll/zoom to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
}

fn default_zoom() -> f64 {
    1.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// A sync wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Full snapshot, sent once when a channel joins.
    InitialElements {
        elements: Vec<Element>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    ElementCreated {
        element: Element,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    ElementUpdated {
        element: Element,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    ElementDeleted {
        #[serde(rename = "elementId")]
        element_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Elements created or touched by one batch, upserted together.
    ElementsBatchCreated {
        elements: Vec<Element>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Full replacement of the scene.
    ElementsSynced {
        #[serde(default)]
        elements: Vec<Element>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Client request (no fields) or server reply (count + timestamp).
    SyncStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    CanvasCleared {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    ExportImageRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default = "default_export_format")]
        format: String,
    },
    SetViewport {
        viewport: Viewport,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    MermaidConvert {
        #[serde(rename = "mermaidDiagram")]
        mermaid_diagram: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

fn default_export_format() -> String {
    "png".into()
}

impl SyncMessage {
    pub fn initial(elements: Vec<Element>) -> Self {
        Self::InitialElements {
            elements,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn created(element: Element) -> Self {
        Self::ElementCreated {
            element,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn updated(element: Element) -> Self {
        Self::ElementUpdated {
            element,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn deleted(element_id: impl Into<String>) -> Self {
        Self::ElementDeleted {
            element_id: element_id.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn batch_created(elements: Vec<Element>) -> Self {
        Self::ElementsBatchCreated {
            count: Some(elements.len()),
            elements,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn synced(elements: Vec<Element>) -> Self {
        Self::ElementsSynced {
            count: Some(elements.len()),
            elements,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn sync_status(count: usize) -> Self {
        Self::SyncStatus {
            count: Some(count),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn cleared() -> Self {
        Self::CanvasCleared {
            timestamp: Some(Utc::now()),
        }
    }

    /// Wire name of this frame's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialElements { .. } => "initial_elements",
            Self::ElementCreated { .. } => "element_created",
            Self::ElementUpdated { .. } => "element_updated",
            Self::ElementDeleted { .. } => "element_deleted",
            Self::ElementsBatchCreated { .. } => "elements_batch_created",
            Self::ElementsSynced { .. } => "elements_synced",
            Self::SyncStatus { .. } => "sync_status",
            Self::CanvasCleared { .. } => "canvas_cleared",
            Self::ExportImageRequest { .. } => "export_image_request",
            Self::SetViewport { .. } => "set_viewport",
            Self::MermaidConvert { .. } => "mermaid_convert",
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
