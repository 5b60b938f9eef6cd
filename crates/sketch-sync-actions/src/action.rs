//! Semantic actions and their boundary validation.
//!
//! Actions arrive as loosely shaped `{action, element}` objects. Each one is
//! validated into a typed [`Action`] before the translator touches the store;
//! a bad action becomes an [`ActionError`] and the rest of the batch goes on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sketch_sync_core::element::{Element, ElementType};

use crate::error::{ActionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    AddShape,
    AddText,
    AddArrow,
    UpdateElement,
    DeleteElement,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddShape => "addShape",
            Self::AddText => "addText",
            Self::AddArrow => "addArrow",
            Self::UpdateElement => "updateElement",
            Self::DeleteElement => "deleteElement",
        }
    }

    /// Fields that must be present in `element` for this kind.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::AddShape => &["type", "x", "y", "width", "height"],
            Self::AddText => &["type", "x", "y", "text", "fontSize", "width", "height"],
            Self::AddArrow => &["type", "x", "y", "points"],
            Self::UpdateElement | Self::DeleteElement => &["id"],
        }
    }

    fn accepts(self, element_type: ElementType) -> bool {
        match self {
            Self::AddShape => element_type.is_shape(),
            Self::AddText => element_type == ElementType::Text,
            Self::AddArrow => matches!(element_type, ElementType::Arrow | ElementType::Line),
            Self::UpdateElement | Self::DeleteElement => true,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "addShape" => Ok(Self::AddShape),
            "addText" => Ok(Self::AddText),
            "addArrow" => Ok(Self::AddArrow),
            "updateElement" => Ok(Self::UpdateElement),
            "deleteElement" => Ok(Self::DeleteElement),
            other => Err(ActionError::Validation(format!("unknown action `{other}`"))),
        }
    }
}

/// An action exactly as received from the action source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAction {
    pub action: String,
    #[serde(default)]
    pub element: Value,
}

impl RawAction {
    pub fn new(action: impl Into<String>, element: Value) -> Self {
        Self {
            action: action.into(),
            element,
        }
    }
}

/// A validated action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddShape(Element),
    AddText(Element),
    AddArrow(Element),
    UpdateElement {
        id: String,
        patch: Map<String, Value>,
    },
    DeleteElement {
        id: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::AddShape(_) => ActionKind::AddShape,
            Action::AddText(_) => ActionKind::AddText,
            Action::AddArrow(_) => ActionKind::AddArrow,
            Action::UpdateElement { .. } => ActionKind::UpdateElement,
            Action::DeleteElement { .. } => ActionKind::DeleteElement,
        }
    }

    /// Validate a raw action. Add actions get a fresh id when none was given.
    pub fn parse(raw: &RawAction) -> Result<Action> {
        let kind: ActionKind = raw.action.parse()?;
        let Value::Object(fields) = &raw.element else {
            return Err(ActionError::Validation(format!(
                "{kind}: `element` must be an object"
            )));
        };

        for &field in kind.required_fields() {
            if fields.get(field).is_none_or(Value::is_null) {
                return Err(ActionError::MissingField {
                    action: kind,
                    field,
                });
            }
        }

        match kind {
            ActionKind::AddShape | ActionKind::AddText | ActionKind::AddArrow => {
                let element = parse_new_element(kind, fields.clone())?;
                Ok(match kind {
                    ActionKind::AddShape => Action::AddShape(element),
                    ActionKind::AddText => Action::AddText(element),
                    _ => Action::AddArrow(element),
                })
            }
            ActionKind::UpdateElement => {
                let id = require_id(kind, fields)?;
                let mut patch = fields.clone();
                patch.remove("id");
                Ok(Action::UpdateElement { id, patch })
            }
            ActionKind::DeleteElement => Ok(Action::DeleteElement {
                id: require_id(kind, fields)?,
            }),
        }
    }
}

fn require_id(kind: ActionKind, fields: &Map<String, Value>) -> Result<String> {
    match fields.get("id").and_then(Value::as_str).map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ActionError::Validation(format!(
            "{kind}: `id` must be a non-empty string"
        ))),
    }
}

fn parse_new_element(kind: ActionKind, mut fields: Map<String, Value>) -> Result<Element> {
    let has_id = fields
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        fields.insert("id".into(), Value::String(Element::generate_id()));
    }

    let element = Element::from_value(Value::Object(fields))
        .map_err(|e| ActionError::Validation(format!("{kind}: {e}")))?;

    if !kind.accepts(element.element_type) {
        return Err(ActionError::Validation(format!(
            "{kind} does not accept element type `{}`",
            element.element_type.as_str()
        )));
    }
    if kind == ActionKind::AddArrow && element.points.as_ref().is_some_and(|p| p.len() < 2) {
        return Err(ActionError::Validation(format!(
            "{kind}: `points` needs at least two entries"
        )));
    }
    Ok(element)
}
