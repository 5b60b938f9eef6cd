use thiserror::Error;

use sketch_sync_core::error::SyncError;

use crate::action::ActionKind;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{action}: missing required field `{field}`")]
    MissingField {
        action: ActionKind,
        field: &'static str,
    },

    #[error("Invalid action: {0}")]
    Validation(String),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] SyncError),
}

impl ActionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::MissingField { .. } | ActionError::Validation(_) => "validation",
            ActionError::NotFound(_) => "not_found",
            ActionError::Upstream(_) => "upstream",
            ActionError::Store(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;
