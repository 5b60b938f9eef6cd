//! HTTP handlers. Every mutation goes through [`SyncGateway`](crate::sync::SyncGateway).

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use sketch_sync_actions::{ActionError, RawAction};
use sketch_sync_core::element::{Element, SyncSource};
use sketch_sync_core::error::SyncError;
use sketch_sync_core::protocol::Viewport;

use crate::state::GatewayState;

/// Error body: `{success: false, error}` with a status derived from the kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn from_kind(kind: &str, message: String) -> Self {
        let status = match kind {
            "validation" | "json" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "upstream" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        #[cfg(feature = "metrics")]
        crate::metrics::record_error(kind);
        Self::new(status, message)
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        Self::from_kind(e.kind(), e.to_string())
    }
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        Self::from_kind(e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(json!({"success": false, "error": self.message})),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

pub async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub().connection_count().await,
        "elements": state.sync.element_count().await,
    }))
}

pub async fn list_elements(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let elements = state.sync.snapshot().await;
    Json(json!({"success": true, "count": elements.len(), "elements": elements}))
}

pub async fn get_element(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let element = state
        .sync
        .get(&id)
        .await
        .ok_or_else(|| SyncError::NotFound(id))?;
    Ok(Json(json!({"success": true, "element": element})))
}

pub async fn create_element(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    let Value::Object(mut obj) = body else {
        return Err(SyncError::Validation("element must be a JSON object".into()).into());
    };
    if !obj.get("id").is_some_and(Value::is_string) {
        obj.insert("id".into(), Value::String(Element::generate_id()));
    }
    let element = Element::from_value(Value::Object(obj))?;
    let stored = state.sync.create_element(element, SyncSource::Api).await?;
    Ok(Json(json!({"success": true, "element": stored})))
}

pub async fn update_element(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(patch): Json<Map<String, Value>>,
) -> ApiResult {
    let stored = state
        .sync
        .update_element(&id, &patch, SyncSource::Api)
        .await?;
    Ok(Json(json!({"success": true, "element": stored})))
}

pub async fn delete_element(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> ApiResult {
    if !state.sync.delete_element(&id).await? {
        return Err(SyncError::NotFound(id).into());
    }
    Ok(Json(json!({"success": true, "message": format!("Element {id} deleted")})))
}

pub async fn clear_elements(State(state): State<Arc<GatewayState>>) -> ApiResult {
    state.sync.clear().await?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct SyncBody {
    pub elements: Vec<Value>,
}

pub async fn sync_elements(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<SyncBody>,
) -> ApiResult {
    let elements = body
        .elements
        .into_iter()
        .map(Element::from_value)
        .collect::<Result<Vec<_>, _>>()?;
    let count = state.sync.sync_all(elements).await?;
    Ok(Json(json!({"success": true, "count": count})))
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub actions: Vec<RawAction>,
    #[serde(default)]
    pub explanation: String,
}

pub async fn apply_batch(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<BatchBody>,
) -> ApiResult {
    let summary = state
        .sync
        .apply_actions(&body.actions, &body.explanation, SyncSource::Api)
        .await?;
    Ok(Json(json!({
        "success": summary.failed.is_empty(),
        "count": summary.succeeded(),
        "summary": summary,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AiBody {
    pub prompt: String,
    #[serde(default)]
    pub image: Option<String>,
}

pub async fn ai_actions(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<AiBody>,
) -> ApiResult {
    if body.prompt.trim().is_empty() {
        return Err(ActionError::Validation("prompt is required".into()).into());
    }
    let outcome = state.sync.run_ai(body.prompt, body.image).await?;
    Ok(Json(json!({
        "success": true,
        "explanation": outcome.explanation,
        "count": outcome.summary.succeeded(),
        "summary": outcome.summary,
    })))
}

pub async fn set_viewport(
    State(state): State<Arc<GatewayState>>,
    Json(viewport): Json<Viewport>,
) -> ApiResult {
    if !(viewport.zoom.is_finite() && viewport.zoom > 0.0) {
        return Err(SyncError::Validation("zoom must be a positive number".into()).into());
    }
    let sent = state.sync.set_viewport(viewport).await;
    Ok(Json(json!({"success": true, "sent": sent})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MermaidBody {
    pub mermaid_diagram: String,
}

pub async fn from_mermaid(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<MermaidBody>,
) -> ApiResult {
    if body.mermaid_diagram.trim().is_empty() {
        return Err(SyncError::Validation("mermaidDiagram is required".into()).into());
    }
    let sent = state.sync.mermaid_convert(body.mermaid_diagram).await;
    Ok(Json(json!({"success": true, "sent": sent})))
}

#[cfg(feature = "metrics")]
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(SyncError::Validation("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SyncError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ActionError::Upstream("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(SyncError::Store("disk full".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
