//! AI action sources.
//!
//! An action source turns "current canvas + instruction" into an
//! [`ActionPlan`]. How it gets there (prompting, model choice) is its own
//! business; this side only checks the shape of what comes back.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use sketch_sync_core::config::AgentConfig;
use sketch_sync_core::element::Element;

use crate::action::RawAction;
use crate::error::{ActionError, Result};

/// What the source is asked to plan against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

/// Actions proposed by the source plus a human-readable explanation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(default)]
    pub explanation: String,
    pub actions: Vec<RawAction>,
}

#[async_trait]
pub trait ActionSource: Send + Sync {
    /// Source identifier, used in logs.
    fn id(&self) -> &str;

    async fn propose(&self, request: &ProposeRequest) -> Result<ActionPlan>;
}

/// Validate the outer shape of a plan. Individual actions are validated
/// later, one by one.
pub fn parse_plan(value: Value) -> Result<ActionPlan> {
    let Value::Object(mut obj) = value else {
        return Err(ActionError::Upstream("response is not a JSON object".into()));
    };

    if obj.get("success").and_then(Value::as_bool) == Some(false) {
        let message = obj
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("action source reported failure");
        return Err(ActionError::Upstream(message.to_string()));
    }

    let explanation = match obj.remove("explanation") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(_) => return Err(ActionError::Upstream("`explanation` must be a string".into())),
    };

    let Some(Value::Array(items)) = obj.remove("actions") else {
        return Err(ActionError::Upstream("`actions` must be an array".into()));
    };

    let mut actions = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let action: RawAction = serde_json::from_value(item)
            .map_err(|e| ActionError::Upstream(format!("action {i} is malformed: {e}")))?;
        actions.push(action);
    }

    Ok(ActionPlan {
        explanation,
        actions,
    })
}

/// Parse a plan from text, tolerating a surrounding markdown code fence.
pub fn parse_plan_text(text: &str) -> Result<ActionPlan> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| ActionError::Upstream(format!("invalid JSON from action source: {e}")))?;
    parse_plan(value)
}

/// Action source that POSTs the request to an HTTP endpoint.
pub struct HttpActionSource {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpActionSource {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ActionError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            config.resolve_api_key(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ActionSource for HttpActionSource {
    fn id(&self) -> &str {
        &self.endpoint
    }

    async fn propose(&self, request: &ProposeRequest) -> Result<ActionPlan> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ActionError::Upstream(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ActionError::Upstream(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ActionError::Upstream(format!("action source returned {status}")));
        }

        let plan = parse_plan_text(&body)?;
        debug!(
            endpoint = %self.endpoint,
            actions = plan.actions.len(),
            "Received action plan"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plan() {
        let plan = parse_plan(json!({
            "success": true,
            "explanation": "Drew a box",
            "actions": [{"action": "addShape", "element": {"type": "rectangle"}}],
        }))
        .unwrap();
        assert_eq!(plan.explanation, "Drew a box");
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].action, "addShape");
    }

    #[test]
    fn test_parse_plan_wrong_shape() {
        assert!(matches!(parse_plan(json!([1, 2])), Err(ActionError::Upstream(_))));
        assert!(matches!(
            parse_plan(json!({"explanation": "x", "actions": "nope"})),
            Err(ActionError::Upstream(_))
        ));
        assert!(matches!(
            parse_plan(json!({"actions": [{"element": {}}]})),
            Err(ActionError::Upstream(_))
        ));
        assert!(matches!(
            parse_plan(json!({"success": false, "error": "model overloaded"})),
            Err(ActionError::Upstream(msg)) if msg == "model overloaded"
        ));
    }

    #[test]
    fn test_parse_plan_text_strips_fence() {
        let text = "```json\n{\"explanation\": \"ok\", \"actions\": []}\n```";
        let plan = parse_plan_text(text).unwrap();
        assert_eq!(plan.explanation, "ok");
        assert!(plan.actions.is_empty());

        assert!(parse_plan_text("I drew a box for you!").is_err());
    }

    #[tokio::test]
    async fn test_http_source_round_trip() {
        use axum::{Json, Router, routing::post};

        let app = Router::new().route(
            "/plan",
            post(|Json(req): Json<ProposeRequest>| async move {
                Json(json!({
                    "explanation": format!("planned for: {}", req.prompt),
                    "actions": [{
                        "action": "addShape",
                        "element": {"type": "ellipse", "x": 0, "y": 0, "width": 10, "height": 10},
                    }],
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let source = HttpActionSource::new(
            format!("http://{addr}/plan"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let plan = source
            .propose(&ProposeRequest {
                prompt: "draw a circle".into(),
                image: None,
                elements: vec![],
            })
            .await
            .unwrap();
        assert_eq!(plan.explanation, "planned for: draw a circle");
        assert_eq!(plan.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        use axum::{Router, http::StatusCode, routing::post};

        let app = Router::new().route("/plan", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let source =
            HttpActionSource::new(format!("http://{addr}/plan"), None, Duration::from_secs(5)).unwrap();
        let err = source
            .propose(&ProposeRequest {
                prompt: "x".into(),
                image: None,
                elements: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream");
    }
}
