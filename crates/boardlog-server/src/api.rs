//! REST endpoints: catch-up, appends from non-socket clients and templates.

use crate::state::{AppState, StateError};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boardlog_core::action::{Action, now_millis};
use boardlog_core::log::LogError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Sender id used for appends that do not come from a socket.
const API_SENDER: &str = "api";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Outcome {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Outcome {
    fn ok(sequence: Option<u64>) -> Response {
        Json(Self {
            success: true,
            sequence,
            error: None,
        })
        .into_response()
    }

    fn failed(status: StatusCode, error: impl Into<String>) -> Response {
        let body = Self {
            success: false,
            sequence: None,
            error: Some(error.into()),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(error: &StateError) -> StatusCode {
    match error {
        StateError::Log(LogError::Invalid(_)) => StatusCode::BAD_REQUEST,
        StateError::Log(_) => StatusCode::SERVICE_UNAVAILABLE,
        StateError::MissingTemplateName | StateError::NothingToSave(_) => StatusCode::BAD_REQUEST,
        StateError::Worker(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn failure(error: StateError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!("Request failed: {}", error);
    }
    Outcome::failed(status, error.to_string())
}

/// Health check
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.session_count(),
    }))
}

/// Full ordered log, for catch-up.
pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.actions(&session_id).await {
        Ok(actions) => Json(actions).into_response(),
        Err(e) => failure(e),
    }
}

pub async fn append_action(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Result<Json<Action>, JsonRejection>,
) -> Response {
    let Json(mut action) = match body {
        Ok(body) => body,
        Err(rejection) => return Outcome::failed(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if action.created_at == 0 {
        action.created_at = now_millis();
    }
    match state.append(&session_id, API_SENDER, action).await {
        Ok(sequence) => Outcome::ok(Some(sequence)),
        Err(e) => failure(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

pub async fn save_template(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Result<Json<SaveTemplateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return Outcome::failed(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state
        .save_template(&session_id, &request.name, request.description, request.is_public)
        .await
    {
        Ok(_) => Outcome::ok(None),
        Err(e) => failure(e),
    }
}

/// End a session (the room or meeting is over).
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    if state.end_session(&session_id) {
        Outcome::ok(None)
    } else {
        Outcome::failed(StatusCode::NOT_FOUND, format!("Unknown session {}", session_id))
    }
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(state.templates(&session_id))
}

#[cfg(test)]
mod tests {
    use crate::app;
    use crate::config::ServerConfig;
    use crate::state::AppState;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn call(state: &Arc<AppState>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(ServerConfig::default()))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&state(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_append_then_list() {
        let state = state();
        let action = json!({
            "actionKind": "shape",
            "payload": { "variant": "rectangle", "start": { "x": 0.0, "y": 0.0 }, "end": { "x": 5.0, "y": 5.0 } },
            "authorId": "bot"
        });
        let (status, body) = call(&state, "POST", "/session/room/actions", Some(action)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "sequence": 1 }));

        let (status, body) = call(&state, "POST", "/session/room/actions", Some(json!({ "actionKind": "clear" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sequence"], 2);

        let (status, body) = call(&state, "GET", "/session/room/actions", None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["sequence"], 1);
        assert_eq!(entries[0]["actionKind"], "shape");
        assert_eq!(entries[1]["actionKind"], "clear");
    }

    #[tokio::test]
    async fn test_unknown_session_has_empty_log() {
        let (status, body) = call(&state(), "GET", "/session/nobody/actions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_malformed_action_rejected() {
        let state = state();
        let (status, body) = call(&state, "POST", "/session/room/actions", Some(json!({ "actionKind": "sparkle" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());

        let empty_text = json!({ "actionKind": "text", "payload": { "content": "", "anchor": { "x": 0.0, "y": 0.0 } } });
        let (status, _) = call(&state, "POST", "/session/room/actions", Some(empty_text)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_and_list_templates() {
        let state = state();
        let text = json!({ "actionKind": "text", "payload": { "content": "agenda", "anchor": { "x": 1.0, "y": 1.0 } } });
        call(&state, "POST", "/session/room/actions", Some(text)).await;

        let (status, body) = call(
            &state,
            "POST",
            "/session/room/save-template",
            Some(json!({ "name": "Standup", "isPublic": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (_, body) = call(&state, "GET", "/session/room/templates", None).await;
        let templates = body.as_array().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0]["name"], "Standup");
        assert_eq!(templates[0]["isPublic"], true);
        assert_eq!(templates[0]["actions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_session() {
        let state = state();
        call(&state, "POST", "/session/room/actions", Some(json!({ "actionKind": "clear" }))).await;

        let (status, body) = call(&state, "DELETE", "/session/room", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, body) = call(&state, "DELETE", "/session/room", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_save_template_requires_name() {
        let (status, body) = call(
            &state(),
            "POST",
            "/session/room/save-template",
            Some(json!({ "name": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
