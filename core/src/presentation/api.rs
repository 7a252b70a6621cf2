// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface: the `/mcp` streamable RPC entrypoint, OAuth discovery, and
//! the ambient `/healthz`/`/metrics` probes.
//!
//! **No business logic lives here** — all real work is delegated to
//! application services in `crate::application`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::application::task_service::TaskService;
use crate::domain::task::{TaskOrigin, DEFAULT_TIMEOUT_MS};
use crate::infrastructure::event_bus::EventBus;
use crate::presentation::session_transport::{parse_session_id, SessionMap};

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct ApiState {
    pub task_service: Arc<TaskService>,
    pub sessions: Arc<SessionMap>,
    pub events: Arc<EventBus>,
    pub oauth_enabled: bool,
    pub metrics_handle: PrometheusHandle,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post).get(handle_mcp_get).delete(handle_mcp_delete))
        .route("/.well-known/oauth-protected-resource", get(oauth_protected_resource))
        .route("/.well-known/oauth-authorization-server", get(oauth_authorization_server))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct McpQuery {
    #[serde(rename = "workspaceId")]
    pub workspace_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunCodeParams {
    code: String,
    #[serde(rename = "timeoutMs")]
    timeout_ms: Option<u64>,
    #[serde(rename = "runtimeId")]
    runtime_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(rename = "waitForResult", default = "default_true")]
    wait_for_result: bool,
    #[serde(rename = "resultTimeoutMs")]
    result_timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_result_timeout_ms(timeout_ms: u64) -> u64 {
    (timeout_ms + 30_000).max(120_000)
}

async fn handle_mcp_post(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<McpQuery>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let session_header = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    let looked_up = match session_header.and_then(parse_session_id) {
        Some(id) => state.sessions.get(id).await,
        None => None,
    };

    // Session header present and resolved → reuse its bound identity and
    // serialize this request against the session's dispatch chain. Absent or
    // unresolved (a miss on a stale/unknown id) → fall back to a fresh,
    // stateless session the way a first contact always does.
    let (handle, origin) = match looked_up {
        Some(handle) => {
            let bound = handle.session.lock().await;
            let origin = TaskOrigin {
                workspace_id: bound.workspace_id.clone(),
                actor_id: bound.actor_id.clone(),
                client_id: bound.client_id.clone(),
            };
            drop(bound);
            (handle, origin)
        }
        None => {
            let workspace_id = query.workspace_id.clone().unwrap_or_else(|| query.session_id.clone().unwrap_or_default());
            let handle = state.sessions.create(workspace_id.clone(), None, query.client_id.clone()).await;
            let origin = TaskOrigin {
                workspace_id,
                actor_id: None,
                client_id: query.client_id.clone(),
            };
            (handle, origin)
        }
    };
    let session_id = handle.session.lock().await.id;

    let params: RunCodeParams = match serde_json::from_value(body.get("params").cloned().unwrap_or(Value::Null)) {
        Ok(p) => p,
        Err(e) => return json_rpc_error(-32602, &format!("invalid params: {e}"), StatusCode::BAD_REQUEST, Some(session_id)),
    };

    let timeout_ms = params.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    let wait_for_result = params.wait_for_result;
    let result_timeout_ms = params.result_timeout_ms;
    let task_service = state.task_service.clone();

    let submission = SessionMap::dispatch(&handle, move || async move {
        task_service.submit(origin, params.code, Some(timeout_ms), params.runtime_id, params.metadata).await
    })
    .await;

    let task = match submission {
        Ok(Ok(task)) => task,
        Ok(Err(typecheck)) => {
            let text = typecheck.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n");
            return success_response(
                json!({ "content": [{"type": "text", "text": text}], "isError": true }),
                session_id,
            );
        }
        Err(e) => return json_rpc_error(-32000, &e.to_string(), StatusCode::INTERNAL_SERVER_ERROR, Some(session_id)),
    };

    let task_service = state.task_service.clone();
    let task_id = task.id;
    tokio::spawn(async move {
        let _ = task_service.execute(task).await;
    });

    if !wait_for_result {
        return success_response(json!({ "content": [], "structuredContent": {"taskId": task_id.to_string(), "status": "queued"} }), session_id);
    }

    let result_timeout_ms = result_timeout_ms.unwrap_or_else(|| default_result_timeout_ms(timeout_ms));
    let final_task = state.task_service.wait_for_terminal(task_id, result_timeout_ms).await;

    match final_task {
        Ok(Some(task)) => success_response(
            json!({
                "content": [{"type": "text", "text": task.stdout}],
                "structuredContent": {
                    "taskId": task.id.to_string(),
                    "status": task.status.to_string(),
                    "exitCode": task.exit_code,
                    "error": task.error,
                },
                "isError": task.status.is_terminal() && task.error.is_some(),
            }),
            session_id,
        ),
        Ok(None) => json_rpc_error(-32000, "task not found", StatusCode::NOT_FOUND, Some(session_id)),
        Err(e) => json_rpc_error(-32000, &e.to_string(), StatusCode::INTERNAL_SERVER_ERROR, Some(session_id)),
    }
}

async fn handle_mcp_get(State(state): State<ApiState>, headers: HeaderMap) -> impl IntoResponse {
    let session_header = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    let Some(session_id) = session_header.and_then(parse_session_id) else {
        return bad_request_missing_session();
    };
    if state.sessions.get(session_id).await.is_none() {
        return json_rpc_error(-32001, "Session not found", StatusCode::NOT_FOUND, None);
    }
    success_response(json!({ "ok": true }), session_id)
}

async fn handle_mcp_delete(State(state): State<ApiState>, headers: HeaderMap) -> impl IntoResponse {
    let session_header = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    let Some(session_id) = session_header.and_then(parse_session_id) else {
        return bad_request_missing_session();
    };
    state.sessions.close(session_id).await;
    (StatusCode::NO_CONTENT, ()).into_response()
}

fn bad_request_missing_session() -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "jsonrpc": "2.0",
            "id": Value::Null,
            "error": { "code": -32000, "message": "Bad Request: Mcp-Session-Id header is required" }
        })),
    )
        .into_response()
}

fn json_rpc_error(code: i32, message: &str, status: StatusCode, session_id: Option<crate::domain::session::SessionId>) -> axum::response::Response {
    let _ = session_id;
    (
        status,
        Json(json!({ "jsonrpc": "2.0", "id": Value::Null, "error": { "code": code, "message": message } })),
    )
        .into_response()
}

fn success_response(structured: Value, session_id: crate::domain::session::SessionId) -> axum::response::Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = session_id.to_string().parse::<axum::http::HeaderValue>() {
        headers.insert(SESSION_HEADER, value);
    }
    (headers, Json(structured)).into_response()
}

async fn oauth_protected_resource(State(state): State<ApiState>) -> impl IntoResponse {
    if !state.oauth_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({ "resource": "codebroker" })).into_response()
}

async fn oauth_authorization_server(State(state): State<ApiState>) -> impl IntoResponse {
    if !state.oauth_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({})).into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
