//! REST-to-command translator
//!
//! Accepts Upstash-style command arrays over HTTP and runs them against a
//! [`KvBackend`]. Each command in a pipeline succeeds or fails on its own;
//! a bad command never aborts the rest of the batch.

use crate::backend::KvBackend;
use crate::command::Command;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one command, serialized as `{"result": ...}` or `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutcome {
    Result { result: Value },
    Error { error: String },
}

impl CommandOutcome {
    pub fn ok(result: Value) -> Self {
        CommandOutcome::Result { result }
    }

    pub fn error(error: impl ToString) -> Self {
        CommandOutcome::Error {
            error: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CommandOutcome::Error { .. })
    }
}

/// Parse and run a single wire command
pub async fn execute_one(backend: &dyn KvBackend, raw: &Value) -> CommandOutcome {
    let command = match Command::from_wire(raw) {
        Ok(command) => command,
        Err(e) => return CommandOutcome::error(e),
    };

    match backend.execute(&command).await {
        Ok(value) => CommandOutcome::ok(value),
        Err(e) => {
            debug!(op = %command.op(), error = %e, "command failed");
            CommandOutcome::error(e)
        }
    }
}

/// Run `commands` in order, one outcome per input position
pub async fn execute_pipeline(backend: &dyn KvBackend, commands: &[Value]) -> Vec<CommandOutcome> {
    let mut outcomes = Vec::with_capacity(commands.len());
    for raw in commands {
        outcomes.push(execute_one(backend, raw).await);
    }
    outcomes
}

#[derive(Clone)]
pub struct ProxyState {
    backend: Arc<dyn KvBackend>,
}

impl ProxyState {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }
}

pub fn router(state: ProxyState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/pipeline", post(pipeline_handler))
        .route("/", post(command_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn pipeline_handler(
    State(state): State<ProxyState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let Some(commands) = body.as_array() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "pipeline body must be an array of commands"})),
        );
    };
    debug!(commands = commands.len(), backend = state.backend.name(), "pipeline");
    let outcomes = execute_pipeline(state.backend.as_ref(), commands).await;
    (StatusCode::OK, Json(json!(outcomes)))
}

async fn command_handler(
    State(state): State<ProxyState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    debug!(commands = 1, backend = state.backend.name(), "command");
    let outcome = execute_one(state.backend.as_ref(), &body).await;
    let status = if outcome.is_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(json!(outcome)))
}

async fn health_handler(State(state): State<ProxyState>) -> impl IntoResponse {
    match state.backend.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "connected"}))),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "disconnected", "error": e.to_string()})),
            )
        }
    }
}
