//! HTTP transport.
//!
//! `POST /chat` and `POST /api/chat` run one pipeline turn for a user's
//! session. The body of a 200 is always the pipeline response object
//! itself. A run that dies unexpectedly becomes
//! `500 {"detail": "Agent error: ..."}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::models::{RunConfig, RunRequest, TurnContext};
use crate::pipeline::Orchestrator;
use crate::session::{DEFAULT_USER, SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
    pub run_defaults: RunConfig,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Orchestrator, sessions: SessionStore, run_defaults: RunConfig) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(sessions),
            run_defaults,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub last_query: Option<String>,
    #[serde(default)]
    pub last_sql: Option<String>,
    #[serde(default)]
    pub last_result_summary: Option<String>,
    #[serde(default)]
    pub db_dialect: Option<String>,
    #[serde(default)]
    pub max_rows: Option<usize>,
    #[serde(default)]
    pub max_eval_retries: Option<u32>,
    #[serde(default)]
    pub max_debug_retries: Option<u32>,
}

impl ChatRequest {
    #[must_use]
    pub fn user(&self) -> &str {
        self.user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .unwrap_or(DEFAULT_USER)
    }

    /// Context fields sent with the request; blanks are filled from the
    /// session thread later.
    #[must_use]
    pub fn context(&self) -> TurnContext {
        TurnContext {
            last_query: self.last_query.clone().unwrap_or_default(),
            last_sql: self.last_sql.clone().unwrap_or_default(),
            last_result_summary: self.last_result_summary.clone().unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn run_config(&self, defaults: &RunConfig) -> RunConfig {
        RunConfig {
            db_dialect: self
                .db_dialect
                .clone()
                .unwrap_or_else(|| defaults.db_dialect.clone()),
            max_rows: self.max_rows.unwrap_or(defaults.max_rows),
            max_eval_retries: self.max_eval_retries.unwrap_or(defaults.max_eval_retries),
            max_debug_retries: self.max_debug_retries.unwrap_or(defaults.max_debug_retries),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/sessions/:user", delete(end_session))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn end_session(State(state): State<AppState>, Path(user): Path<String>) -> StatusCode {
    let existed = state.sessions.remove(&user);
    info!(%user, existed, "session ended");
    StatusCode::NO_CONTENT
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.message.trim().is_empty() {
        return unprocessable("message must not be empty");
    }
    let config = request.run_config(&state.run_defaults);
    if let Err(detail) = config.validate() {
        return unprocessable(&detail);
    }

    let user = request.user().to_string();
    info!(%user, "chat request");
    let thread = state.sessions.thread(&user);
    let orchestrator = Arc::clone(&state.orchestrator);

    let task = tokio::spawn(async move {
        let mut thread = thread.lock_owned().await;
        let context = request.context().or_else(&thread.context());
        let response = orchestrator
            .run(RunRequest {
                user_message: request.message.clone(),
                context,
                config,
            })
            .await;
        thread.record(&request.message, &response);
        response
    });

    match task.await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(join_error) => {
            error!(%user, error = %join_error, "pipeline task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": format!("Agent error: {join_error}")})),
            )
                .into_response()
        }
    }
}

fn unprocessable(detail: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({"detail": detail})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ChatRequest;
    use crate::models::RunConfig;

    #[test]
    fn omitted_fields_take_defaults() {
        let request: ChatRequest =
            serde_json::from_value(json!({"message": "hi"})).expect("minimal body parses");
        assert_eq!(request.user(), "default");
        assert_eq!(request.run_config(&RunConfig::default()), RunConfig::default());
        assert_eq!(request.context().last_sql, "");
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let request: ChatRequest = serde_json::from_value(json!({
            "message": "sales by week",
            "user": "alice",
            "max_rows": 50,
            "max_debug_retries": 0
        }))
        .expect("full body parses");
        let config = request.run_config(&RunConfig::default());
        assert_eq!(request.user(), "alice");
        assert_eq!(config.max_rows, 50);
        assert_eq!(config.max_debug_retries, 0);
        assert_eq!(config.max_eval_retries, 3);
    }
}
