//! Axum route handlers for the minion server.
//!
//! # Routes
//!
//! - `GET  /health`    — `{"status": "ok", "version": "0.4.0", "minion": "<id>"}`
//! - `GET  /functions` — `{"functions": [FunctionInfo, ...]}`
//! - `POST /run`       — `InvocationRequest` in, `InvocationResponse` out
//!
//! A failed invocation is still a `200`: the failure travels inside the
//! response's `result`. Non-2xx statuses mean the request never reached
//! the registry (bad token, malformed body, crashed worker).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::dispatch::request::{InvocationRequest, InvocationResponse, MinionId};
use crate::dispatch::Dispatcher;

/// Header carrying the shared secret when the minion has a token configured.
pub const TOKEN_HEADER: &str = "x-modcall-token";

type ApiError = (StatusCode, Json<Value>);

/// Shared application state for the minion server.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub minion_id: MinionId,
    /// Required value of [`TOKEN_HEADER`]; `None` disables the check.
    pub token: Option<String>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, minion_id: MinionId) -> Self {
        Self {
            dispatcher,
            minion_id,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.token else {
            return Ok(());
        };
        let given = headers.get(TOKEN_HEADER).map(|v| v.as_bytes());
        if given.is_some_and(|given| token_matches(given, expected)) {
            return Ok(());
        }
        tracing::warn!(minion = %self.minion_id, "rejected request without a valid token");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": format!("missing or invalid {} header", TOKEN_HEADER),
            })),
        ))
    }
}

/// Compare a presented token against the configured one in constant time.
fn token_matches(given: &[u8], expected: &str) -> bool {
    given.ct_eq(expected.as_bytes()).into()
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/functions", get(functions_handler))
        .route("/run", post(run_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health — liveness check.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "minion": state.minion_id,
    }))
}

/// GET /functions — what this minion can run.
async fn functions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state.authorize(&headers)?;
    Ok(Json(json!({
        "functions": state.dispatcher.registry().describe(),
    })))
}

/// POST /run — execute one request against the local registry.
///
/// Handlers block (they wait on child processes), so the call runs on the
/// blocking pool.
async fn run_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InvocationRequest>,
) -> Result<Json<InvocationResponse>, ApiError> {
    state.authorize(&headers)?;

    let jid = request.jid.clone();
    tracing::info!(jid = %jid, fun = %request.fun, "run requested");

    let dispatcher = Arc::clone(&state.dispatcher);
    let result = tokio::task::spawn_blocking(move || dispatcher.invoke_local(&request))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("worker failed: {}", e)})),
            )
        })?;

    Ok(Json(InvocationResponse::new(jid, state.minion_id.clone(), result)))
}
