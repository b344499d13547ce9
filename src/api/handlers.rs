//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ActionResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse, InputRequest,
    KeyRequest, SendRequest, SuccessResponse,
};
use super::AppState;
use crate::runtime::{SessionError, WidgetSnapshot};
use crate::state_machine::Event;
use serde::de::DeserializeOwned;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const MAX_STORAGE_KEY_LEN: usize = 128;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        // Widget actions
        .route("/api/sessions/:id/toggle", post(toggle))
        .route("/api/sessions/:id/input", post(set_input))
        .route("/api/sessions/:id/key", post(press_key))
        .route("/api/sessions/:id/send", post(send_message))
        .route("/api/sessions/:id/clear", post(request_clear))
        .route("/api/sessions/:id/clear/confirm", post(confirm_clear))
        .route("/api/sessions/:id/clear/cancel", post(cancel_clear))
        .route("/api/sessions/:id/dismiss-error", post(dismiss_error))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Session Lifecycle
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let req: CreateSessionRequest = optional_json(&body)?;
    let storage_key = req
        .storage_key
        .as_deref()
        .map(validate_storage_key)
        .transpose()?;

    let (session_id, snapshot) = state.sessions.open(storage_key).await;

    Ok(Json(CreateSessionResponse {
        session_id,
        snapshot,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WidgetSnapshot>, AppError> {
    let snapshot = state.sessions.snapshot(&id).await?;
    Ok(Json(snapshot))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.sessions.close(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (snapshot, broadcast_rx) = state.sessions.subscribe(&id).await?;
    Ok(sse_stream(snapshot, broadcast_rx))
}

/// Decode a body that may be left out entirely
///
/// An empty body means defaults. Anything else has to be valid JSON of the
/// right shape.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))
}

fn validate_storage_key(key: &str) -> Result<String, AppError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(AppError::BadRequest("Storage key must not be empty".to_string()));
    }
    if key.len() > MAX_STORAGE_KEY_LEN {
        return Err(AppError::BadRequest(format!(
            "Storage key exceeds {MAX_STORAGE_KEY_LEN} bytes"
        )));
    }
    Ok(key.to_string())
}

// ============================================================
// Widget Actions
// ============================================================

async fn dispatch(state: &AppState, id: &str, event: Event) -> Result<Json<ActionResponse>, AppError> {
    state.sessions.send_event(id, event).await?;
    Ok(Json(ActionResponse { queued: true }))
}

async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::Toggle).await
}

async fn set_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InputRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::InputChanged { text: req.text }).await
}

async fn press_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<KeyRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::KeyPressed { key: req.key }).await
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, AppError> {
    let req: SendRequest = optional_json(&body)?;
    let event = match req.text {
        Some(text) => Event::UserMessage { text },
        None => Event::Submit,
    };
    dispatch(&state, &id, event).await
}

async fn request_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::ClearRequested).await
}

async fn confirm_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::ClearConfirmed).await
}

async fn cancel_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::ClearCancelled).await
}

async fn dismiss_error(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    dispatch(&state, &id, Event::DismissError).await
}

async fn get_version() -> &'static str {
    concat!("portfolio-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        // A closed session is indistinguishable from one that never existed
        AppError::NotFound(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
