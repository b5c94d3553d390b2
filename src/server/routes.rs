//! HTTP route handlers for the chat API.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::chat::{MemoryScope, Turn};
use crate::engine::{Device, DeviceState, EngineSnapshot, ModelSize};
use crate::error::ChatError;

use super::state::AppState;

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();
    let body_limit = state.config.max_file_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .route("/api/examples", get(examples))
        .route("/api/chat", post(chat))
        .route("/api/chat/upload", post(chat_upload))
        .route("/api/device", post(change_device))
        .route("/api/model-size", post(change_model_size))
        .route("/api/memory", delete(forget_memory))
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

fn api_error(err: &ChatError) -> ApiError {
    if err.is_client_error() {
        tracing::warn!("Rejected request: {err}");
        (StatusCode::BAD_REQUEST, err.to_string())
    } else {
        tracing::error!("Request failed: {err}");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "smolvlm-chat",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Engine state plus the values the page's selectors offer.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Engine snapshot.
    pub engine: EngineSnapshot,
    /// Device choices.
    pub devices: Vec<&'static str>,
    /// Model size choices.
    pub model_sizes: Vec<&'static str>,
    /// Accepted attachment extensions.
    pub accepted_files: Vec<String>,
    /// Memory sharing mode.
    pub memory_scope: MemoryScope,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        engine: state.service.status(),
        devices: Device::choices(),
        model_sizes: ModelSize::choices(),
        accepted_files: state.service.media_kinds().accepted(),
        memory_scope: state.service.memory().scope(),
    })
}

async fn examples(State(state): State<Arc<AppState>>) -> Json<Vec<Turn>> {
    Json(state.examples())
}

/// Chat request with attachments referenced by path.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Prompt text.
    pub text: String,
    /// Attached file paths.
    #[serde(default)]
    pub files: Vec<String>,
    /// Client session, used when memory is scoped per session.
    pub session_id: Option<String>,
}

/// Chat response.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// The model's reply.
    pub reply: String,
    /// Model that produced it.
    pub model: String,
}

async fn respond(state: &AppState, turn: &Turn, session: Option<&str>) -> Result<Json<ChatResponse>, ApiError> {
    let reply = state
        .service
        .answer(turn, session)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ChatResponse {
        reply,
        model: state.service.status().model_id,
    }))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let mut files = Vec::with_capacity(request.files.len());
    for file in &request.files {
        files.push(state.resolve_attachment(file).await.map_err(|e| api_error(&e))?);
    }

    let turn = Turn {
        text: request.text,
        files,
    };
    respond(&state, &turn, request.session_id.as_deref()).await
}

/// Multipart chat: `text`, optional `session_id`, and any number of `files`.
///
/// Files stored for a request that fails are removed again.
async fn chat_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, ApiError> {
    let mut stored = Vec::new();
    let result = match read_upload(&state, multipart, &mut stored).await {
        Ok((turn, session)) => respond(&state, &turn, session.as_deref()).await,
        Err(err) => Err(err),
    };

    if result.is_err() {
        state.uploads.discard(&stored).await;
    }
    result
}

async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
    stored: &mut Vec<PathBuf>,
) -> Result<(Turn, Option<String>), ApiError> {
    let mut turn = Turn::default();
    let mut session: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => {
                turn.text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid text: {e}")))?;
            }
            "session_id" => {
                session = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid session_id: {e}")))?,
                );
            }
            "files" => {
                let file_name = state.uploads.sanitize(field.file_name().unwrap_or_default());
                if !state.service.media_kinds().accepts(&file_name) {
                    // Classified as an error item; nothing is written.
                    turn.files.push(file_name);
                    continue;
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {e}")))?;
                let path = state
                    .uploads
                    .store(&file_name, &bytes)
                    .await
                    .map_err(|e| api_error(&e))?;
                turn.files.push(path.display().to_string());
                stored.push(path);
            }
            _ => {}
        }
    }

    Ok((turn, session))
}

/// Device change request.
#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    /// Requested device name.
    pub device: String,
}

/// Device selector state after a change.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    /// Selected device.
    pub device: Device,
    /// Device state.
    pub state: DeviceState,
    /// Device choices.
    pub choices: Vec<&'static str>,
    /// Transient warning for the user.
    pub notice: Option<String>,
}

async fn change_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeviceRequest>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device: Device = request.device.parse().map_err(|e| api_error(&e))?;
    let change = state
        .service
        .change_device(device)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(DeviceResponse {
        device: change.device,
        state: change.state,
        choices: Device::choices(),
        notice: change.notice,
    }))
}

/// Model size change request.
#[derive(Debug, Deserialize)]
pub struct ModelSizeRequest {
    /// Requested size key.
    pub size: String,
}

/// Model size selector state after a change.
#[derive(Debug, Serialize)]
pub struct ModelSizeResponse {
    /// Loaded size.
    pub size: ModelSize,
    /// Loaded model identifier.
    pub model_id: String,
    /// Size choices.
    pub choices: Vec<&'static str>,
}

async fn change_model_size(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelSizeRequest>,
) -> Result<Json<ModelSizeResponse>, ApiError> {
    let size: ModelSize = request.size.parse().map_err(|e| api_error(&e))?;
    let snapshot = state
        .service
        .change_model_size(size)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ModelSizeResponse {
        size: snapshot.model_size,
        model_id: snapshot.model_id,
        choices: ModelSize::choices(),
    }))
}

/// Session selector for memory operations.
#[derive(Debug, Deserialize)]
pub struct MemoryQuery {
    /// Client session.
    pub session_id: Option<String>,
}

async fn forget_memory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MemoryQuery>,
) -> impl IntoResponse {
    let forgotten = state.service.forget(query.session_id.as_deref());
    Json(serde_json::json!({ "forgotten": forgotten }))
}
