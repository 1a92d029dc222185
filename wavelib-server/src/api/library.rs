//! Library API handlers
//!
//! GET /library, POST /library, DELETE /library/:id, POST /library/rescan,
//! GET /library/:id.wav

use axum::{
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::library::store::AUDIO_EXTENSION;
use crate::library::Track;
use crate::resolver::VideoId;
use crate::AppState;

/// POST /library request
#[derive(Debug, Deserialize)]
pub struct AddTrackRequest {
    pub url: String,
}

/// Acknowledgement body for mutations without a payload
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// GET /library
pub async fn list_tracks(State(state): State<AppState>) -> Json<Vec<Track>> {
    Json(state.library.list().await)
}

/// POST /library
///
/// Returns the existing track, or the provisional track of the import job
/// started (or already running) for the URL.
pub async fn add_track(
    State(state): State<AppState>,
    Json(request): Json<AddTrackRequest>,
) -> ApiResult<Json<Track>> {
    let track = state.coordinator.import_track(&request.url).await?;
    Ok(Json(track))
}

/// DELETE /library/:id
pub async fn remove_track(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let track = state.library.remove(&id).await?;
    info!(video_id = %track.id, "Track removed");
    Ok(OkResponse::ok())
}

/// POST /library/rescan
pub async fn rescan_library(State(state): State<AppState>) -> ApiResult<Json<OkResponse>> {
    let report = state.library.rescan().await?;
    info!(
        loaded = report.loaded,
        skipped = report.skipped,
        "Library rescanned"
    );
    Ok(OkResponse::ok())
}

/// GET /library/:id.wav
///
/// Serves the audio of a completed track only.
pub async fn serve_audio(
    State(state): State<AppState>,
    Path(file): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let not_found = || ApiError::NotFound(format!("Audio not found: {}", file));

    let id = file
        .strip_suffix(AUDIO_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .and_then(VideoId::parse)
        .ok_or_else(not_found)?;

    match state.library.get(id.as_str()).await {
        Some(track) if !track.downloading => {}
        _ => return Err(not_found()),
    }

    let path = state.library.audio_path(&id);
    let response = ServeFile::new(path)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(response.into_response())
}

/// Build library routes
pub fn library_routes() -> Router<AppState> {
    Router::new()
        .route("/library", get(list_tracks).post(add_track))
        .route("/library/rescan", post(rescan_library))
        .route("/library/:id", get(serve_audio).delete(remove_track))
}
