//! Import progress stream
//!
//! GET /library/:id/progress streams `{type: "progress" | "finish" | "error"}`
//! messages for the running import of `:id`, ending after the terminal one.

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tracing::debug;
use wavelib_common::sse::create_processing_sse_stream;
use wavelib_common::ProcessingEvent;

use crate::AppState;

/// GET /library/:id/progress
///
/// No active job means it already ended or never started; the stream then
/// carries a single `finish` so clients never wait on it.
pub async fn progress_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = match state.coordinator.subscribe(&id) {
        Some(subscription) => {
            debug!(video_id = %id, "Progress subscriber attached");
            subscription.into_stream().boxed()
        }
        None => {
            debug!(video_id = %id, "No active job, sending finish");
            stream::iter([ProcessingEvent::Finish]).boxed()
        }
    };

    create_processing_sse_stream(events)
}

/// Build progress routes
pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/library/:id/progress", get(progress_stream))
}
