//! wavelib-server library interface
//!
//! Exposes the library store, import coordinator and HTTP router for the
//! `wavelib` binary and for integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod import;
pub mod library;
pub mod resolver;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::import::ImportCoordinator;
use crate::library::LibraryStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Track library backed by the library folder
    pub library: Arc<LibraryStore>,
    /// Import jobs and their progress channels
    pub coordinator: ImportCoordinator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: ImportCoordinator) -> Self {
        Self {
            library: Arc::clone(coordinator.library()),
            coordinator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::library_routes())
        .merge(api::progress_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
