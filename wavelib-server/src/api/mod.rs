//! HTTP API handlers

pub mod health;
pub mod library;
pub mod progress;

pub use health::health_routes;
pub use library::library_routes;
pub use progress::progress_routes;
