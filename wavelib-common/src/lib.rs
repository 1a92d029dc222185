//! # wavelib Common Library
//!
//! Shared code for the wavelib crates:
//! - Error type (`Error`, `Result`)
//! - Bootstrap configuration loading and library folder resolution
//! - Processing event wire type streamed to progress observers
//! - Server-sent event helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
pub use events::ProcessingEvent;
