//! Library of imported tracks: model and on-disk store

pub mod store;
pub mod track;

pub use store::{LibraryError, LibraryStore, RescanReport};
pub use track::{Track, TrackMetadata};
