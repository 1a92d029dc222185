//! External media fetcher contract
//!
//! The fetch/transcode tool is opaque to the coordinator: it resolves
//! metadata for a video id and writes the audio for it to a given path,
//! reporting progress fractions along the way.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::resolver::VideoId;

/// Thumbnails at or below this height are only used when nothing larger exists
pub const MIN_THUMBNAIL_HEIGHT: u32 = 180;

/// Fetcher errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tool exited unsuccessfully
    #[error("Downloader failed: {0}")]
    Process(String),

    /// Tool output could not be parsed
    #[error("Unexpected downloader output: {0}")]
    Parse(#[from] serde_json::Error),

    /// Downloader binary could not be installed
    #[error("Downloader install failed: {0}")]
    Install(String),
}

/// Remote video metadata
///
/// Unknown fields are ignored; every field is optional so partial payloads
/// still produce a track with defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl VideoInfo {
    /// Channel name, falling back to the uploader
    pub fn artist(&self) -> Option<&str> {
        self.channel.as_deref().or(self.uploader.as_deref())
    }

    /// Smallest thumbnail taller than 180px, else the largest one
    pub fn best_thumbnail(&self) -> Option<&Thumbnail> {
        let mut sorted: Vec<&Thumbnail> = self.thumbnails.iter().collect();
        sorted.sort_by_key(|t| t.height.unwrap_or(0));

        sorted
            .iter()
            .find(|t| t.height.unwrap_or(0) > MIN_THUMBNAIL_HEIGHT)
            .or(sorted.last())
            .copied()
    }
}

/// Out-of-process fetch/transcode pipeline
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Resolve remote metadata for `id`
    async fn fetch_info(&self, id: &VideoId) -> Result<VideoInfo, FetchError>;

    /// Fetch and transcode the audio for `id` into `output`
    ///
    /// Progress fractions in [0, 1] are sent on `progress` as they arrive.
    async fn download(
        &self,
        id: &VideoId,
        output: &Path,
        progress: mpsc::UnboundedSender<f64>,
    ) -> Result<(), FetchError>;
}
