//! Library store
//!
//! In-memory index of tracks mirrored to one directory on disk. Each track is
//! a pair of files sharing the id as base name: `<id>.json` (metadata) and
//! `<id>.wav` (audio). Only complete pairs are loaded on rescan.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::track::{Track, TrackMetadata};
use crate::resolver::VideoId;

/// Audio artifact extension
pub const AUDIO_EXTENSION: &str = "wav";

/// Metadata sidecar extension
pub const METADATA_EXTENSION: &str = "json";

/// Downloader binary kept in the library folder, never a library entry
pub const DOWNLOADER_BINARY_NAME: &str = "yt-dlp";

/// Suffixes of files the downloader and the store create transiently
const TRANSIENT_SUFFIXES: [&str; 4] = [".tmp", ".part", ".ytdl", ".temp"];

/// Library store errors
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Id was never present in the library
    #[error("Track not found: {0}")]
    NotFound(String),

    /// Track is still being downloaded
    #[error("Track is still downloading: {0}")]
    Busy(String),

    /// Id already present on add
    #[error("Track already exists: {0}")]
    AlreadyExists(String),

    /// Operation would violate a store invariant
    #[error("Library inconsistency: {0}")]
    Inconsistent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a rescan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanReport {
    /// Tracks loaded from disk
    pub loaded: usize,
    /// Entries skipped: orphans, unreadable metadata, interrupted downloads
    pub skipped: usize,
}

/// Owner of the library index and its directory
#[derive(Debug)]
pub struct LibraryStore {
    root: PathBuf,
    tracks: RwLock<Vec<Track>>,
}

impl LibraryStore {
    /// Create an empty store over `root` without touching the disk
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tracks: RwLock::new(Vec::new()),
        }
    }

    /// Create the store and load it from disk
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let store = Self::new(root);
        store.rescan().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audio_path(&self, id: &VideoId) -> PathBuf {
        self.root.join(format!("{}.{}", id, AUDIO_EXTENSION))
    }

    pub fn metadata_path(&self, id: &VideoId) -> PathBuf {
        self.root.join(format!("{}.{}", id, METADATA_EXTENSION))
    }

    /// Rebuild the index from the directory
    ///
    /// Fails only if the directory cannot be created or listed. Malformed
    /// entries are skipped with a warning. Sidecars still flagged
    /// `downloading` come from interrupted jobs and are skipped. Entries of
    /// jobs currently downloading in this process are kept.
    pub async fn rescan(&self) -> Result<RescanReport, LibraryError> {
        info!("Loading library from {}", self.root.display());
        // Held for the whole scan so add/update/remove cannot interleave
        let mut tracks = self.tracks.write().await;
        tokio::fs::create_dir_all(&self.root).await?;

        let mut metadata_names: Vec<String> = Vec::new();
        let mut audio_names: HashSet<String> = HashSet::new();

        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();

            if let Some(base) = name.strip_suffix(".json") {
                metadata_names.push(base.to_string());
            } else if let Some(base) = name.strip_suffix(".wav") {
                audio_names.insert(base.to_string());
            } else if name == DOWNLOADER_BINARY_NAME {
                continue;
            } else if TRANSIENT_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                debug!("Skipping transient file '{}'", name);
            } else {
                warn!("Unexpected file '{}' in library, ignoring", name);
            }
        }

        let metadata_set: HashSet<&str> = metadata_names.iter().map(String::as_str).collect();
        let mut report = RescanReport::default();

        for orphan in audio_names.iter().filter(|a| !metadata_set.contains(a.as_str())) {
            warn!("File '{}.wav' is missing its metadata file, ignoring", orphan);
            report.skipped += 1;
        }

        let mut fresh = Vec::new();
        for base in &metadata_names {
            if !audio_names.contains(base) {
                warn!("File '{}.json' is missing its audio file, ignoring", base);
                report.skipped += 1;
                continue;
            }

            match self.load_entry(base).await {
                Some(track) => fresh.push(track),
                None => report.skipped += 1,
            }
        }
        report.loaded = fresh.len();

        let in_flight: Vec<Track> = tracks
            .iter()
            .filter(|t| t.downloading && !fresh.iter().any(|f| f.id == t.id))
            .cloned()
            .collect();
        fresh.extend(in_flight);
        *tracks = fresh;

        info!(
            "Library loaded: {} tracks, {} entries skipped",
            report.loaded, report.skipped
        );
        Ok(report)
    }

    /// Parse one valid pair, `None` if it must be skipped
    async fn load_entry(&self, base: &str) -> Option<Track> {
        let Some(id) = VideoId::parse(base) else {
            warn!("File '{}.json' is not named after a video id, ignoring", base);
            return None;
        };

        let content = match tokio::fs::read_to_string(self.metadata_path(&id)).await {
            Ok(content) => content,
            Err(e) => {
                warn!("File '{}.json' can't be read, ignoring: {}", base, e);
                return None;
            }
        };

        let metadata: TrackMetadata = match serde_json::from_str(&content) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("File '{}.json' can't be loaded, ignoring: {}", base, e);
                return None;
            }
        };

        if metadata.downloading {
            warn!(
                "File '{}.wav' was interrupted during download, ignoring",
                base
            );
            return None;
        }

        Some(metadata.into_track(id))
    }

    /// Snapshot of the library in discovery order
    pub async fn list(&self) -> Vec<Track> {
        self.tracks.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Track> {
        self.tracks
            .read()
            .await
            .iter()
            .find(|t| t.id.as_str() == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.tracks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tracks.read().await.is_empty()
    }

    /// Write the metadata file and append the track
    pub async fn add(&self, track: Track) -> Result<(), LibraryError> {
        let mut tracks = self.tracks.write().await;
        if tracks.iter().any(|t| t.id == track.id) {
            return Err(LibraryError::AlreadyExists(track.id.to_string()));
        }

        self.write_metadata(&track).await?;
        tracks.push(track);
        Ok(())
    }

    /// Rewrite the metadata file of an existing track
    ///
    /// `downloading` may go from true to false, never back.
    pub async fn update_metadata(&self, track: &Track) -> Result<(), LibraryError> {
        let mut tracks = self.tracks.write().await;
        let slot = tracks
            .iter_mut()
            .find(|t| t.id == track.id)
            .ok_or_else(|| {
                LibraryError::Inconsistent(format!("{} is not in the library", track.id))
            })?;

        if !slot.downloading && track.downloading {
            return Err(LibraryError::Inconsistent(format!(
                "{} is complete and cannot return to downloading",
                track.id
            )));
        }

        self.write_metadata(track).await?;
        *slot = track.clone();
        Ok(())
    }

    /// Delete a completed track and both of its files
    pub async fn remove(&self, id: &str) -> Result<Track, LibraryError> {
        let mut tracks = self.tracks.write().await;
        let index = tracks
            .iter()
            .position(|t| t.id.as_str() == id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;

        if tracks[index].downloading {
            return Err(LibraryError::Busy(id.to_string()));
        }

        let track_id = tracks[index].id.clone();
        remove_if_exists(&self.audio_path(&track_id)).await?;
        remove_if_exists(&self.metadata_path(&track_id)).await?;

        let track = tracks.remove(index);
        info!(video_id = %track.id, "Track removed from library");
        Ok(track)
    }

    /// Drop a track and every file named after it, ignoring missing entries
    ///
    /// Used by job rollback; bypasses the downloading guard of `remove`.
    pub(crate) async fn discard(&self, id: &VideoId) {
        let mut tracks = self.tracks.write().await;
        tracks.retain(|t| &t.id != id);

        let prefix = format!("{}.", id);
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(video_id = %id, "Cleanup could not list library: {}", e);
                return;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(video_id = %id, "Cleanup listing failed: {}", e);
                    break;
                }
            };
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let removed = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(entry.path()).await,
                _ => remove_if_exists(&entry.path()).await,
            };
            if let Err(e) = removed {
                warn!(
                    video_id = %id,
                    "Cleanup could not delete {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }

    /// Write `<id>.json` through a temporary file and rename
    async fn write_metadata(&self, track: &Track) -> Result<(), LibraryError> {
        let path = self.metadata_path(&track.id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(track)?;

        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Delete a file; a missing file is not an error
async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
