//! Test Helper Utilities
//!
//! Scripted downloader and library fixtures shared by the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};
use wavelib_server::import::{FetchError, ImportCoordinator, MediaFetcher, Thumbnail, VideoInfo};
use wavelib_server::library::{LibraryStore, Track};
use wavelib_server::resolver::VideoId;
use wavelib_server::{build_router, AppState};

pub const VIDEO_ID: &str = "dQw4w9WgXcQ";
pub const OTHER_VIDEO_ID: &str = "9bZkp7q19f0";

pub const WAV_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

/// `MediaFetcher` driven by a script instead of an external process
///
/// Gates hold a phase until the test adds a permit, so tests can observe a
/// job mid-flight.
#[derive(Default)]
pub struct FakeFetcher {
    pub progress: Vec<f64>,
    pub fail_info: bool,
    pub fail_download: bool,
    /// Report success without writing the audio file
    pub skip_output: bool,
    /// Occupy the sidecar's temporary path so the final metadata write fails
    pub block_sidecar: bool,
    pub info_gate: Option<Arc<Semaphore>>,
    pub download_gate: Option<Arc<Semaphore>>,
    info_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, steps: &[f64]) -> Self {
        self.progress = steps.to_vec();
        self
    }

    pub fn failing_info(mut self) -> Self {
        self.fail_info = true;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.fail_download = true;
        self
    }

    pub fn without_output(mut self) -> Self {
        self.skip_output = true;
        self
    }

    pub fn blocking_sidecar_rewrite(mut self) -> Self {
        self.block_sidecar = true;
        self
    }

    /// Hold `fetch_info` until a permit is added to the returned gate
    pub fn gated_info(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.info_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Hold `download` until a permit is added to the returned gate
    pub fn gated_download(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.download_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    async fn pass(gate: &Option<Arc<Semaphore>>) {
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch_info(&self, id: &VideoId) -> Result<VideoInfo, FetchError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Self::pass(&self.info_gate).await;

        if self.fail_info {
            return Err(FetchError::Process("ERROR: Video unavailable".to_string()));
        }

        Ok(VideoInfo {
            id: Some(id.to_string()),
            title: Some(format!("Title {}", id)),
            channel: Some("Test Channel".to_string()),
            uploader: None,
            duration: Some(212.0),
            webpage_url: Some(format!("https://www.youtube.com/watch?v={}", id)),
            thumbnails: vec![Thumbnail {
                url: format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id),
                width: Some(480),
                height: Some(360),
            }],
        })
    }

    async fn download(
        &self,
        _id: &VideoId,
        output: &Path,
        progress: mpsc::UnboundedSender<f64>,
    ) -> Result<(), FetchError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        // Intermediate artifact, like the real tool leaves behind mid-transfer
        let partial = output.with_extension("webm.part");
        tokio::fs::write(&partial, b"partial").await?;

        Self::pass(&self.download_gate).await;

        for step in &self.progress {
            let _ = progress.send(*step);
            tokio::task::yield_now().await;
        }

        if self.fail_download {
            tokio::fs::write(output, b"truncated").await?;
            return Err(FetchError::Process("ERROR: transcode failed".to_string()));
        }

        tokio::fs::remove_file(&partial).await?;
        if !self.skip_output {
            tokio::fs::write(output, WAV_BYTES).await?;
        }
        if self.block_sidecar {
            tokio::fs::create_dir(output.with_extension("json.tmp")).await?;
        }
        Ok(())
    }
}

/// Library folder plus coordinator wired to a fake fetcher
pub struct TestLibrary {
    pub dir: TempDir,
    pub library: Arc<LibraryStore>,
    pub coordinator: ImportCoordinator,
    pub fetcher: Arc<FakeFetcher>,
}

impl TestLibrary {
    pub async fn new(fetcher: FakeFetcher) -> Self {
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir, fetcher).await
    }

    /// Open a library over an existing directory
    pub async fn in_dir(dir: TempDir, fetcher: FakeFetcher) -> Self {
        let library = Arc::new(LibraryStore::open(dir.path()).await.unwrap());
        let fetcher = Arc::new(fetcher);
        let coordinator = ImportCoordinator::new(
            Arc::clone(&library),
            Arc::clone(&fetcher) as Arc<dyn MediaFetcher>,
            Duration::ZERO,
        );

        Self {
            dir,
            library,
            coordinator,
            fetcher,
        }
    }

    pub fn app(&self) -> Router {
        build_router(AppState::new(self.coordinator.clone()))
    }

    pub fn path(&self, file: &str) -> std::path::PathBuf {
        self.dir.path().join(file)
    }

    /// Names of all files in the library folder, sorted
    pub fn files(&self) -> Vec<String> {
        list_files(self.dir.path())
    }

    /// Wait until no import job is running
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.coordinator.active_jobs().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("import jobs did not settle");
    }

    /// Import `id` and wait for the job to finish
    pub async fn import_completed(&self, id: &str) -> Track {
        self.coordinator.import_track(id).await.unwrap();
        self.settle().await;
        self.library.get(id).await.unwrap()
    }
}

pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Write a metadata sidecar directly, bypassing the store
pub fn write_sidecar(dir: &Path, id: &str, json: serde_json::Value) {
    std::fs::write(
        dir.join(format!("{}.json", id)),
        serde_json::to_vec_pretty(&json).unwrap(),
    )
    .unwrap();
}

pub fn write_audio(dir: &Path, id: &str) {
    std::fs::write(dir.join(format!("{}.wav", id)), WAV_BYTES).unwrap();
}
