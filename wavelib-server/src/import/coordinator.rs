//! Import job coordination
//!
//! One job per video id, system-wide. A job moves through
//! `Pending → FetchingMetadata → Downloading → {Finished | Failed}`; the
//! terminal states are absorbing.
//!
//! **Admission:** the job registry lock is held while checking for an
//! existing track, checking for a live job and registering a new one, so two
//! requests for the same id can never both start work.
//!
//! **Ordering:** the metadata phase completes, and the provisional track is
//! persisted, before the transfer is launched. The whole job runs in its own
//! task; every caller, including the one that started it, waits on the job's
//! state channel for the provisional track. A caller going away never
//! affects the job.
//!
//! **Termination:** the job is removed from the registry, its terminal state
//! is published and its broadcaster delivers the terminal event, all while
//! the registry lock is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::broadcaster::{JobBroadcaster, ProgressHub, Subscription};
use super::fetcher::{FetchError, MediaFetcher, VideoInfo};
use crate::library::{LibraryError, LibraryStore, Track};
use crate::library::track::UNKNOWN_FIELD;
use crate::resolver::{self, ResolveError, VideoId};

/// Import errors
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    InvalidIdentifier(#[from] ResolveError),

    /// Remote metadata could not be resolved
    #[error("Metadata lookup failed: {0}")]
    Metadata(#[source] FetchError),

    /// External fetch/transcode process failed
    #[error("Pipeline failed: {0}")]
    Pipeline(#[source] FetchError),

    /// Metadata could not be written
    #[error("Persistence failed: {0}")]
    Persistence(#[from] LibraryError),

    /// Job reached a state that contradicts the pipeline's report
    #[error("Inconsistent job state: {0}")]
    Inconsistent(String),

    /// The job failed before a provisional track existed
    #[error("Import of {id} failed: {cause}")]
    JobFailed {
        id: String,
        #[source]
        cause: Arc<ImportError>,
    },
}

impl ImportError {
    /// The error that actually failed the job
    pub fn root(&self) -> &ImportError {
        match self {
            ImportError::JobFailed { cause, .. } => cause.root(),
            other => other,
        }
    }
}

/// Job lifecycle
#[derive(Debug, Clone)]
pub enum JobState {
    Pending,
    FetchingMetadata,
    /// Provisional track persisted, transfer running
    Downloading(Track),
    Finished(Track),
    /// `provisional` is set when the job failed after the metadata phase
    Failed {
        provisional: Option<Track>,
        cause: Arc<ImportError>,
    },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished(_) | JobState::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::FetchingMetadata => "fetching-metadata",
            JobState::Downloading(_) => "downloading",
            JobState::Finished(_) => "finished",
            JobState::Failed { .. } => "failed",
        }
    }
}

/// A running job, owned by the task that drives it
struct Job {
    id: VideoId,
    state: watch::Sender<JobState>,
    broadcaster: JobBroadcaster,
}

impl Job {
    /// Move to `next`; transitions out of a terminal state are ignored
    fn transition(&self, next: JobState) {
        let id = &self.id;
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                warn!(
                    video_id = %id,
                    "Ignoring transition {} -> {}",
                    current.name(),
                    next.name()
                );
                return false;
            }
            debug!(video_id = %id, "Job {} -> {}", current.name(), next.name());
            *current = next;
            true
        });
    }
}

enum Admission {
    /// Track already complete in the library
    Existing(Track),
    /// A job is already running; wait for its provisional track
    Joined(watch::Receiver<JobState>),
    /// A new job was registered; the caller spawns it and waits like a joiner
    Started(Job, watch::Receiver<JobState>),
}

struct Inner {
    library: Arc<LibraryStore>,
    fetcher: Arc<dyn MediaFetcher>,
    hub: ProgressHub,
    jobs: Mutex<HashMap<VideoId, watch::Receiver<JobState>>>,
    last_error: RwLock<Option<String>>,
}

/// Drives import jobs against the library store
#[derive(Clone)]
pub struct ImportCoordinator {
    inner: Arc<Inner>,
}

impl ImportCoordinator {
    /// # Arguments
    /// * `library` - Store receiving the imported tracks
    /// * `fetcher` - External fetch/transcode pipeline
    /// * `progress_interval` - Throttle window for progress notifications
    pub fn new(
        library: Arc<LibraryStore>,
        fetcher: Arc<dyn MediaFetcher>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                library,
                fetcher,
                hub: ProgressHub::new(progress_interval),
                jobs: Mutex::new(HashMap::new()),
                last_error: RwLock::new(None),
            }),
        }
    }

    pub fn library(&self) -> &Arc<LibraryStore> {
        &self.inner.library
    }

    /// Attach to the progress of a running job, `None` if none is active
    pub fn subscribe(&self, id: &str) -> Option<Subscription> {
        self.inner.hub.subscribe(id)
    }

    pub async fn active_jobs(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    /// Message of the most recent failed import
    pub async fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().await.clone()
    }

    /// Import the track behind `input` (video URL or raw id)
    ///
    /// Returns the existing track if already imported, the provisional track
    /// of the running job if one exists, or starts a job and returns its
    /// provisional track once metadata is persisted.
    pub async fn import_track(&self, input: &str) -> Result<Track, ImportError> {
        let id = resolver::resolve(input)?;

        match self.admit(&id).await? {
            Admission::Existing(track) => {
                debug!(video_id = %id, "Track already in library");
                Ok(track)
            }
            Admission::Joined(state) => {
                debug!(video_id = %id, "Joining running import job");
                Self::await_provisional(&id, state).await
            }
            Admission::Started(job, state) => {
                info!(video_id = %id, "Import job started");
                tokio::spawn(self.clone().run_job(job));
                Self::await_provisional(&id, state).await
            }
        }
    }

    /// Check-then-register under the registry lock
    async fn admit(&self, id: &VideoId) -> Result<Admission, ImportError> {
        let mut jobs = self.inner.jobs.lock().await;

        if let Some(state) = jobs.get(id) {
            if state.has_changed().is_ok() {
                return Ok(Admission::Joined(state.clone()));
            }
            warn!(video_id = %id, "Dropping stale job entry");
            jobs.remove(id);
        }

        if let Some(track) = self.inner.library.get(id.as_str()).await {
            if !track.downloading {
                return Ok(Admission::Existing(track));
            }
            // A placeholder without a live job is left over from a dead job
            warn!(video_id = %id, "Discarding orphaned download placeholder");
            self.inner.library.discard(id).await;
        }

        let broadcaster = self.inner.hub.register(id.clone()).ok_or_else(|| {
            ImportError::Inconsistent(format!("broadcaster for {} already registered", id))
        })?;
        let (state, receiver) = watch::channel(JobState::Pending);
        jobs.insert(id.clone(), receiver.clone());

        let job = Job {
            id: id.clone(),
            state,
            broadcaster,
        };
        Ok(Admission::Started(job, receiver))
    }

    async fn await_provisional(
        id: &VideoId,
        mut state: watch::Receiver<JobState>,
    ) -> Result<Track, ImportError> {
        let settled = state
            .wait_for(|s| !matches!(s, JobState::Pending | JobState::FetchingMetadata))
            .await
            .map(|s| (*s).clone())
            .map_err(|_| ImportError::Inconsistent(format!("job for {} vanished", id)))?;

        // Transfer failures are reported through the progress stream only
        match settled {
            JobState::Downloading(track)
            | JobState::Finished(track)
            | JobState::Failed {
                provisional: Some(track),
                ..
            } => Ok(track),
            JobState::Failed {
                provisional: None,
                cause,
            } => Err(ImportError::JobFailed {
                id: id.to_string(),
                cause,
            }),
            other => Err(ImportError::Inconsistent(format!(
                "job for {} settled in {}",
                id,
                other.name()
            ))),
        }
    }

    /// Drive a job from admission to a terminal state
    async fn run_job(self, job: Job) {
        if let Some((job, track)) = self.run_metadata_phase(job).await {
            self.run_download(job, track).await;
        }
    }

    /// Resolve metadata and persist the provisional track
    ///
    /// `None` once the job has been failed and rolled back.
    async fn run_metadata_phase(&self, job: Job) -> Option<(Job, Track)> {
        job.transition(JobState::FetchingMetadata);

        let info = match self.inner.fetcher.fetch_info(&job.id).await {
            Ok(info) => info,
            Err(e) => {
                self.fail(job, ImportError::Metadata(e)).await;
                return None;
            }
        };

        let track = provisional_track(&job.id, &info);
        info!(video_id = %job.id, title = %track.name, "Downloading");

        if let Err(e) = self.inner.library.add(track.clone()).await {
            self.fail(job, ImportError::Persistence(e)).await;
            return None;
        }

        job.transition(JobState::Downloading(track.clone()));
        Some((job, track))
    }

    /// Drive the external pipeline to a terminal state
    async fn run_download(&self, mut job: Job, mut track: Track) {
        let id = job.id.clone();
        let output = self.inner.library.audio_path(&id);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let result = {
            let download = self.inner.fetcher.download(&id, &output, progress_tx);
            tokio::pin!(download);

            loop {
                tokio::select! {
                    result = &mut download => break result,
                    Some(fraction) = progress_rx.recv() => {
                        job.broadcaster.progress(fraction);
                    }
                }
            }
        };

        if let Err(e) = result {
            self.fail(job, ImportError::Pipeline(e)).await;
            return;
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            let err = ImportError::Inconsistent(format!(
                "pipeline reported success but {} is missing",
                output.display()
            ));
            self.fail(job, err).await;
            return;
        }

        track.downloading = false;
        if let Err(e) = self.inner.library.update_metadata(&track).await {
            self.fail(job, ImportError::Persistence(e)).await;
            return;
        }

        info!(video_id = %id, "Import finished");
        self.terminate(job, JobState::Finished(track)).await;
    }

    /// Roll back every artifact of the job and report the failure
    async fn fail(&self, job: Job, err: ImportError) {
        error!(video_id = %job.id, error = %err, "Import failed, rolling back");

        self.inner.library.discard(&job.id).await;
        *self.inner.last_error.write().await = Some(format!("{}: {}", job.id, err));

        let provisional = match &*job.state.borrow() {
            JobState::Downloading(track) => Some(track.clone()),
            _ => None,
        };
        let outcome = JobState::Failed {
            provisional,
            cause: Arc::new(err),
        };
        self.terminate(job, outcome).await;
    }

    /// Deregister the job, publish its terminal state and event
    ///
    /// Waiters woken by the terminal state never see the job still registered.
    async fn terminate(&self, job: Job, outcome: JobState) {
        let mut jobs = self.inner.jobs.lock().await;
        jobs.remove(&job.id);

        let success = matches!(outcome, JobState::Finished(_));
        job.transition(outcome);

        let Job { broadcaster, .. } = job;
        if success {
            broadcaster.finish();
        } else {
            broadcaster.fail();
        }
    }
}

/// Provisional track built from remote metadata, still `downloading`
pub fn provisional_track(id: &VideoId, info: &VideoInfo) -> Track {
    if let Some(remote_id) = info.id.as_deref() {
        if remote_id != id.as_str() {
            warn!(video_id = %id, remote_id, "Metadata reports a different id");
        }
    }

    Track {
        id: id.clone(),
        name: info
            .title
            .clone()
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
        artist: info
            .artist()
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
        length: info.duration.unwrap_or(0.0),
        url: Track::audio_url(id),
        downloading: true,
        source: Some(
            info.webpage_url
                .clone()
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id)),
        ),
        thumbnail: info.best_thumbnail().map(|t| t.url.clone()),
    }
}
