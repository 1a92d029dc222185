//! Per-job progress broadcasting
//!
//! Each running job owns one `JobBroadcaster`, registered in the shared
//! `ProgressHub` under the job's video id. Observers subscribe by id and get
//! every event published from that point on. Exactly one terminal event
//! (`Finish` or `Error`) is delivered last; the broadcaster is removed from
//! the hub in the same critical section that sends it, so a subscriber
//! either attaches before termination and receives the terminal event, or
//! finds no active job.
//!
//! **Throttling:** progress events are forwarded at most once per interval
//! per job. Terminal events are never throttled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;
use wavelib_common::ProcessingEvent;

use crate::resolver::VideoId;

/// Per-job channel capacity; lagging subscribers skip old progress events
const CHANNEL_CAPACITY: usize = 64;

type Channels = HashMap<VideoId, broadcast::Sender<ProcessingEvent>>;

/// Registry of active job broadcasters, keyed by video id
#[derive(Debug, Clone)]
pub struct ProgressHub {
    channels: Arc<Mutex<Channels>>,
    throttle_interval: Duration,
}

impl ProgressHub {
    /// Create an empty hub
    ///
    /// # Arguments
    /// * `throttle_interval` - Minimum interval between progress events of one job
    pub fn new(throttle_interval: Duration) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            throttle_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a broadcaster for `id`, `None` if one is already active
    pub fn register(&self, id: VideoId) -> Option<JobBroadcaster> {
        let mut channels = self.lock();
        if channels.contains_key(&id) {
            return None;
        }

        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(id.clone(), tx.clone());
        debug!(video_id = %id, "Progress broadcaster registered");

        Some(JobBroadcaster {
            id,
            tx,
            hub: self.clone(),
            last_emission: None,
            terminated: false,
        })
    }

    /// Attach to the active job for `id`
    ///
    /// `None` means no job is active: it already ended or never started.
    pub fn subscribe(&self, id: &str) -> Option<Subscription> {
        self.lock().get(id).map(|tx| Subscription {
            rx: tx.subscribe(),
            done: false,
        })
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Deregister `id` and deliver `event` under one lock
    fn terminate(
        &self,
        id: &VideoId,
        tx: &broadcast::Sender<ProcessingEvent>,
        event: ProcessingEvent,
    ) {
        let mut channels = self.lock();
        channels.remove(id);
        let receivers = tx.send(event).unwrap_or(0);
        debug!(
            video_id = %id,
            "Terminal {} event delivered to {} subscribers",
            event.event_type(),
            receivers
        );
    }
}

/// Publishing side of one job's channel
///
/// Dropping it without calling `finish` or `fail` delivers `Error`, so
/// subscribers never wait on a job that vanished.
#[derive(Debug)]
pub struct JobBroadcaster {
    id: VideoId,
    tx: broadcast::Sender<ProcessingEvent>,
    hub: ProgressHub,
    last_emission: Option<Instant>,
    terminated: bool,
}

impl JobBroadcaster {
    pub fn id(&self) -> &VideoId {
        &self.id
    }

    /// Publish a progress fraction, subject to throttling
    ///
    /// Returns true if the event was sent, false if throttled.
    pub fn progress(&mut self, fraction: f64) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_emission {
            if now.duration_since(last) < self.hub.throttle_interval {
                return false;
            }
        }
        self.last_emission = Some(now);

        // No subscribers is fine
        let _ = self.tx.send(ProcessingEvent::progress(fraction));
        true
    }

    /// Deliver `Finish` and deregister
    pub fn finish(mut self) {
        self.terminated = true;
        self.hub.terminate(&self.id, &self.tx, ProcessingEvent::Finish);
    }

    /// Deliver `Error` and deregister
    pub fn fail(mut self) {
        self.terminated = true;
        self.hub.terminate(&self.id, &self.tx, ProcessingEvent::Error);
    }
}

impl Drop for JobBroadcaster {
    fn drop(&mut self) {
        if !self.terminated {
            self.hub.terminate(&self.id, &self.tx, ProcessingEvent::Error);
        }
    }
}

/// Receiving side held by one observer
///
/// Dropping it releases only this observer's resources.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ProcessingEvent>,
    done: bool,
}

impl Subscription {
    /// Next event, `None` once the terminal event has been returned
    pub async fn recv(&mut self) -> Option<ProcessingEvent> {
        if self.done {
            return None;
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.done = event.is_terminal();
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, {} progress events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Stream of events ending after the terminal event
    pub fn into_stream(self) -> impl Stream<Item = ProcessingEvent> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn id(s: &str) -> VideoId {
        VideoId::parse(s).unwrap()
    }

    fn hub() -> ProgressHub {
        ProgressHub::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_single_registration_per_id() {
        let hub = hub();
        let first = hub.register(id("aaaaaaaaaaa"));
        assert!(first.is_some());
        assert!(hub.register(id("aaaaaaaaaaa")).is_none());
        let second = hub.register(id("bbbbbbbbbbb"));
        assert!(second.is_some());
        assert_eq!(hub.active_count(), 2);

        first.unwrap().finish();
        assert!(!hub.is_active("aaaaaaaaaaa"));
        assert!(hub.register(id("aaaaaaaaaaa")).is_some());
    }

    #[tokio::test]
    async fn test_subscribe_without_job_is_none() {
        let hub = hub();
        assert!(hub.subscribe("aaaaaaaaaaa").is_none());

        hub.register(id("aaaaaaaaaaa")).unwrap().finish();
        assert!(hub.subscribe("aaaaaaaaaaa").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_subscribers_get_terminal_once() {
        let hub = hub();
        let mut job = hub.register(id("aaaaaaaaaaa")).unwrap();
        let early = hub.subscribe("aaaaaaaaaaa").unwrap();

        assert!(job.progress(0.25));
        let late = hub.subscribe("aaaaaaaaaaa").unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(job.progress(0.5));
        job.finish();

        let early: Vec<_> = early.into_stream().collect().await;
        let late: Vec<_> = late.into_stream().collect().await;

        assert_eq!(
            early,
            vec![
                ProcessingEvent::progress(0.25),
                ProcessingEvent::progress(0.5),
                ProcessingEvent::Finish
            ]
        );
        assert_eq!(
            late,
            vec![ProcessingEvent::progress(0.5), ProcessingEvent::Finish]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_throttled_per_interval() {
        let hub = hub();
        let mut job = hub.register(id("aaaaaaaaaaa")).unwrap();
        let sub = hub.subscribe("aaaaaaaaaaa").unwrap();

        assert!(job.progress(0.1));
        assert!(!job.progress(0.2));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!job.progress(0.3));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(job.progress(0.4));
        job.fail();

        let events: Vec<_> = sub.into_stream().collect().await;
        assert_eq!(
            events,
            vec![
                ProcessingEvent::progress(0.1),
                ProcessingEvent::progress(0.4),
                ProcessingEvent::Error
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_broadcaster_delivers_error() {
        let hub = hub();
        let job = hub.register(id("aaaaaaaaaaa")).unwrap();
        let mut sub = hub.subscribe("aaaaaaaaaaa").unwrap();

        drop(job);

        assert_eq!(sub.recv().await, Some(ProcessingEvent::Error));
        assert_eq!(sub.recv().await, None);
        assert!(!hub.is_active("aaaaaaaaaaa"));
    }

    #[tokio::test]
    async fn test_unsubscribe_does_not_affect_others() {
        let hub = hub();
        let mut job = hub.register(id("aaaaaaaaaaa")).unwrap();
        let leaving = hub.subscribe("aaaaaaaaaaa").unwrap();
        let staying = hub.subscribe("aaaaaaaaaaa").unwrap();

        drop(leaving);
        job.progress(0.9);
        job.finish();

        let events: Vec<_> = staying.into_stream().collect().await;
        assert_eq!(
            events,
            vec![ProcessingEvent::progress(0.9), ProcessingEvent::Finish]
        );
    }
}
