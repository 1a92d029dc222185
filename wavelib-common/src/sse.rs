//! Server-Sent Events (SSE) utilities

use crate::events::ProcessingEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

/// Keep-alive interval for long-lived progress streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Encode one processing event as an unnamed SSE message with a JSON payload
pub fn processing_event(event: &ProcessingEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().data(data)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Turn a stream of processing events into an SSE response
///
/// The response ends right after the first terminal event. If the source
/// stream ends without one, an `error` event is synthesized so clients are
/// never left waiting.
pub fn create_processing_sse_stream<S>(
    events: S,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ProcessingEvent> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut events = Box::pin(events);
        let mut terminated = false;

        while let Some(event) = events.next().await {
            debug!("SSE: Sending {} event", event.event_type());
            if let Some(sse_event) = processing_event(&event) {
                yield Ok(sse_event);
            }
            if event.is_terminal() {
                terminated = true;
                break;
            }
        }

        if !terminated {
            warn!("SSE: Event source closed without a terminal event");
            if let Some(sse_event) = processing_event(&ProcessingEvent::Error) {
                yield Ok(sse_event);
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("heartbeat"),
    )
}
