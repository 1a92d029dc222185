//! Processing event wire type
//!
//! One import job emits zero or more `Progress` events followed by exactly
//! one terminal event (`Finish` or `Error`). The JSON shape is what progress
//! stream clients consume:
//!
//! ```json
//! {"type": "progress", "progress": 0.42}
//! {"type": "finish"}
//! {"type": "error"}
//! ```

use serde::{Deserialize, Serialize};

/// Import job notification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProcessingEvent {
    /// Fraction of the transfer completed, in [0, 1]
    Progress { progress: f64 },
    /// Job finished, track is complete
    Finish,
    /// Job failed and was rolled back
    Error,
}

impl ProcessingEvent {
    /// Progress event with the fraction clamped into [0, 1]
    pub fn progress(fraction: f64) -> Self {
        let progress = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        ProcessingEvent::Progress { progress }
    }

    /// True for `Finish` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingEvent::Finish | ProcessingEvent::Error)
    }

    /// Event type string (same as the JSON `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            ProcessingEvent::Progress { .. } => "progress",
            ProcessingEvent::Finish => "finish",
            ProcessingEvent::Error => "error",
        }
    }
}
