//! Track import: job coordination, progress broadcasting, external fetcher

pub mod broadcaster;
pub mod coordinator;
pub mod fetcher;
pub mod ytdlp;

pub use broadcaster::{JobBroadcaster, ProgressHub, Subscription};
pub use coordinator::{ImportCoordinator, ImportError, JobState};
pub use fetcher::{FetchError, MediaFetcher, Thumbnail, VideoInfo};
pub use ytdlp::{ensure_binary, YtDlpFetcher};
