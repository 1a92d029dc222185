//! Video identifier resolution
//!
//! Maps user input (a raw video id or a video URL) to the canonical 11
//! character id used as the primary key for tracks, jobs and file names.
//! Pure: never touches the filesystem or network.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Length of a canonical video id
pub const VIDEO_ID_LEN: usize = 11;

/// Hosts that carry the id in the `v` query parameter
const QUERY_HOSTS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

/// Shortlink host, id is the first path segment
const SHORTLINK_HOST: &str = "youtu.be";

/// Hosts with embed-style paths, id is the second path segment
const PATH_HOSTS: [&str; 2] = ["youtube.com", "www.youtube.com"];

/// First path segment of the embed-style paths
const PATH_PREFIXES: [&str; 4] = ["embed", "v", "shorts", "live"];

/// Input could not be resolved to a video id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Canonical video id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Wrap a string that already has the canonical shape
    pub fn parse(s: &str) -> Option<Self> {
        is_video_id(s).then(|| VideoId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for VideoId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// True if `s` is exactly 11 characters of `[A-Za-z0-9_-]`
pub fn is_video_id(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Resolve a raw id or a video URL to its canonical id
pub fn resolve(input: &str) -> Result<VideoId, ResolveError> {
    let input = input.trim();

    if let Some(id) = VideoId::parse(input) {
        return Ok(id);
    }

    if input.starts_with("http://") || input.starts_with("https://") {
        return resolve_url(input);
    }

    Err(ResolveError::InvalidIdentifier(format!(
        "No video id found: {}",
        input
    )))
}

fn resolve_url(link: &str) -> Result<VideoId, ResolveError> {
    let parsed = Url::parse(link)
        .map_err(|e| ResolveError::InvalidIdentifier(format!("Malformed URL {}: {}", link, e)))?;
    let host = parsed.host_str().unwrap_or_default();

    let query_id = parsed
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());

    let id = match (path_segment_index(host, &parsed), query_id) {
        (Some(index), None) => parsed
            .path_segments()
            .and_then(|mut segments| segments.nth(index))
            .map(str::to_string),
        (_, query_id) if QUERY_HOSTS.contains(&host) => query_id,
        _ => {
            return Err(ResolveError::InvalidIdentifier(format!(
                "Not a supported video host: {}",
                host
            )))
        }
    };

    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ResolveError::InvalidIdentifier(format!("No video id found: {}", link)))?;
    let truncated: String = id.chars().take(VIDEO_ID_LEN).collect();

    VideoId::parse(&truncated).ok_or_else(|| {
        ResolveError::InvalidIdentifier(format!(
            "Video id ({}) does not match the expected format",
            truncated
        ))
    })
}

/// Position of the id among the path segments for path-style hosts
fn path_segment_index(host: &str, url: &Url) -> Option<usize> {
    if host == SHORTLINK_HOST {
        return Some(0);
    }
    if PATH_HOSTS.contains(&host) {
        let first = url.path_segments()?.next()?;
        if PATH_PREFIXES.contains(&first) {
            return Some(1);
        }
    }
    None
}
