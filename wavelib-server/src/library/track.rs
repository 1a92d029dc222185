//! Track model and sidecar metadata schema

use serde::{Deserialize, Serialize};

use crate::resolver::VideoId;

/// Placeholder for a missing name or artist
pub const UNKNOWN_FIELD: &str = "N/A";

/// A library entry: completed, or a provisional placeholder while downloading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: VideoId,
    pub name: String,
    pub artist: String,
    /// Duration in seconds
    pub length: f64,
    /// Playable path of the audio artifact
    pub url: String,
    pub downloading: bool,
    /// Origin page URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl Track {
    /// Playable path served by the audio route
    pub fn audio_url(id: &VideoId) -> String {
        format!("/library/{}.wav", id)
    }
}

/// Sidecar file schema as read back from disk
///
/// Every field is optional. `id` and `url` are derived from the file name
/// rather than trusted from the payload; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub downloading: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl TrackMetadata {
    /// Build a track, applying defaults for missing fields
    pub fn into_track(self, id: VideoId) -> Track {
        Track {
            url: Track::audio_url(&id),
            name: self.name.unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
            artist: self.artist.unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
            length: self.length.unwrap_or(0.0),
            downloading: self.downloading,
            source: self.source,
            thumbnail: self.thumbnail,
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> VideoId {
        VideoId::parse("dQw4w9WgXcQ").unwrap()
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let metadata: TrackMetadata = serde_json::from_value(json!({})).unwrap();
        let track = metadata.into_track(id());

        assert_eq!(track.name, "N/A");
        assert_eq!(track.artist, "N/A");
        assert_eq!(track.length, 0.0);
        assert!(!track.downloading);
        assert_eq!(track.url, "/library/dQw4w9WgXcQ.wav");
        assert!(track.source.is_none());
        assert!(track.thumbnail.is_none());
    }

    #[test]
    fn test_payload_id_and_url_ignored() {
        let metadata: TrackMetadata = serde_json::from_value(json!({
            "id": "somethingElse",
            "url": "/elsewhere.wav",
            "name": "Song",
            "artist": "Band",
            "length": 212.5,
            "extra": [1, 2, 3]
        }))
        .unwrap();
        let track = metadata.into_track(id());

        assert_eq!(track.id.as_str(), "dQw4w9WgXcQ");
        assert_eq!(track.url, "/library/dQw4w9WgXcQ.wav");
        assert_eq!(track.name, "Song");
        assert_eq!(track.length, 212.5);
    }

    #[test]
    fn test_wrong_field_type_rejected() {
        let result: Result<TrackMetadata, _> =
            serde_json::from_value(json!({"length": "three minutes"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_optional_fields_omitted_when_absent() {
        let track = TrackMetadata::default().into_track(id());
        let value = serde_json::to_value(&track).unwrap();

        assert!(value.get("source").is_none());
        assert!(value.get("thumbnail").is_none());
        assert_eq!(value["id"], "dQw4w9WgXcQ");
        assert_eq!(value["downloading"], false);
    }
}
