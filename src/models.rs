use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::VideoStatus;

/// Opaque video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
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

/// Identifier of the user owning a video
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One uploaded video and its pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    pub owner: OwnerId,
    pub title: String,

    /// Current pipeline stage; only the pipeline writes this
    pub status: VideoStatus,

    /// Location of the original media in the media store
    pub storage_path: String,

    /// Location of the captioned output, set once rendering succeeds
    pub rendered_path: Option<String>,

    /// Original file size in bytes
    pub size_bytes: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    pub fn new(
        id: VideoId,
        owner: OwnerId,
        title: impl Into<String>,
        storage_path: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            title: title.into(),
            status: VideoStatus::Uploading,
            storage_path: storage_path.into(),
            rendered_path: None,
            size_bytes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: VideoStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        &self.owner == owner
    }

    /// File name of the original media, used as a hint for the engine
    pub fn media_filename(&self) -> &str {
        self.storage_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("video.mp4")
    }

    /// Deterministic location of the rendered artifact
    pub fn rendered_storage_path(&self) -> String {
        format!("{}/{}/rendered.mp4", self.owner, self.id)
    }
}

/// A persisted caption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    /// Unique within the owning video
    pub id: u32,
    pub video_id: VideoId,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// A caption produced by synthesis or editing, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCaption {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl NewCaption {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }
}

/// Caption as submitted by the editor. Timing may be in seconds (what the
/// player works in) or milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptionDraft {
    Millis { start_ms: u64, end_ms: u64, text: String },
    Seconds { start: f64, end: f64, text: String },
}

impl CaptionDraft {
    pub fn start_ms(&self) -> u64 {
        match self {
            Self::Millis { start_ms, .. } => *start_ms,
            Self::Seconds { start, .. } => seconds_to_ms(*start),
        }
    }

    pub fn end_ms(&self) -> u64 {
        match self {
            Self::Millis { end_ms, .. } => *end_ms,
            Self::Seconds { end, .. } => seconds_to_ms(*end),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Millis { text, .. } | Self::Seconds { text, .. } => text,
        }
    }
}

/// Largest timestamp a SubRip file can carry (99:59:59,999)
pub const MAX_TIMESTAMP_MS: u64 = 359_999_999;

/// Convert seconds to integer milliseconds, rounding to nearest.
/// Negative and non-finite inputs clamp to zero, oversized ones to
/// [`MAX_TIMESTAMP_MS`].
pub fn seconds_to_ms(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    ((seconds * 1000.0).round() as u64).min(MAX_TIMESTAMP_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_ms_rounds_to_nearest() {
        assert_eq!(seconds_to_ms(0.0), 0);
        assert_eq!(seconds_to_ms(3.5), 3500);
        assert_eq!(seconds_to_ms(1.0004), 1000);
        assert_eq!(seconds_to_ms(1.0006), 1001);
        assert_eq!(seconds_to_ms(12.1), 12100);
    }

    #[test]
    fn test_seconds_to_ms_clamps_invalid() {
        assert_eq!(seconds_to_ms(-2.0), 0);
        assert_eq!(seconds_to_ms(f64::NAN), 0);
        assert_eq!(seconds_to_ms(f64::INFINITY), 0);
        assert_eq!(seconds_to_ms(1e300), MAX_TIMESTAMP_MS);
        assert_eq!(seconds_to_ms(360_000.0), MAX_TIMESTAMP_MS);
    }

    #[test]
    fn test_rendered_path_is_deterministic() {
        let video = Video::new(
            VideoId::new("vid-1"),
            OwnerId::new("user-9"),
            "Demo",
            "user-9/vid-1/clip.mp4",
            10,
        );
        assert_eq!(video.rendered_storage_path(), "user-9/vid-1/rendered.mp4");
        assert_eq!(video.media_filename(), "clip.mp4");
        assert_eq!(video.status, VideoStatus::Uploading);
    }

    #[test]
    fn test_caption_draft_units() {
        let secs: CaptionDraft =
            serde_json::from_str(r#"{"start": 3.6, "end": 7.2, "text": "b"}"#).unwrap();
        assert_eq!(secs.start_ms(), 3600);
        assert_eq!(secs.end_ms(), 7200);

        let millis: CaptionDraft =
            serde_json::from_str(r#"{"start_ms": 10, "end_ms": 20, "text": "c"}"#).unwrap();
        assert_eq!(millis.start_ms(), 10);
        assert_eq!(millis.text(), "c");
    }
}
