use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stage of a video. This is the only progress signal in the
/// system: there is no separate job entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    /// Upload in progress (owned by the upload flow)
    Uploading,

    /// Original media stored; may carry captions from a finished transcription
    Ready,

    /// Transcription job in flight
    Transcribing,

    /// Caption set is open for editing and rendering
    Captioned,

    /// Render job in flight
    Rendering,

    /// Rendered artifact available
    Rendered,

    /// Last job failed; needs explicit re-initiation
    Error,
}

impl VideoStatus {
    pub const ALL: [VideoStatus; 7] = [
        VideoStatus::Uploading,
        VideoStatus::Ready,
        VideoStatus::Transcribing,
        VideoStatus::Captioned,
        VideoStatus::Rendering,
        VideoStatus::Rendered,
        VideoStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Ready => "ready",
            VideoStatus::Transcribing => "transcribing",
            VideoStatus::Captioned => "captioned",
            VideoStatus::Rendering => "rendering",
            VideoStatus::Rendered => "rendered",
            VideoStatus::Error => "error",
        }
    }

    /// A background job owns the video while in this state
    pub fn is_in_progress(&self) -> bool {
        matches!(self, VideoStatus::Transcribing | VideoStatus::Rendering)
    }

    /// Legal transitions of the state machine
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        matches!(
            (self, next),
            (Uploading, Ready)
                | (Uploading, Error)
                | (Ready, Transcribing)
                | (Ready, Captioned)
                | (Transcribing, Ready)
                | (Transcribing, Error)
                | (Captioned, Rendering)
                | (Rendering, Rendered)
                | (Rendering, Captioned)
                | (Rendering, Error)
                | (Error, Ready)
                | (Error, Captioned)
        )
    }

    /// State a claim is reverted to when its job could not be launched
    pub fn revert_target(&self) -> Option<VideoStatus> {
        match self {
            VideoStatus::Transcribing => Some(VideoStatus::Ready),
            VideoStatus::Rendering => Some(VideoStatus::Captioned),
            _ => None,
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VideoStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown video status: {}", s))
    }
}
