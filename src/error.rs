//! Error types for the caption pipeline

use crate::captions::SynthesisError;
use crate::media::MediaError;
use crate::models::VideoId;
use crate::render::RenderError;
use crate::state::VideoStatus;
use crate::store::StoreError;
use crate::transcription::EngineError;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by pipeline operations and background jobs.
///
/// Validation variants are returned synchronously to the caller of a
/// trigger. Everything else happens inside a job and ends up as
/// `status = error` on the video.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Video not found: {0}")]
    NotFound(VideoId),

    #[error("Video {0} belongs to another user")]
    Forbidden(VideoId),

    #[error("Video {id} is {actual}, expected {expected}")]
    InvalidState {
        id: VideoId,
        expected: String,
        actual: VideoStatus,
    },

    #[error("File too large for transcription: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("No captions found for video {0}")]
    NoCaptions(VideoId),

    #[error("Invalid caption: {0}")]
    InvalidCaption(String),

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Job panicked: {0}")]
    JobPanicked(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media store error: {0}")]
    Media(#[from] MediaError),

    #[error("Transcription engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Caption synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
}

impl PipelineError {
    pub(crate) fn invalid_state(id: &VideoId, expected: &[VideoStatus], actual: VideoStatus) -> Self {
        let expected = expected
            .iter()
            .map(VideoStatus::as_str)
            .collect::<Vec<_>>()
            .join(" or ");
        PipelineError::InvalidState {
            id: id.clone(),
            expected,
            actual,
        }
    }

    /// True for errors reported synchronously at trigger time
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_)
                | PipelineError::Forbidden(_)
                | PipelineError::InvalidState { .. }
                | PipelineError::FileTooLarge { .. }
                | PipelineError::NoCaptions(_)
                | PipelineError::InvalidCaption(_)
        )
    }
}
