pub mod whisper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use whisper::WhisperApiEngine;

/// Engine-provided unit of speech-to-text output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Transcript returned by an engine. Engines that report timing produce
/// `Segmented`; the rest produce `PlainText`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transcript {
    Segmented { segments: Vec<TranscriptSegment> },
    PlainText {
        text: String,
        /// Media duration in seconds, when the engine knows it
        duration: Option<f64>,
    },
}

impl Transcript {
    pub fn is_segmented(&self) -> bool {
        matches!(self, Transcript::Segmented { .. })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Engine request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed engine response: {0}")]
    Malformed(String),

    #[error("Engine configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Timeout(_) => true,
            EngineError::Status { status, .. } => *status == 429 || *status >= 500,
            EngineError::Request(e) => e.is_timeout() || e.is_connect(),
            EngineError::Malformed(_) | EngineError::Configuration(_) => false,
        }
    }
}

/// Remote speech-to-text capability
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(&self, media: Vec<u8>, filename: &str) -> Result<Transcript, EngineError>;

    /// Largest media file the engine accepts, in bytes
    fn max_file_size(&self) -> u64;

    fn name(&self) -> &str;
}
