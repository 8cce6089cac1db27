/// Captionly Pipeline
///
/// Background media pipeline behind Captionly: transcribes uploaded videos,
/// turns transcripts into editable captions and burns the edited captions
/// into a new video with ffmpeg.

pub mod captions;
pub mod config;
pub mod error;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod state;
pub mod store;
pub mod transcription;

// Re-export main types for easy access
pub use crate::captions::{CaptionSynthesizer, SubtitleDocument, SynthesisOptions};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{PipelineError, Result};
pub use crate::media::{FsMediaStore, MediaStore};
pub use crate::models::{Caption, CaptionDraft, NewCaption, OwnerId, Video, VideoId};
pub use crate::pipeline::{Accepted, Adapters, EditorSession, PipelineOptions, StatusEvent, VideoPipeline};
pub use crate::render::{Encoder, FfmpegEncoder, MediaRenderer, SubtitleStyle};
pub use crate::state::VideoStatus;
pub use crate::store::{JsonRecordStore, RecordStore};
pub use crate::transcription::{Transcript, TranscriptSegment, TranscriptionEngine, WhisperApiEngine};
