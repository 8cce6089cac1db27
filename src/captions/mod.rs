pub mod srt;
pub mod synthesize;

pub use srt::{SubtitleBlock, SubtitleDocument};
pub use synthesize::{placeholder_captions, CaptionSynthesizer, SynthesisError, SynthesisOptions};
