//! Transcript to caption conversion

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{seconds_to_ms, NewCaption, MAX_TIMESTAMP_MS};
use crate::transcription::{Transcript, TranscriptSegment};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Transcript produced no captions")]
    NoCaptionsGenerated,
}

/// Tuning for the plain-text fallback path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOptions {
    /// Words grouped into one caption when no timing is available
    pub words_per_caption: usize,

    /// Speaking rate used to estimate total duration when the engine
    /// reports none
    pub fallback_ms_per_word: u64,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            words_per_caption: 10,
            fallback_ms_per_word: 400,
        }
    }
}

/// Converts engine transcripts into ordered caption lists
#[derive(Debug, Clone, Default)]
pub struct CaptionSynthesizer {
    options: SynthesisOptions,
}

impl CaptionSynthesizer {
    pub fn new(options: SynthesisOptions) -> Self {
        Self { options }
    }

    /// Build captions from a transcript.
    ///
    /// Segmented transcripts map one segment to one caption, keeping engine
    /// order. Plain text is split into fixed-size word chunks spread evenly
    /// over an assumed duration; those timings are approximate and only
    /// exist so the edit-and-render flow stays available.
    pub fn synthesize(&self, transcript: &Transcript) -> Result<Vec<NewCaption>, SynthesisError> {
        let captions = match transcript {
            Transcript::Segmented { segments } => self.from_segments(segments),
            Transcript::PlainText { text, duration } => {
                warn!("⚠️ Transcript has no segment timing, using approximate word chunks");
                self.from_plain_text(text, *duration)
            }
        };

        if captions.is_empty() {
            return Err(SynthesisError::NoCaptionsGenerated);
        }

        debug!("📝 Synthesized {} captions", captions.len());
        Ok(captions)
    }

    fn from_segments(&self, segments: &[TranscriptSegment]) -> Vec<NewCaption> {
        segments
            .iter()
            .filter_map(|segment| {
                let text = segment.text.trim();
                if text.is_empty() {
                    return None;
                }

                let start_ms = seconds_to_ms(segment.start);
                // Zero-length or inverted segments still get a visible window
                let end_ms = seconds_to_ms(segment.end).max(start_ms.saturating_add(1));

                Some(NewCaption::new(start_ms, end_ms, text))
            })
            .collect()
    }

    fn from_plain_text(&self, text: &str, duration: Option<f64>) -> Vec<NewCaption> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let chunk_size = self.options.words_per_caption.max(1);
        let chunks: Vec<&[&str]> = words.chunks(chunk_size).collect();
        let chunk_count = chunks.len() as u64;

        let estimated = (words.len() as u64)
            .saturating_mul(self.options.fallback_ms_per_word)
            .min(MAX_TIMESTAMP_MS);
        let total_ms = duration
            .map(seconds_to_ms)
            .filter(|ms| *ms > 0)
            .unwrap_or(estimated)
            .max(chunk_count);

        // Window bounds never exceed total_ms, so they fit back into u64
        let boundary = |i: u64| (total_ms as u128 * i as u128 / chunk_count as u128) as u64;

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let i = i as u64;
                let start_ms = boundary(i);
                let end_ms = boundary(i + 1).max(start_ms.saturating_add(1));
                NewCaption::new(start_ms, end_ms, chunk.join(" "))
            })
            .collect()
    }
}

/// Demo caption set installed when the editor is opened on a video that
/// has no captions yet
pub fn placeholder_captions() -> Vec<NewCaption> {
    vec![
        NewCaption::new(0, 3500, "Welcome to Captionly.io!"),
        NewCaption::new(3600, 7200, "This is a demo of our caption editor."),
        NewCaption::new(
            7300,
            12000,
            "You can edit these captions, adjust timings, and render your video with embedded subtitles.",
        ),
        NewCaption::new(12100, 18000, "Click on any caption to jump to that point in the video."),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(start, end, text)
    }

    #[test]
    fn test_segments_map_one_to_one_in_order() {
        let transcript = Transcript::Segmented {
            segments: vec![
                segment(0.0, 1.5, " Hello there "),
                segment(1.5, 3.25, "general"),
                segment(3.3, 4.0, "kenobi"),
            ],
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();

        assert_eq!(
            captions,
            vec![
                NewCaption::new(0, 1500, "Hello there"),
                NewCaption::new(1500, 3250, "general"),
                NewCaption::new(3300, 4000, "kenobi"),
            ]
        );
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        let transcript = Transcript::Segmented {
            segments: vec![
                segment(0.0, 1.0, "   "),
                segment(1.0, 2.0, "kept"),
                segment(2.0, 3.0, ""),
            ],
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();
        assert_eq!(captions.len(), 1);
        assert_eq!(captions[0].text, "kept");
    }

    #[test]
    fn test_degenerate_segment_timing_is_widened() {
        let transcript = Transcript::Segmented {
            segments: vec![segment(2.0, 2.0, "blink"), segment(5.0, 4.0, "backwards")],
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();
        for caption in &captions {
            assert!(caption.start_ms < caption.end_ms);
        }
        assert_eq!(captions[0].start_ms, 2000);
        assert_eq!(captions[1].start_ms, 5000);
    }

    #[test]
    fn test_huge_segment_timing_is_clamped() {
        let transcript = Transcript::Segmented {
            segments: vec![segment(1e300, 1e300, "late")],
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();
        assert_eq!(captions[0].start_ms, MAX_TIMESTAMP_MS);
        assert!(captions[0].start_ms < captions[0].end_ms);
    }

    #[test]
    fn test_huge_plain_text_duration_is_clamped() {
        let text = (1..=25).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let transcript = Transcript::PlainText {
            text,
            duration: Some(1e18),
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();

        assert_eq!(captions.len(), 3);
        assert_eq!(captions[0].start_ms, 0);
        assert_eq!(captions[2].end_ms, MAX_TIMESTAMP_MS);
        for pair in captions.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
        assert!(captions.iter().all(|c| c.start_ms < c.end_ms));
    }

    #[test]
    fn test_all_empty_segments_fail() {
        let transcript = Transcript::Segmented {
            segments: vec![segment(0.0, 1.0, " "), segment(1.0, 2.0, "\n")],
        };

        assert_eq!(
            CaptionSynthesizer::default().synthesize(&transcript),
            Err(SynthesisError::NoCaptionsGenerated)
        );
    }

    #[test]
    fn test_plain_text_chunks_of_ten_words() {
        let text = (1..=25).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let transcript = Transcript::PlainText {
            text,
            duration: Some(30.0),
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();

        assert_eq!(captions.len(), 3);
        assert_eq!(captions[0].text.split_whitespace().count(), 10);
        assert_eq!(captions[2].text, "w21 w22 w23 w24 w25");
        assert_eq!((captions[0].start_ms, captions[0].end_ms), (0, 10000));
        assert_eq!((captions[1].start_ms, captions[1].end_ms), (10000, 20000));
        assert_eq!((captions[2].start_ms, captions[2].end_ms), (20000, 30000));
    }

    #[test]
    fn test_plain_text_without_duration_uses_speaking_rate() {
        let transcript = Transcript::PlainText {
            text: "one two three four five".to_string(),
            duration: None,
        };

        let captions = CaptionSynthesizer::default().synthesize(&transcript).unwrap();
        assert_eq!(captions.len(), 1);
        assert_eq!(captions[0].end_ms, 5 * 400);
    }

    #[test]
    fn test_blank_plain_text_fails() {
        let transcript = Transcript::PlainText {
            text: " \t\n ".to_string(),
            duration: Some(12.0),
        };

        assert_eq!(
            CaptionSynthesizer::default().synthesize(&transcript),
            Err(SynthesisError::NoCaptionsGenerated)
        );
    }

    #[test]
    fn test_placeholder_set_is_well_formed() {
        let captions = placeholder_captions();
        assert_eq!(captions.len(), 4);
        for pair in captions.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
        assert!(captions.iter().all(|c| c.start_ms < c.end_ms && !c.text.is_empty()));
    }
}
