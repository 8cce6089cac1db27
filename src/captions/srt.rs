use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::models::Caption;

/// One SubRip block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleBlock {
    /// 1-based sequence number
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl SubtitleBlock {
    pub fn new(index: u32, start_ms: u64, end_ms: u64, text: &str) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            text: clean_text(text),
        }
    }
}

impl fmt::Display for SubtitleBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_timestamp(self.start_ms),
            format_timestamp(self.end_ms),
            self.text
        )
    }
}

/// SubRip subtitle track built from an ordered caption list
#[derive(Debug, Clone, Default)]
pub struct SubtitleDocument {
    blocks: Vec<SubtitleBlock>,
}

impl SubtitleDocument {
    /// Build a document from captions already sorted by start time.
    /// Blocks are numbered 1..n in the order given.
    pub fn build(captions: &[Caption]) -> Self {
        let blocks = captions
            .iter()
            .enumerate()
            .map(|(i, caption)| {
                SubtitleBlock::new((i + 1) as u32, caption.start_ms, caption.end_ms, &caption.text)
            })
            .collect();

        Self { blocks }
    }

    /// Parse SubRip text back into blocks
    pub fn parse(content: &str) -> Result<Self> {
        let normalized = content.replace("\r\n", "\n");
        let mut blocks = Vec::new();

        for raw in normalized.split("\n\n") {
            let raw = raw.trim_matches('\n');
            if raw.is_empty() {
                continue;
            }

            let mut lines = raw.lines();
            let index: u32 = lines
                .next()
                .ok_or_else(|| anyhow!("Missing block index"))?
                .trim()
                .parse()?;
            let timing = lines
                .next()
                .ok_or_else(|| anyhow!("Missing time range in block {}", index))?;
            let (start_ms, end_ms) = parse_time_range(timing)?;
            let text = lines.collect::<Vec<_>>().join("\n");

            blocks.push(SubtitleBlock {
                index,
                start_ms,
                end_ms,
                text,
            });
        }

        Ok(Self { blocks })
    }

    /// Render the document text; every block is followed by a blank line
    pub fn render(&self) -> String {
        let mut content = String::new();

        for block in &self.blocks {
            content.push_str(&block.to_string());
            content.push('\n');
        }

        content
    }

    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        tokio::fs::write(path.as_ref(), self.render()).await?;
        Ok(())
    }

    pub fn blocks(&self) -> &[SubtitleBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// End of the last block
    pub fn total_duration_ms(&self) -> u64 {
        self.blocks.iter().map(|b| b.end_ms).max().unwrap_or(0)
    }

    /// Report common problems without rejecting the document
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for block in &self.blocks {
            if block.end_ms <= block.start_ms {
                issues.push(format!("Block {}: End time is not after start time", block.index));
            }
            if block.text.trim().is_empty() {
                issues.push(format!("Block {}: Empty text", block.index));
            }
        }

        for pair in self.blocks.windows(2) {
            if pair[1].start_ms < pair[0].start_ms {
                issues.push(format!(
                    "Blocks {} and {}: Out of order",
                    pair[0].index, pair[1].index
                ));
            }
        }

        issues
    }
}

impl fmt::Display for SubtitleDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Format milliseconds as a SubRip timestamp (HH:MM:SS,mmm)
pub fn format_timestamp(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = ms % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Parse a single SubRip timestamp (HH:MM:SS,mmm) to milliseconds
pub fn parse_timestamp(timestamp: &str) -> Result<u64> {
    let (hms, millis) = timestamp
        .trim()
        .split_once(',')
        .ok_or_else(|| anyhow!("Invalid timestamp format: {}", timestamp))?;

    let hms_parts: Vec<&str> = hms.split(':').collect();
    if hms_parts.len() != 3 {
        return Err(anyhow!("Invalid time format: {}", hms));
    }

    let hours: u64 = hms_parts[0].parse()?;
    let minutes: u64 = hms_parts[1].parse()?;
    let seconds: u64 = hms_parts[2].parse()?;
    let millis: u64 = millis.parse()?;

    if minutes >= 60 || seconds >= 60 || millis >= 1000 {
        return Err(anyhow!("Timestamp component out of range: {}", timestamp));
    }

    Ok((hours * 3600 + minutes * 60 + seconds) * 1000 + millis)
}

/// Parse a `start --> end` line
pub fn parse_time_range(line: &str) -> Result<(u64, u64)> {
    let (start, end) = line
        .split_once(" --> ")
        .ok_or_else(|| anyhow!("Invalid time range: {}", line))?;
    Ok((parse_timestamp(start)?, parse_timestamp(end)?))
}

/// Blank lines inside caption text would terminate the block early
fn clean_text(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VideoId;

    fn caption(id: u32, start_ms: u64, end_ms: u64, text: &str) -> Caption {
        Caption {
            id,
            video_id: VideoId::new("v"),
            start_ms,
            end_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(format_timestamp(0), "00:00:00,000");
        assert_eq!(format_timestamp(3_723_456), "01:02:03,456");
        assert_eq!(format_timestamp(1500), "00:00:01,500");
        assert_eq!(format_timestamp(100 * 3_600_000), "100:00:00,000");
    }

    #[test]
    fn test_timestamp_parse_matches_format() {
        for ms in [0, 1, 999, 1000, 59_999, 3_599_999, 3_723_456, 86_400_000] {
            assert_eq!(parse_timestamp(&format_timestamp(ms)).unwrap(), ms);
        }
        assert!(parse_timestamp("00:00:01.500").is_err());
        assert!(parse_timestamp("00:61:00,000").is_err());
    }

    #[test]
    fn test_two_caption_document_is_exact() {
        let doc = SubtitleDocument::build(&[caption(1, 0, 3500, "a"), caption(2, 3600, 7200, "b")]);

        assert_eq!(
            doc.render(),
            "1\n00:00:00,000 --> 00:00:03,500\na\n\n2\n00:00:03,600 --> 00:00:07,200\nb\n\n"
        );
    }

    #[test]
    fn test_indices_follow_input_order() {
        let captions: Vec<Caption> = (0..5)
            .map(|i| caption(40 + i, i as u64 * 1000, i as u64 * 1000 + 900, "line"))
            .collect();
        let doc = SubtitleDocument::build(&captions);

        let indices: Vec<u32> = doc.blocks().iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert!(doc.validate().is_empty());
    }

    #[test]
    fn test_parse_recovers_block_timing() {
        let captions = vec![
            caption(1, 0, 3500, "first"),
            caption(2, 3600, 7200, "second\nline"),
            caption(3, 3_723_456, 3_724_000, "third"),
        ];
        let doc = SubtitleDocument::build(&captions);
        let parsed = SubtitleDocument::parse(&doc.render()).unwrap();

        assert_eq!(parsed.blocks(), doc.blocks());
        assert_eq!(parsed.total_duration_ms(), 3_724_000);
    }

    #[test]
    fn test_save_to_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("subtitles.srt");
        let doc = SubtitleDocument::build(&[caption(1, 0, 1000, "saved")]);

        tokio_test::block_on(doc.save_to_file(&path)).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1\n00:00:00,000 --> 00:00:01,000\nsaved\n\n"
        );
    }

    #[test]
    fn test_blank_lines_inside_text_are_removed() {
        let block = SubtitleBlock::new(1, 0, 10, "  top\n\n bottom  ");
        assert_eq!(block.text, "top\nbottom");
    }

    #[test]
    fn test_validation_flags_problems() {
        let doc = SubtitleDocument::build(&[caption(1, 5000, 4000, "late"), caption(2, 1000, 2000, " ")]);
        let issues = doc.validate();

        assert!(issues.iter().any(|i| i.contains("End time is not after start time")));
        assert!(issues.iter().any(|i| i.contains("Empty text")));
        assert!(issues.iter().any(|i| i.contains("Out of order")));
    }
}
