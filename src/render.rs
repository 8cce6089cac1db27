//! Subtitle burn-in
//!
//! [`MediaRenderer`] owns the scoped workspace and output verification;
//! the actual encoding is delegated to an [`Encoder`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::captions::SubtitleDocument;
use crate::config::RenderConfig;

const INPUT_FILE: &str = "input.mp4";
const SUBTITLES_FILE: &str = "subtitles.srt";
const OUTPUT_FILE: &str = "output.mp4";

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Render workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Failed to start encoder {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Encoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Encoder produced no output file")]
    MissingOutput,

    #[error("Encoder killed after {0}s")]
    Timeout(u64),
}

/// Fixed caption look used for every render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleStyle {
    pub font_name: String,
    pub font_size: u32,
    /// ASS colour, `&HAABBGGRR`
    pub primary_colour: String,
    pub outline_colour: String,
    pub border_style: u8,
    pub outline: u8,
    pub shadow: u8,
    /// Distance from the bottom edge in pixels
    pub margin_v: u32,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: "Arial".to_string(),
            font_size: 24,
            primary_colour: "&H00FFFFFF".to_string(),
            outline_colour: "&H00000000".to_string(),
            border_style: 1,
            outline: 1,
            shadow: 1,
            margin_v: 20,
        }
    }
}

impl SubtitleStyle {
    /// `force_style` value for the ffmpeg subtitles filter
    pub fn force_style(&self) -> String {
        format!(
            "FontName={},FontSize={},PrimaryColour={},OutlineColour={},BorderStyle={},Outline={},Shadow={},MarginV={}",
            self.font_name,
            self.font_size,
            self.primary_colour,
            self.outline_colour,
            self.border_style,
            self.outline,
            self.shadow,
            self.margin_v
        )
    }
}

/// Capability that burns a subtitle file into a video file
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        output: &Path,
        style: &SubtitleStyle,
    ) -> Result<(), RenderError>;

    fn name(&self) -> &str;
}

/// Encoder running the ffmpeg command line tool
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    /// `None` lets ffmpeg run to completion
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }

    /// Check if ffmpeg is available
    pub async fn check_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn build_args(input: &Path, subtitles: &Path, output: &Path, style: &SubtitleStyle) -> Vec<String> {
        let filter = format!(
            "subtitles='{}':force_style='{}'",
            escape_filter_path(subtitles),
            style.force_style()
        );

        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            filter,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        output: &Path,
        style: &SubtitleStyle,
    ) -> Result<(), RenderError> {
        let args = Self::build_args(input, subtitles, output, style);
        debug!("ffmpeg args: {:?}", args);

        // The child is killed if the future below is dropped on timeout
        let run = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| RenderError::Timeout(limit.as_secs()))?,
            None => run.await,
        };

        let output = result.map_err(|source| RenderError::Spawn {
            program: self.ffmpeg_path.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Failed {
                status: output.status.to_string(),
                stderr: stderr_tail(&stderr, 20),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Escape a path for use inside a single-quoted filter argument
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Last `lines` lines of encoder output; ffmpeg puts the actual error at the end
fn stderr_tail(stderr: &str, lines: usize) -> String {
    let all: Vec<&str> = stderr.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Scratch directory exclusive to one render, deleted when dropped
pub struct RenderWorkspace {
    dir: TempDir,
}

impl RenderWorkspace {
    pub fn create(parent: Option<&Path>) -> Result<Self, RenderError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("captionly-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join(INPUT_FILE)
    }

    pub fn subtitles_path(&self) -> PathBuf {
        self.dir.path().join(SUBTITLES_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_FILE)
    }
}

/// Produces captioned video bytes from original bytes and a subtitle track
#[derive(Clone)]
pub struct MediaRenderer {
    encoder: Arc<dyn Encoder>,
    style: SubtitleStyle,
    work_dir: Option<PathBuf>,
}

impl MediaRenderer {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self {
            encoder,
            style: SubtitleStyle::default(),
            work_dir: None,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(Arc::new(FfmpegEncoder::new(config))).with_work_dir(config.work_dir.clone())
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    /// Burn `subtitles` into `video`. The workspace is removed on every
    /// exit path, including panics inside the encoder.
    pub async fn render(&self, video: &[u8], subtitles: &SubtitleDocument) -> Result<Vec<u8>, RenderError> {
        let start_time = Instant::now();
        let workspace = RenderWorkspace::create(self.work_dir.as_deref())?;
        debug!("📁 Render workspace: {}", workspace.path().display());

        tokio::fs::write(workspace.input_path(), video).await?;
        subtitles
            .save_to_file(workspace.subtitles_path())
            .await
            .map_err(|e| RenderError::Workspace(std::io::Error::other(e.to_string())))?;

        info!(
            "🎬 Burning {} subtitle blocks into {:.1} MB with {}",
            subtitles.len(),
            video.len() as f64 / 1_000_000.0,
            self.encoder.name()
        );

        self.encoder
            .burn_subtitles(
                &workspace.input_path(),
                &workspace.subtitles_path(),
                &workspace.output_path(),
                &self.style,
            )
            .await?;

        let rendered = match tokio::fs::read(workspace.output_path()).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!("⚠️ Encoder reported success but output is empty");
                return Err(RenderError::MissingOutput);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("⚠️ Encoder reported success but wrote no output");
                return Err(RenderError::MissingOutput);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "✅ Rendered {:.1} MB in {:.1}s",
            rendered.len() as f64 / 1_000_000.0,
            start_time.elapsed().as_secs_f64()
        );

        Ok(rendered)
    }
}
