use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::captions::SynthesisOptions;

/// Configuration for the caption pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Media and record storage locations
    pub storage: StorageConfig,

    /// Transcription engine settings
    pub transcription: TranscriptionConfig,

    /// Subtitle burn-in settings
    pub render: RenderConfig,

    /// Background job execution
    pub worker: WorkerConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem media store
    pub media_root: PathBuf,

    /// Directory holding video/caption records
    pub state_dir: PathBuf,

    /// Lifetime of signed playback URLs
    pub signed_url_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// OpenAI-compatible transcription endpoint
    pub endpoint: String,

    /// Bearer token for the endpoint
    pub api_key: Option<String>,

    /// Model to request
    pub model: String,

    /// Language hint
    pub language: Option<String>,

    /// Per-attempt request timeout (seconds)
    pub timeout_secs: u64,

    /// Additional attempts after a transient failure
    pub max_retries: u32,

    /// Base delay between attempts, multiplied by the attempt number
    pub retry_delay_ms: u64,

    /// Largest media file accepted for transcription (bytes)
    pub max_file_size: u64,

    /// Words per caption when the engine returns no timing
    pub words_per_caption: usize,

    /// Assumed speaking rate when the engine returns no timing or duration
    pub fallback_ms_per_word: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Hard limit on one encoder run (seconds, 0 = no limit)
    pub timeout_secs: u64,

    /// Parent directory for render workspaces (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Jobs executed at the same time
    pub max_concurrent_jobs: usize,

    /// Jobs waiting in the queue before triggers block
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or tracing filter directive
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("./data/media"),
            state_dir: PathBuf::from("./data/state"),
            signed_url_ttl_secs: 3600, // 1 hour
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            language: None,
            timeout_secs: 60,
            max_retries: 2,
            retry_delay_ms: 500,
            max_file_size: 25 * 1024 * 1024, // engine upload limit
            words_per_caption: 10,
            fallback_ms_per_word: 400, // ~150 words per minute
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: which::which("ffmpeg").map_or_else(
                |_| "ffmpeg".to_string(),
                |p| p.to_string_lossy().to_string(),
            ),
            timeout_secs: 1800, // 30 minutes
            work_dir: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: num_cpus::get().min(2),
            queue_capacity: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TranscriptionConfig {
    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            words_per_caption: self.words_per_caption,
            fallback_ms_per_word: self.fallback_ms_per_word,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to environment variables
    pub fn load() -> Result<Self> {
        let config_paths = ["captionly.toml", "config/captionly.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path);
        Ok(config.with_env_overrides())
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("CAPTIONLY_MEDIA_ROOT") {
            self.storage.media_root = PathBuf::from(root);
        }

        if let Ok(dir) = std::env::var("CAPTIONLY_STATE_DIR") {
            self.storage.state_dir = PathBuf::from(dir);
        }

        if let Ok(endpoint) = std::env::var("CAPTIONLY_TRANSCRIPTION_ENDPOINT") {
            self.transcription.endpoint = endpoint;
        }

        if let Ok(api_key) = std::env::var("CAPTIONLY_API_KEY") {
            self.transcription.api_key = Some(api_key);
        }

        if let Ok(ffmpeg) = std::env::var("CAPTIONLY_FFMPEG") {
            self.render.ffmpeg_path = ffmpeg;
        }

        if let Ok(workers) = std::env::var("CAPTIONLY_WORKERS") {
            match workers.parse() {
                Ok(n) => self.worker.max_concurrent_jobs = n,
                Err(_) => tracing::warn!("Ignoring invalid CAPTIONLY_WORKERS: {}", workers),
            }
        }

        if let Ok(level) = std::env::var("CAPTIONLY_LOG_LEVEL") {
            self.logging.level = level;
        }

        self
    }

    /// Validate configuration and create missing directories
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrent_jobs == 0 {
            return Err(anyhow!("max_concurrent_jobs must be greater than 0"));
        }

        if self.worker.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be greater than 0"));
        }

        if self.transcription.max_file_size == 0 {
            return Err(anyhow!("max_file_size must be greater than 0"));
        }

        if self.transcription.timeout_secs == 0 {
            return Err(anyhow!("transcription timeout_secs must be greater than 0"));
        }

        if self.transcription.words_per_caption == 0 {
            return Err(anyhow!("words_per_caption must be greater than 0"));
        }

        if self.transcription.endpoint.trim().is_empty() {
            return Err(anyhow!("transcription endpoint required"));
        }

        for dir in [&self.storage.media_root, &self.storage.state_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| anyhow!("Cannot create directory {}: {}", dir.display(), e))?;
            }
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Captionly Pipeline Configuration:\n\
            - Media root: {}\n\
            - State dir: {}\n\
            - Transcription: {} ({}), timeout {}s, {} retries\n\
            - Max file size: {:.1} MB\n\
            - ffmpeg: {} (timeout {}s)\n\
            - Workers: {}",
            self.storage.media_root.display(),
            self.storage.state_dir.display(),
            self.transcription.endpoint,
            self.transcription.model,
            self.transcription.timeout_secs,
            self.transcription.max_retries,
            self.transcription.max_file_size as f64 / 1_048_576.0,
            self.render.ffmpeg_path,
            self.render.timeout_secs,
            self.worker.max_concurrent_jobs,
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_media_root(mut self, dir: PathBuf) -> Self {
        self.config.storage.media_root = dir;
        self
    }

    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.state_dir = dir;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.transcription.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.transcription.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.config.transcription.max_file_size = bytes;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.worker.max_concurrent_jobs = workers;
        self
    }

    pub fn with_render_timeout(mut self, secs: u64) -> Self {
        self.config.render.timeout_secs = secs;
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.config.render.work_dir = Some(dir);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transcription.timeout_secs, 60);
        assert_eq!(config.transcription.max_retries, 2);
        assert_eq!(config.transcription.words_per_caption, 10);
        assert_eq!(config.storage.signed_url_ttl_secs, 3600);
        assert!(config.worker.max_concurrent_jobs >= 1);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_workers(8)
            .with_max_file_size(1024)
            .with_api_key("sk-test")
            .build();

        assert_eq!(config.worker.max_concurrent_jobs, 8);
        assert_eq!(config.transcription.max_file_size, 1024);
        assert_eq!(config.transcription.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transcription]
            model = "large-v3"
            max_retries = 5

            [render]
            timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.transcription.model, "large-v3");
        assert_eq!(config.transcription.max_retries, 5);
        assert_eq!(config.transcription.timeout_secs, 60);
        assert_eq!(config.render.timeout_secs, 0);
        assert_eq!(config.storage.signed_url_ttl_secs, 3600);
    }

    #[test]
    fn test_config_validation() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .with_media_root(temp_dir.path().join("media"))
            .with_state_dir(temp_dir.path().join("state"))
            .build();

        assert!(config.validate().is_ok());
        assert!(temp_dir.path().join("media").exists());

        let broken = ConfigBuilder::new()
            .with_media_root(temp_dir.path().join("media"))
            .with_state_dir(temp_dir.path().join("state"))
            .with_workers(0)
            .build();
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = ConfigBuilder::new().with_endpoint("http://localhost:8080/inference").build();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.transcription.endpoint, "http://localhost:8080/inference");
    }
}
