use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{Caption, NewCaption, Video, VideoId};
use crate::state::VideoStatus;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Video not found: {0}")]
    NotFound(VideoId),

    #[error("Video already exists: {0}")]
    AlreadyExists(VideoId),

    #[error("Status conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: VideoId,
        expected: VideoStatus,
        actual: VideoStatus,
    },

    #[error("Record I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Extra fields written together with a status change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub rendered_path: Option<String>,
}

impl StatusUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn rendered(path: impl Into<String>) -> Self {
        Self {
            rendered_path: Some(path.into()),
        }
    }
}

/// Persistent video and caption records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_video(&self, video: Video) -> Result<Video, StoreError>;

    async fn get_video(&self, id: &VideoId) -> Result<Video, StoreError>;

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError>;

    /// Set the status, but only if the current status equals `expected`
    /// (when given). The check and the write happen atomically.
    async fn update_video_status(
        &self,
        id: &VideoId,
        expected: Option<VideoStatus>,
        new_status: VideoStatus,
        update: StatusUpdate,
    ) -> Result<Video, StoreError>;

    /// Delete every caption of the video and insert `captions` in one step
    async fn replace_captions(
        &self,
        id: &VideoId,
        captions: Vec<NewCaption>,
    ) -> Result<Vec<Caption>, StoreError>;

    /// Insert `captions` only when the video has none; returns whatever set
    /// the video ends up with
    async fn install_captions_if_empty(
        &self,
        id: &VideoId,
        captions: Vec<NewCaption>,
    ) -> Result<Vec<Caption>, StoreError>;

    /// Captions ordered by start time, ties kept in insertion order
    async fn list_captions(&self, id: &VideoId) -> Result<Vec<Caption>, StoreError>;
}

/// One video with its captions; the unit written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VideoRecord {
    video: Video,
    captions: Vec<Caption>,
    next_caption_id: u32,
}

impl VideoRecord {
    fn new(video: Video) -> Self {
        Self {
            video,
            captions: Vec::new(),
            next_caption_id: 1,
        }
    }

    fn set_captions(&mut self, captions: Vec<NewCaption>) {
        let video_id = self.video.id.clone();
        let mut next_id = self.next_caption_id;

        self.captions = captions
            .into_iter()
            .map(|caption| {
                let id = next_id;
                next_id += 1;
                Caption {
                    id,
                    video_id: video_id.clone(),
                    start_ms: caption.start_ms,
                    end_ms: caption.end_ms,
                    text: caption.text,
                }
            })
            .collect();

        self.next_caption_id = next_id;
        self.video.updated_at = Utc::now();
    }

    fn sorted_captions(&self) -> Vec<Caption> {
        let mut captions = self.captions.clone();
        // Stable sort keeps insertion order for equal start times
        captions.sort_by_key(|c| c.start_ms);
        captions
    }
}

/// Record store keeping every video in memory, optionally mirrored to one
/// JSON file per video
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    /// Directory for record files; `None` keeps everything in memory
    state_dir: Option<PathBuf>,

    records: Arc<RwLock<HashMap<VideoId, VideoRecord>>>,
}

impl JsonRecordStore {
    /// Open a store persisted under `state_dir`, loading existing records
    pub async fn new(state_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&state_dir).await?;

        let store = Self {
            state_dir: Some(state_dir),
            records: Arc::new(RwLock::new(HashMap::new())),
        };

        let loaded = store.load_existing_records().await?;
        info!("📊 Record store initialized with {} videos", loaded);

        Ok(store)
    }

    /// Store without any disk persistence
    pub fn in_memory() -> Self {
        Self {
            state_dir: None,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn load_existing_records(&self) -> Result<usize, StoreError> {
        let Some(state_dir) = &self.state_dir else {
            return Ok(0);
        };

        let mut entries = fs::read_dir(state_dir).await?;
        let mut records = self.records.write().await;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match load_record_file(&path).await {
                    Ok(record) => {
                        records.insert(record.video.id.clone(), record);
                    }
                    Err(e) => {
                        warn!("Failed to load record file {}: {}", path.display(), e);
                    }
                }
            }
        }

        debug!("📁 Loaded {} record files from disk", records.len());
        Ok(records.len())
    }

    /// Write a record to disk. Callers hold the write lock and only update
    /// the cache after this succeeds.
    async fn persist(&self, record: &VideoRecord) -> Result<(), StoreError> {
        let Some(state_dir) = &self.state_dir else {
            return Ok(());
        };

        let path = state_dir.join(record_file_name(&record.video.id));
        let tmp_path = path.with_extension("json.tmp");
        let json_content = serde_json::to_string_pretty(record)?;

        fs::write(&tmp_path, json_content).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("💾 Persisted record for {}", record.video.id);
        Ok(())
    }
}

async fn load_record_file(path: &Path) -> Result<VideoRecord, StoreError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

fn record_file_name(id: &VideoId) -> String {
    let safe: String = id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.json", safe)
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn insert_video(&self, video: Video) -> Result<Video, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&video.id) {
            return Err(StoreError::AlreadyExists(video.id));
        }

        let record = VideoRecord::new(video.clone());
        self.persist(&record).await?;
        records.insert(video.id.clone(), record);

        Ok(video)
    }

    async fn get_video(&self, id: &VideoId) -> Result<Video, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .map(|record| record.video.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        let mut videos: Vec<Video> = self
            .records
            .read()
            .await
            .values()
            .map(|record| record.video.clone())
            .collect();
        videos.sort_by_key(|v| v.created_at);
        Ok(videos)
    }

    async fn update_video_status(
        &self,
        id: &VideoId,
        expected: Option<VideoStatus>,
        new_status: VideoStatus,
        update: StatusUpdate,
    ) -> Result<Video, StoreError> {
        let mut records = self.records.write().await;
        let current = records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if let Some(expected) = expected {
            if current.video.status != expected {
                return Err(StoreError::Conflict {
                    id: id.clone(),
                    expected,
                    actual: current.video.status,
                });
            }
        }

        let mut record = current.clone();
        record.video.status = new_status;
        record.video.updated_at = Utc::now();
        if let Some(rendered_path) = update.rendered_path {
            record.video.rendered_path = Some(rendered_path);
        }

        self.persist(&record).await?;
        let video = record.video.clone();
        records.insert(id.clone(), record);

        Ok(video)
    }

    async fn replace_captions(
        &self,
        id: &VideoId,
        captions: Vec<NewCaption>,
    ) -> Result<Vec<Caption>, StoreError> {
        let mut records = self.records.write().await;
        let mut record = records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let previous = record.captions.len();
        record.set_captions(captions);
        self.persist(&record).await?;

        debug!(
            "📝 Replaced {} captions with {} for {}",
            previous,
            record.captions.len(),
            id
        );

        let sorted = record.sorted_captions();
        records.insert(id.clone(), record);
        Ok(sorted)
    }

    async fn install_captions_if_empty(
        &self,
        id: &VideoId,
        captions: Vec<NewCaption>,
    ) -> Result<Vec<Caption>, StoreError> {
        let mut records = self.records.write().await;
        let mut record = records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if !record.captions.is_empty() {
            return Ok(record.sorted_captions());
        }

        record.set_captions(captions);
        self.persist(&record).await?;

        let sorted = record.sorted_captions();
        records.insert(id.clone(), record);
        Ok(sorted)
    }

    async fn list_captions(&self, id: &VideoId) -> Result<Vec<Caption>, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .map(VideoRecord::sorted_captions)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
