//! Video processing state machine
//!
//! [`VideoPipeline`] is the only component that writes `status` or
//! `rendered_path`. Every transition goes through a conditional update in
//! the record store, so two racing triggers cannot both claim a video.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::captions::{placeholder_captions, CaptionSynthesizer, SynthesisOptions};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::media::MediaStore;
use crate::models::{Caption, CaptionDraft, NewCaption, OwnerId, Video, VideoId};
use crate::processing::{self, Job, JobQueue};
use crate::render::MediaRenderer;
use crate::state::VideoStatus;
use crate::store::{RecordStore, StatusUpdate, StoreError};
use crate::transcription::TranscriptionEngine;

/// Pushed on every persisted status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub video_id: VideoId,
    pub status: VideoStatus,
    pub at: DateTime<Utc>,
}

/// A trigger was accepted and its job queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub video_id: VideoId,
    /// In-progress status the video was moved to
    pub status: VideoStatus,
}

/// What the caption editor works on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorSession {
    pub video: Video,
    pub captions: Vec<Caption>,
}

/// Collaborators injected into the pipeline
#[derive(Clone)]
pub struct Adapters {
    pub store: Arc<dyn RecordStore>,
    pub media: Arc<dyn MediaStore>,
    pub engine: Arc<dyn TranscriptionEngine>,
    pub renderer: MediaRenderer,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub synthesis: SynthesisOptions,
    pub signed_url_ttl_secs: u64,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            synthesis: SynthesisOptions::default(),
            signed_url_ttl_secs: 3600,
            max_concurrent_jobs: 2,
            queue_capacity: 64,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            synthesis: config.transcription.synthesis_options(),
            signed_url_ttl_secs: config.storage.signed_url_ttl_secs,
            max_concurrent_jobs: config.worker.max_concurrent_jobs.max(1),
            queue_capacity: config.worker.queue_capacity.max(1),
        }
    }
}

/// State shared between the caller-facing pipeline and its job workers
pub struct PipelineContext {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) media: Arc<dyn MediaStore>,
    pub(crate) engine: Arc<dyn TranscriptionEngine>,
    pub(crate) renderer: MediaRenderer,
    pub(crate) synthesizer: CaptionSynthesizer,
    events: broadcast::Sender<StatusEvent>,
}

impl PipelineContext {
    /// Move `id` from `from` to `to`, failing with `InvalidState` if the
    /// video is no longer in `from`
    pub(crate) async fn transition(
        &self,
        id: &VideoId,
        from: VideoStatus,
        to: VideoStatus,
        update: StatusUpdate,
    ) -> Result<Video> {
        if !from.can_transition_to(to) {
            return Err(PipelineError::invalid_state(id, &[to], from));
        }

        let video = self
            .store
            .update_video_status(id, Some(from), to, update)
            .await
            .map_err(|e| match e {
                StoreError::Conflict { actual, .. } => PipelineError::invalid_state(id, &[from], actual),
                StoreError::NotFound(id) => PipelineError::NotFound(id),
                other => PipelineError::Store(other),
            })?;

        info!("🔀 {}: {} -> {}", id, from, to);

        // No subscribers is not an error
        let _ = self.events.send(StatusEvent {
            video_id: id.clone(),
            status: to,
            at: video.updated_at,
        });

        Ok(video)
    }

    /// Record a job failure as `status = error`
    pub(crate) async fn fail(&self, id: &VideoId, from: VideoStatus, cause: &PipelineError) {
        error!("❌ Job on {} failed: {}", id, cause);

        if let Err(e) = self
            .transition(id, from, VideoStatus::Error, StatusUpdate::none())
            .await
        {
            warn!("⚠️ Could not mark {} as failed: {}", id, e);
        }
    }
}

/// Caller-facing operations of the caption pipeline
pub struct VideoPipeline {
    ctx: Arc<PipelineContext>,
    options: PipelineOptions,
    queue: Mutex<Option<JobQueue>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VideoPipeline {
    /// Build the pipeline and start its worker loop. Must be called from
    /// inside a tokio runtime.
    pub fn start(adapters: Adapters, options: PipelineOptions) -> Self {
        let (events, _) = broadcast::channel(256);

        let ctx = Arc::new(PipelineContext {
            store: adapters.store,
            media: adapters.media,
            engine: adapters.engine,
            renderer: adapters.renderer,
            synthesizer: CaptionSynthesizer::new(options.synthesis.clone()),
            events,
        });

        let (queue, receiver) = JobQueue::new(options.queue_capacity);
        let worker = processing::spawn_worker(ctx.clone(), receiver, options.max_concurrent_jobs);

        info!(
            "🔧 Pipeline started with {} workers (engine: {})",
            options.max_concurrent_jobs,
            ctx.engine.name()
        );

        Self {
            ctx,
            options,
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stop accepting jobs and wait for queued and running jobs to finish
    pub async fn shutdown(&self) {
        let queue = self.queue.lock().ok().and_then(|mut q| q.take());
        drop(queue);

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Worker loop ended abnormally: {}", e);
            }
        }

        info!("🛑 Pipeline stopped");
    }

    /// Push channel of status changes
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.ctx.events.subscribe()
    }

    /// Look up a video on behalf of `owner`
    async fn authorize(&self, id: &VideoId, owner: &OwnerId) -> Result<Video> {
        let video = self.ctx.store.get_video(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            other => PipelineError::Store(other),
        })?;

        if !video.is_owned_by(owner) {
            return Err(PipelineError::Forbidden(id.clone()));
        }

        Ok(video)
    }

    fn require_status(video: &Video, allowed: &[VideoStatus]) -> Result<()> {
        if allowed.contains(&video.status) {
            Ok(())
        } else {
            Err(PipelineError::invalid_state(&video.id, allowed, video.status))
        }
    }

    /// Hand a claimed video to the workers, undoing the claim if the queue
    /// is gone
    async fn dispatch(&self, job: Job, claimed: VideoStatus) -> Result<Accepted> {
        let video_id = job.video_id().clone();
        let queue = self.queue.lock().ok().and_then(|q| q.as_ref().cloned());

        let enqueued = match queue {
            Some(queue) => queue.enqueue(job).await.is_ok(),
            None => false,
        };

        if !enqueued {
            if let Some(previous) = claimed.revert_target() {
                self.ctx
                    .transition(&video_id, claimed, previous, StatusUpdate::none())
                    .await?;
            }
            return Err(PipelineError::QueueClosed);
        }

        Ok(Accepted {
            video_id,
            status: claimed,
        })
    }

    /// Accept a transcription request for a `ready` video. Returns as soon
    /// as the job is queued.
    pub async fn start_transcription(&self, id: &VideoId, owner: &OwnerId) -> Result<Accepted> {
        let video = self.authorize(id, owner).await?;
        Self::require_status(&video, &[VideoStatus::Ready])?;

        let limit = self.ctx.engine.max_file_size();
        if video.size_bytes > limit {
            warn!("🚫 {} is {} bytes, over the {} byte engine limit", id, video.size_bytes, limit);
            return Err(PipelineError::FileTooLarge {
                size: video.size_bytes,
                limit,
            });
        }

        self.ctx
            .transition(id, VideoStatus::Ready, VideoStatus::Transcribing, StatusUpdate::none())
            .await?;

        self.dispatch(Job::Transcribe(id.clone()), VideoStatus::Transcribing)
            .await
    }

    /// Accept a render request for a `captioned` video
    pub async fn start_render(&self, id: &VideoId, owner: &OwnerId) -> Result<Accepted> {
        let video = self.authorize(id, owner).await?;
        Self::require_status(&video, &[VideoStatus::Captioned])?;

        self.ctx
            .transition(id, VideoStatus::Captioned, VideoStatus::Rendering, StatusUpdate::none())
            .await?;

        let captions = match self.ctx.store.list_captions(id).await {
            Ok(captions) => captions,
            Err(e) => {
                self.ctx
                    .transition(id, VideoStatus::Rendering, VideoStatus::Captioned, StatusUpdate::none())
                    .await?;
                return Err(e.into());
            }
        };

        if captions.is_empty() {
            warn!("🚫 {} has no captions to render", id);
            self.ctx
                .transition(id, VideoStatus::Rendering, VideoStatus::Captioned, StatusUpdate::none())
                .await?;
            return Err(PipelineError::NoCaptions(id.clone()));
        }

        self.dispatch(Job::Render(id.clone()), VideoStatus::Rendering).await
    }

    /// Open the caption editor. A `ready` video without captions gets the
    /// placeholder set and moves to `captioned`; videos already carrying a
    /// caption set are returned unchanged.
    pub async fn open_editor(&self, id: &VideoId, owner: &OwnerId) -> Result<EditorSession> {
        let video = self.authorize(id, owner).await?;

        match video.status {
            VideoStatus::Uploading | VideoStatus::Transcribing => {
                Err(PipelineError::invalid_state(
                    id,
                    &[VideoStatus::Ready, VideoStatus::Captioned, VideoStatus::Rendered],
                    video.status,
                ))
            }
            VideoStatus::Ready => {
                let captions = self
                    .ctx
                    .store
                    .install_captions_if_empty(id, placeholder_captions())
                    .await?;

                let video = match self
                    .ctx
                    .transition(id, VideoStatus::Ready, VideoStatus::Captioned, StatusUpdate::none())
                    .await
                {
                    Ok(video) => video,
                    // Another editor session got there first
                    Err(PipelineError::InvalidState {
                        actual: VideoStatus::Captioned,
                        ..
                    }) => self.authorize(id, owner).await?,
                    Err(e) => return Err(e),
                };

                debug!("📝 Editor opened on {} with {} captions", id, captions.len());
                Ok(EditorSession { video, captions })
            }
            _ => {
                let captions = self.ctx.store.list_captions(id).await?;
                Ok(EditorSession { video, captions })
            }
        }
    }

    /// Replace the caption set with the editor's drafts
    pub async fn save_captions(
        &self,
        id: &VideoId,
        owner: &OwnerId,
        drafts: Vec<CaptionDraft>,
    ) -> Result<Vec<Caption>> {
        let video = self.authorize(id, owner).await?;
        Self::require_status(&video, &[VideoStatus::Captioned])?;

        let captions = validate_drafts(&drafts)?;
        if captions.is_empty() {
            return Err(PipelineError::NoCaptions(id.clone()));
        }

        let saved = self.ctx.store.replace_captions(id, captions).await?;
        info!("💾 Saved {} captions for {}", saved.len(), id);
        Ok(saved)
    }

    pub async fn list_captions(&self, id: &VideoId, owner: &OwnerId) -> Result<Vec<Caption>> {
        self.authorize(id, owner).await?;
        Ok(self.ctx.store.list_captions(id).await?)
    }

    /// Current record, for status polling
    pub async fn get_video(&self, id: &VideoId, owner: &OwnerId) -> Result<Video> {
        self.authorize(id, owner).await
    }

    /// Signed URL of the rendered artifact once available, else of the original
    pub async fn playback_url(&self, id: &VideoId, owner: &OwnerId) -> Result<Url> {
        let video = self.authorize(id, owner).await?;

        let path = match (&video.status, &video.rendered_path) {
            (VideoStatus::Rendered, Some(rendered)) => rendered.as_str(),
            _ => video.storage_path.as_str(),
        };

        Ok(self
            .ctx
            .media
            .signed_url(path, self.options.signed_url_ttl_secs)
            .await?)
    }

    /// Human re-initiation after a failure: back to `captioned` when the
    /// video has captions, otherwise to `ready`
    pub async fn reset_failed(&self, id: &VideoId, owner: &OwnerId) -> Result<Video> {
        let video = self.authorize(id, owner).await?;
        Self::require_status(&video, &[VideoStatus::Error])?;

        let has_captions = !self.ctx.store.list_captions(id).await?.is_empty();
        let target = if has_captions {
            VideoStatus::Captioned
        } else {
            VideoStatus::Ready
        };

        self.ctx
            .transition(id, VideoStatus::Error, target, StatusUpdate::none())
            .await
    }

    /// Recovery sweep after a crash: jobs do not survive a restart, so
    /// anything still marked in progress is moved to `error`. Only safe
    /// while no other process is running jobs against the same store.
    pub async fn recover_interrupted(&self) -> Result<Vec<VideoId>> {
        let mut recovered = Vec::new();

        for video in self.ctx.store.list_videos().await? {
            if !video.status.is_in_progress() {
                continue;
            }

            warn!("🩹 {} was left {} by a previous run", video.id, video.status);
            match self
                .ctx
                .transition(&video.id, video.status, VideoStatus::Error, StatusUpdate::none())
                .await
            {
                Ok(_) => recovered.push(video.id),
                Err(e) => warn!("⚠️ Could not recover {}: {}", video.id, e),
            }
        }

        if !recovered.is_empty() {
            info!("🩹 Marked {} interrupted videos as failed", recovered.len());
        }

        Ok(recovered)
    }

    /// Store an upload and make the video `ready`
    pub async fn register_upload(
        &self,
        owner: &OwnerId,
        title: &str,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<Video> {
        let id = VideoId::generate();
        let filename = Path::new(filename)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "video.mp4".to_string());
        let storage_path = format!("{}/{}/{}", owner, id, filename);
        let size_bytes = bytes.len() as u64;

        let video = Video::new(id.clone(), owner.clone(), title, storage_path.clone(), size_bytes);
        self.ctx.store.insert_video(video).await?;

        if let Err(e) = self
            .ctx
            .media
            .upload(&storage_path, bytes, content_type_for(&filename))
            .await
        {
            let e = PipelineError::from(e);
            self.ctx.fail(&id, VideoStatus::Uploading, &e).await;
            return Err(e);
        }

        info!("📤 Registered {} ({} bytes) as {}", filename, size_bytes, id);
        self.ctx
            .transition(&id, VideoStatus::Uploading, VideoStatus::Ready, StatusUpdate::none())
            .await
    }
}

/// Convert editor drafts into captions, dropping blank ones
fn validate_drafts(drafts: &[CaptionDraft]) -> Result<Vec<NewCaption>> {
    let mut captions = Vec::with_capacity(drafts.len());

    for (i, draft) in drafts.iter().enumerate() {
        let text = draft.text().trim();
        if text.is_empty() {
            continue;
        }

        let (start_ms, end_ms) = (draft.start_ms(), draft.end_ms());
        if start_ms >= end_ms {
            return Err(PipelineError::InvalidCaption(format!(
                "caption {} ends at {}ms, not after its start at {}ms",
                i + 1,
                end_ms,
                start_ms
            )));
        }

        captions.push(NewCaption::new(start_ms, end_ms, text));
    }

    Ok(captions)
}

fn content_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}
