use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::captions::SubtitleDocument;
use crate::error::{PipelineError, Result};
use crate::models::VideoId;
use crate::pipeline::PipelineContext;
use crate::state::VideoStatus;
use crate::store::StatusUpdate;

/// Unit of background work. The video has already been claimed (moved to
/// the in-progress status) when a job is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Transcribe(VideoId),
    Render(VideoId),
}

impl Job {
    pub fn video_id(&self) -> &VideoId {
        match self {
            Job::Transcribe(id) | Job::Render(id) => id,
        }
    }

    /// Status the video holds while this job runs
    pub fn claimed_status(&self) -> VideoStatus {
        match self {
            Job::Transcribe(_) => VideoStatus::Transcribing,
            Job::Render(_) => VideoStatus::Rendering,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Transcribe(_) => "transcription",
            Job::Render(_) => "render",
        }
    }
}

/// Sending half of the bounded job channel
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a job; waits while the queue is full. Gives the job back if the
    /// worker loop is gone.
    pub async fn enqueue(&self, job: Job) -> std::result::Result<(), Job> {
        debug!("📥 Queued {} job for {}", job.kind(), job.video_id());
        self.sender.send(job).await.map_err(|e| e.0)
    }
}

/// Start the worker loop. It ends once every `JobQueue` is dropped and all
/// running jobs have finished.
pub fn spawn_worker(
    ctx: Arc<PipelineContext>,
    receiver: mpsc::Receiver<Job>,
    max_concurrent: usize,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(ctx, receiver, max_concurrent.max(1)))
}

async fn run_worker(ctx: Arc<PipelineContext>, mut receiver: mpsc::Receiver<Job>, max_concurrent: usize) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    info!("👷 Worker loop running with {} slots", max_concurrent);

    while let Some(job) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            supervise(ctx, job).await;
            drop(permit);
        });
    }

    // Wait for in-flight jobs before reporting the loop as finished
    let _ = semaphore.acquire_many(max_concurrent as u32).await;
    info!("👷 Worker loop finished");
}

/// Run one job in its own task so that a panic inside it still ends with
/// `status = error`
async fn supervise(ctx: Arc<PipelineContext>, job: Job) {
    let id = job.video_id().clone();
    let claimed = job.claimed_status();
    let kind = job.kind();
    let start_time = Instant::now();

    info!("🚀 Starting {} job for {}", kind, id);

    let handle = tokio::spawn(execute(ctx.clone(), job));
    let outcome = match handle.await {
        Ok(result) => result,
        Err(join_error) => Err(PipelineError::JobPanicked(join_error.to_string())),
    };

    match outcome {
        Ok(()) => info!(
            "✅ {} job for {} finished in {:.1}s",
            kind,
            id,
            start_time.elapsed().as_secs_f64()
        ),
        Err(e) => {
            warn!(
                "{} job for {} failed after {:.1}s",
                kind,
                id,
                start_time.elapsed().as_secs_f64()
            );
            ctx.fail(&id, claimed, &e).await;
        }
    }
}

async fn execute(ctx: Arc<PipelineContext>, job: Job) -> Result<()> {
    match job {
        Job::Transcribe(id) => run_transcription(&ctx, &id).await,
        Job::Render(id) => run_render(&ctx, &id).await,
    }
}

/// fetch media, transcribe, synthesize, replace captions, back to `ready`
async fn run_transcription(ctx: &PipelineContext, id: &VideoId) -> Result<()> {
    let video = ctx.store.get_video(id).await?;

    let media = ctx.media.download(&video.storage_path).await?;
    debug!("📥 Downloaded {} bytes for {}", media.len(), id);

    let transcript = ctx.engine.transcribe(media, video.media_filename()).await?;
    let captions = ctx.synthesizer.synthesize(&transcript)?;

    let saved = ctx.store.replace_captions(id, captions).await?;
    info!("📝 Stored {} captions for {}", saved.len(), id);

    ctx.transition(id, VideoStatus::Transcribing, VideoStatus::Ready, StatusUpdate::none())
        .await?;
    Ok(())
}

/// fetch media and captions, build subtitles, burn in, upload, `rendered`
async fn run_render(ctx: &PipelineContext, id: &VideoId) -> Result<()> {
    let video = ctx.store.get_video(id).await?;

    let media = ctx.media.download(&video.storage_path).await?;
    let captions = ctx.store.list_captions(id).await?;
    if captions.is_empty() {
        return Err(PipelineError::NoCaptions(id.clone()));
    }

    let subtitles = SubtitleDocument::build(&captions);
    for issue in subtitles.validate() {
        warn!("⚠️ {}: {}", id, issue);
    }

    let rendered = ctx.renderer.render(&media, &subtitles).await?;

    let rendered_path = video.rendered_storage_path();
    ctx.media.upload(&rendered_path, rendered, "video/mp4").await?;
    info!("📤 Uploaded rendered video for {} to {}", id, rendered_path);

    ctx.transition(
        id,
        VideoStatus::Rendering,
        VideoStatus::Rendered,
        StatusUpdate::rendered(rendered_path),
    )
    .await
    .map_err(|e| {
        error!("Rendered output stored but status update failed for {}", id);
        e
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_claims() {
        let id = VideoId::new("v1");
        assert_eq!(Job::Transcribe(id.clone()).claimed_status(), VideoStatus::Transcribing);
        assert_eq!(Job::Render(id.clone()).claimed_status(), VideoStatus::Rendering);
        assert_eq!(Job::Render(id.clone()).video_id(), &id);
    }

    #[tokio::test]
    async fn test_enqueue_fails_once_receiver_is_gone() {
        let (queue, receiver) = JobQueue::new(4);
        drop(receiver);

        let job = Job::Transcribe(VideoId::new("v1"));
        assert_eq!(queue.enqueue(job.clone()).await, Err(job));
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let (queue, mut receiver) = JobQueue::new(4);
        queue.enqueue(Job::Transcribe(VideoId::new("a"))).await.unwrap();
        queue.enqueue(Job::Render(VideoId::new("b"))).await.unwrap();

        assert_eq!(receiver.recv().await, Some(Job::Transcribe(VideoId::new("a"))));
        assert_eq!(receiver.recv().await, Some(Job::Render(VideoId::new("b"))));
    }
}
