use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use captionly_pipeline::{
    Adapters, CaptionDraft, Config, FsMediaStore, JsonRecordStore, MediaRenderer, OwnerId,
    PipelineOptions, VideoId, VideoPipeline, VideoStatus, WhisperApiEngine,
};

fn video_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("video-id")
                .value_name("ID")
                .help("Video identifier")
                .required(true),
        )
}

fn cli() -> Command {
    Command::new("captionly")
        .version("0.1.0")
        .about("Captionly background media pipeline")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default: captionly.toml, then environment)")
                .global(true),
        )
        .arg(
            Arg::new("owner")
                .short('u')
                .long("owner")
                .value_name("USER")
                .help("Acting user")
                .default_value("local")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("import")
                .about("Store a video file and mark it ready")
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .help("Video file to import")
                        .required(true),
                )
                .arg(
                    Arg::new("title")
                        .short('t')
                        .long("title")
                        .value_name("TITLE")
                        .help("Video title (default: file name)"),
                ),
        )
        .subcommand(
            video_args(Command::new("transcribe").about("Transcribe a ready video and wait")),
        )
        .subcommand(
            video_args(Command::new("edit").about("Open the caption editor, optionally saving captions"))
                .arg(
                    Arg::new("captions")
                        .long("captions")
                        .value_name("FILE")
                        .help("JSON array of captions ({start, end, text} in seconds or {start_ms, end_ms, text})"),
                ),
        )
        .subcommand(video_args(Command::new("render").about("Burn captions into the video and wait")))
        .subcommand(video_args(Command::new("status").about("Show the video record")))
        .subcommand(video_args(Command::new("url").about("Print a signed playback URL")))
        .subcommand(video_args(Command::new("reset").about("Re-initiate a failed video")))
        .subcommand(Command::new("recover").about(
            "Mark videos left transcribing or rendering by a stopped process as failed. \
             Only run this while no other captionly process uses the store.",
        ))
}

fn init_logging(config: &Config, verbose: bool) {
    let default_filter = if verbose {
        "captionly_pipeline=debug,captionly=debug,info".to_string()
    } else if config.logging.level.contains('=') {
        config.logging.level.clone()
    } else {
        format!(
            "captionly_pipeline={level},captionly={level},warn",
            level = config.logging.level
        )
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_pipeline(config: &Config) -> Result<VideoPipeline> {
    let store = JsonRecordStore::new(config.storage.state_dir.clone())
        .await
        .context("Failed to open record store")?;
    let media = FsMediaStore::new(config.storage.media_root.clone())
        .await
        .context("Failed to open media store")?;
    let engine = WhisperApiEngine::new(config.transcription.clone())
        .context("Failed to configure transcription engine")?;

    let adapters = Adapters {
        store: Arc::new(store),
        media: Arc::new(media),
        engine: Arc::new(engine),
        renderer: MediaRenderer::from_config(&config.render),
    };

    Ok(VideoPipeline::start(adapters, PipelineOptions::from_config(config)))
}

/// Block until the video reaches one of `terminal`
async fn wait_for(
    pipeline: &VideoPipeline,
    events: &mut tokio::sync::broadcast::Receiver<captionly_pipeline::StatusEvent>,
    id: &VideoId,
    owner: &OwnerId,
    terminal: &[VideoStatus],
) -> Result<VideoStatus> {
    loop {
        match events.recv().await {
            Ok(event) if &event.video_id == id && terminal.contains(&event.status) => {
                return Ok(event.status);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} status events, polling", skipped);
                let video = pipeline.get_video(id, owner).await?;
                if terminal.contains(&video.status) {
                    return Ok(video.status);
                }
            }
            Err(RecvError::Closed) => return Err(anyhow!("Status channel closed")),
        }
    }
}

fn video_id(matches: &ArgMatches) -> Result<VideoId> {
    matches
        .get_one::<String>("video-id")
        .map(VideoId::new)
        .ok_or_else(|| anyhow!("Video id required"))
}

async fn run(pipeline: &VideoPipeline, owner: &OwnerId, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("import", sub)) => {
            let file = sub
                .get_one::<String>("file")
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("File required"))?;
            let filename = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "video.mp4".to_string());
            let title = sub.get_one::<String>("title").cloned().unwrap_or_else(|| filename.clone());

            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let video = pipeline.register_upload(owner, &title, bytes, &filename).await?;

            info!("📹 Imported {} as {}", file.display(), video.id);
            println!("{}", video.id);
        }
        Some(("transcribe", sub)) => {
            let id = video_id(sub)?;
            let mut events = pipeline.subscribe();
            let accepted = pipeline.start_transcription(&id, owner).await?;
            info!("⏳ {} is {}", accepted.video_id, accepted.status);

            let status = wait_for(
                pipeline,
                &mut events,
                &id,
                owner,
                &[VideoStatus::Ready, VideoStatus::Error],
            )
            .await?;
            let captions = pipeline.list_captions(&id, owner).await?;
            println!("{} ({} captions)", status, captions.len());
        }
        Some(("edit", sub)) => {
            let id = video_id(sub)?;
            let session = pipeline.open_editor(&id, owner).await?;

            let captions = match sub.get_one::<String>("captions") {
                Some(path) => {
                    let content = tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Cannot read {}", path))?;
                    let drafts: Vec<CaptionDraft> =
                        serde_json::from_str(&content).context("Invalid caption file")?;
                    pipeline.save_captions(&id, owner, drafts).await?
                }
                None => session.captions,
            };

            println!("{}", serde_json::to_string_pretty(&captions)?);
        }
        Some(("render", sub)) => {
            let id = video_id(sub)?;
            let mut events = pipeline.subscribe();
            let accepted = pipeline.start_render(&id, owner).await?;
            info!("⏳ {} is {}", accepted.video_id, accepted.status);

            let status = wait_for(
                pipeline,
                &mut events,
                &id,
                owner,
                &[VideoStatus::Rendered, VideoStatus::Error],
            )
            .await?;
            println!("{}", status);
        }
        Some(("status", sub)) => {
            let video = pipeline.get_video(&video_id(sub)?, owner).await?;
            println!("{}", serde_json::to_string_pretty(&video)?);
        }
        Some(("url", sub)) => {
            let url = pipeline.playback_url(&video_id(sub)?, owner).await?;
            println!("{}", url);
        }
        Some(("reset", sub)) => {
            let video = pipeline.reset_failed(&video_id(sub)?, owner).await?;
            println!("{}", video.status);
        }
        Some(("recover", _)) => {
            let recovered = pipeline.recover_interrupted().await?;
            for id in &recovered {
                println!("{}", id);
            }
            info!("🧹 Recovered {} interrupted video(s)", recovered.len());
        }
        _ => return Err(anyhow!("Unknown command")),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    init_logging(&config, matches.get_flag("verbose"));

    config.validate()?;
    info!("🚀 Captionly pipeline starting...");
    tracing::debug!("{}", config.summary());

    let owner = OwnerId::new(
        matches
            .get_one::<String>("owner")
            .cloned()
            .unwrap_or_else(|| "local".to_string()),
    );

    let pipeline = build_pipeline(&config).await?;

    let result = run(&pipeline, &owner, &matches).await;
    pipeline.shutdown().await;
    result
}
