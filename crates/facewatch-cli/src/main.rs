use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_config::{
    poll_interval_from_fps, CaptureMode, ConfigSnapshot, ConfigStore, DEFAULT_WATCH_FPS,
};
use facewatch_core::detector::DetectParams;
use facewatch_core::{
    bootstrap_gallery, DuplicatePolicy, FacePipeline, Gallery, SFaceRecognizer, YuNetDetector,
};
use facewatch_hw::Camera;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod engine;

use engine::{FrameLoop, LogRenderer};

#[derive(Parser)]
#[command(name = "facewatch", about = "Live face identification against an enrolled gallery")]
struct Cli {
    /// Config file; re-read whenever it changes
    #[arg(long, default_value = "facewatch.toml", global = true)]
    config: PathBuf,
    /// Directory holding the models, the targets directory and video files
    #[arg(long, default_value = ".", global = true)]
    data_dir: PathBuf,
    /// How many times per second to check the config file for changes
    #[arg(long, default_value_t = DEFAULT_WATCH_FPS, global = true)]
    watch_fps: u32,
    /// Let a newly enrolled name replace earlier targets with the same name
    #[arg(long, global = true)]
    replace_duplicates: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and identify faces (default)
    Run,
    /// Enroll the targets directory and list the result
    Targets,
}

type Pipeline = FacePipeline<YuNetDetector, SFaceRecognizer>;

fn load_pipeline(config: &ConfigSnapshot, data_dir: &Path) -> Result<Pipeline> {
    let det_path = config.detection_model_path(data_dir);
    let detector = YuNetDetector::load(&det_path.to_string_lossy(), config.backend_target)
        .with_context(|| format!("loading detection model {}", det_path.display()))?;

    let rec_path = config.sface_model_path(data_dir);
    let recognizer = SFaceRecognizer::load(&rec_path.to_string_lossy(), config.backend_target)
        .with_context(|| format!("loading recognition model {}", rec_path.display()))?;

    Ok(FacePipeline::new(detector, recognizer))
}

fn enroll(
    pipeline: &mut Pipeline,
    config: &ConfigSnapshot,
    data_dir: &Path,
    policy: DuplicatePolicy,
) -> Result<Gallery> {
    let dir = config.targets_dir(data_dir);
    let params = DetectParams::default()
        .with_thresholds(config.detect_threshold, config.nms_threshold);
    let report = bootstrap_gallery(pipeline, &dir, params)?;

    let mut gallery = Gallery::with_policy(policy);
    gallery.add_all(report.targets);
    Ok(gallery)
}

fn list_targets(cli: &Cli) -> Result<()> {
    let config = facewatch_config::load(&cli.config);
    let mut pipeline = load_pipeline(&config, &cli.data_dir)?;
    let gallery = enroll(&mut pipeline, &config, &cli.data_dir, policy(cli))?;

    if gallery.is_empty() {
        println!("No targets enrolled from {}", config.targets_dir(&cli.data_dir).display());
    }
    for target in &gallery {
        println!("{:<24} {}-dim", target.name(), target.embedding().len());
    }
    Ok(())
}

fn policy(cli: &Cli) -> DuplicatePolicy {
    if cli.replace_duplicates {
        DuplicatePolicy::Replace
    } else {
        DuplicatePolicy::Coexist
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let store = ConfigStore::open(&cli.config);
    let config = store.current();

    if config.capture_mode == CaptureMode::Video {
        bail!(
            "video file input ({}) is not supported; set cap_or_video = 0 to use a camera",
            config.video_path(&cli.data_dir).display()
        );
    }

    let mut pipeline = load_pipeline(&config, &cli.data_dir)?;
    let gallery = enroll(&mut pipeline, &config, &cli.data_dir, policy(cli))?;
    if gallery.is_empty() {
        tracing::warn!("gallery is empty; every face will be reported as unknown");
    }

    let watcher = match store.start_watch(poll_interval_from_fps(cli.watch_fps)) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "config hot reload disabled");
            None
        }
    };

    let cancel = CancellationToken::new();
    let (done_tx, mut done_rx) = oneshot::channel();
    let cap_index = config.cap_index;
    let loop_store = store.clone();
    let loop_cancel = cancel.clone();

    std::thread::Builder::new()
        .name("facewatch-frames".into())
        .spawn(move || {
            let result = Camera::open_index(cap_index)
                .map_err(anyhow::Error::from)
                .and_then(|camera| {
                    let mut frames =
                        FrameLoop::new(camera, pipeline, gallery, loop_store, LogRenderer);
                    frames.run(&loop_cancel).map_err(anyhow::Error::from)
                });
            let _ = done_tx.send(result);
        })
        .context("spawning frame loop thread")?;

    let finished = tokio::select! {
        res = &mut done_rx => res,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down");
            cancel.cancel();
            (&mut done_rx).await
        }
    };

    if let Some(handle) = watcher {
        handle.stop().await;
    }

    let frames = finished.context("frame loop thread exited without a result")??;
    tracing::info!(frames, "facewatch stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run(&cli).await,
        Some(Commands::Targets) => list_targets(&cli),
    }
}
