//! gesture_hubd - pointing-gesture appliance control daemon
//!
//! 1. Loads the classifier and opens the camera
//! 2. Classifies every frame and debounces pointing gestures into on/off toggles
//! 3. Posts each toggle phrase to the home-automation hub off the frame path
//! 4. Serves the annotated MJPEG stream and live metrics over HTTP

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gesture_hub::{
    api::ApiServer,
    classify::{open_backend, ClassifierSession, InferenceMode},
    config::GestureHubConfig,
    dispatch::{CommandSink, DispatchStats, Dispatcher, HubSink, LogSink},
    gesture::GestureDebouncer,
    ingest::open_source,
    live::LiveState,
    pipeline::{Pipeline, PipelineOptions},
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Toggle home appliances by pointing at them in front of a camera"
)]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "GESTURE_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the video and metrics endpoints (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Camera URL: stub://name, http(s)://..., or /dev/videoN (overrides config).
    #[arg(long)]
    camera: Option<String>,

    /// Model file: ONNX for the tract backend, JSON script for the scripted backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Log commands instead of posting them to the hub.
    #[arg(long)]
    dry_run: bool,

    /// Classify and print scores only: no dispatch, no HTTP server.
    #[arg(long)]
    preview: bool,

    /// Log every frame's scores, top label and FPS.
    #[arg(long)]
    print_scores: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = GestureHubConfig::load_from(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        cfg.stream.listen_addr = listen;
    }
    if let Some(camera) = args.camera {
        cfg.camera.url = camera;
    }
    if let Some(model) = args.model {
        cfg.model.path = Some(model);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let session = ClassifierSession::open(open_backend(&cfg.model)?)?;
    let info = session.info().clone();
    log::info!("model labels: {}", info.labels.join(", "));
    if info.mode == InferenceMode::Classification {
        for label in cfg
            .gesture
            .targets
            .iter()
            .chain(std::iter::once(&cfg.gesture.neutral_label))
        {
            if !info.labels.contains(label) {
                log::warn!("label '{}' is not produced by the model; it will never fire", label);
            }
        }
    } else {
        log::info!("detection model: gestures disabled, counting objects only");
    }

    let source = open_source(&cfg.camera)?;
    log::info!(
        "camera {} ({}x{} requested, {} fps)",
        source.describe(),
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.target_fps
    );

    let debouncer = GestureDebouncer::new(cfg.gesture.clone(), cfg.hub.phrase_table()?)?;
    let stats = Arc::new(DispatchStats::default());
    let dispatcher = if args.preview {
        None
    } else {
        Some(Dispatcher::spawn(
            command_sink(&cfg, args.dry_run),
            cfg.hub.queue_capacity,
            stats.clone(),
        )?)
    };

    let live = Arc::new(LiveState::new(stats));
    let api_handle = if args.preview {
        None
    } else {
        let handle = ApiServer::new(cfg.stream.clone(), live.clone()).spawn()?;
        log::info!("video feed at http://{}/video_feed", handle.addr);
        Some(handle)
    };

    let options = PipelineOptions {
        jpeg_quality: cfg.stream.jpeg_quality,
        stream_frames: !args.preview,
        print_scores: args.preview || args.print_scores,
        ..PipelineOptions::default()
    };
    let pipeline = Pipeline::new(source, session, debouncer, dispatcher, live, options)
        .spawn(shutdown.clone())?;

    while !shutdown.load(Ordering::SeqCst) && !pipeline.is_finished() {
        std::thread::sleep(Duration::from_millis(100));
    }
    if shutdown.load(Ordering::SeqCst) {
        log::info!("shutdown signal received, stopping...");
    }

    let report = pipeline.stop();
    if let Some(handle) = api_handle {
        handle.stop()?;
    }
    let report = report?;
    log::info!(
        "stopped: captured={} classified={} inference_errors={} commands={}",
        report.frames_captured,
        report.frames_classified,
        report.inference_errors,
        report.commands_emitted
    );
    Ok(())
}

fn command_sink(cfg: &GestureHubConfig, dry_run: bool) -> Box<dyn CommandSink> {
    match (&cfg.hub.url, dry_run) {
        (Some(url), false) => {
            if cfg.hub.token.is_none() {
                log::warn!(
                    "{} is not set; posting commands without authorization",
                    cfg.hub.token_env
                );
            }
            Box::new(HubSink::new(url.clone(), cfg.hub.token.clone(), cfg.hub.timeout))
        }
        (None, false) => {
            log::warn!("no hub url configured; commands will only be logged");
            Box::new(LogSink)
        }
        (_, true) => Box::new(LogSink),
    }
}
