//! framereel CLI
//!
//! Records a screen region until `--duration` elapses or Ctrl+C, then encodes
//! and prints a JSON summary of the session.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use framereel::capture::{CommandFrameSource, FfmpegAudioSource, TestPatternSource};
use framereel::config::Config;
use framereel::logging;
use framereel::{
    Container, ProgressObserver, Recorder, RecorderOptions, RecorderState,
    RecordingSummary, Region,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Synthetic moving pattern, no display needed
    TestPattern,
    /// External screenshot command (see --source-command)
    Command,
}

#[derive(Debug, Parser)]
#[command(name = "framereel", version, about = "Still-frame screen recorder")]
struct Cli {
    /// Screen region to capture
    #[arg(long, value_name = "X,Y,W,H", default_value = "0,0,1280,720")]
    region: Region,

    /// Output video file
    #[arg(short, long, default_value = "recording.mp4")]
    output: PathBuf,

    /// Output container; defaults to the output file extension
    #[arg(long)]
    container: Option<Container>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long, value_name = "SECS")]
    duration: Option<f64>,

    /// Capture ticks per second
    #[arg(long)]
    fps: Option<u32>,

    /// Record the microphone
    #[arg(long)]
    microphone: bool,

    /// Microphone device number
    #[arg(long, value_name = "N")]
    audio_device: Option<i32>,

    /// Keep the captured frames after encoding
    #[arg(long)]
    keep_material: bool,

    /// Parent directory for captured frames
    #[arg(long, value_name = "DIR")]
    material_root: Option<PathBuf>,

    /// ffmpeg executable
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SourceKind::TestPattern)]
    source: SourceKind,

    /// Screenshot command for `--source command`; `{x}` `{y}` `{w}` `{h}` are substituted
    #[arg(long, value_name = "CMD", required_if_eq("source", "command"))]
    source_command: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init_logging()?;
    info!("framereel starting...");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Configuration loaded from {:?}", config.config_path()?);

    let stop_after = match cli.duration {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => {
            bail!("--duration must be a positive number of seconds, got {}", secs)
        }
        Some(secs) => Some(Duration::from_secs_f64(secs)),
        None => None,
    };

    let options = recorder_options(&cli, &config);
    let recorder = build_recorder(&cli, &config, &options)?;

    let runtime = tokio::runtime::Runtime::new()?;

    let (stop_tx, stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let summary = runtime.block_on(record(recorder, options, stop_after, stop_rx))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );
    Ok(())
}

/// Merge CLI flags over the config file
fn recorder_options(cli: &Cli, config: &Config) -> RecorderOptions {
    let container = cli
        .container
        .clone()
        .or_else(|| {
            cli.output
                .extension()
                .and_then(|ext| ext.to_str())
                .map(Container::from)
        })
        .unwrap_or_else(|| config.recording.container.clone());

    RecorderOptions {
        region: cli.region,
        output_path: cli.output.clone(),
        container,
        record_microphone: cli.microphone || config.audio.enabled,
        audio_device: cli.audio_device.unwrap_or(config.audio.device),
        delete_material_when_done: !cli.keep_material
            && config.recording.delete_material_when_done,
        material_root: cli
            .material_root
            .clone()
            .unwrap_or_else(|| config.recording.material_root.clone()),
        frame_rate: cli.fps.unwrap_or(config.recording.frame_rate),
        backpressure_threshold: config.recording.backpressure_threshold,
    }
}

fn build_recorder(cli: &Cli, config: &Config, options: &RecorderOptions) -> Result<Recorder> {
    let ffmpeg = cli
        .ffmpeg
        .clone()
        .unwrap_or_else(|| config.encoder.ffmpeg_path.clone());

    let recorder = match cli.source {
        SourceKind::TestPattern => Recorder::new(TestPatternSource::new()),
        SourceKind::Command => {
            let command_line = cli.source_command.as_deref().unwrap_or_default();
            match CommandFrameSource::from_command_line(command_line) {
                Some(source) => Recorder::new(source),
                None => bail!("--source command needs a non-empty --source-command"),
            }
        }
    };

    let mut recorder = recorder.with_encoder_path(&ffmpeg);
    if options.record_microphone {
        recorder = recorder.with_audio_source(FfmpegAudioSource::new(
            &ffmpeg,
            config.audio.input_format.clone(),
            &config.audio.device_pattern,
            options.audio_device,
        ));
    }
    Ok(recorder)
}

async fn record(
    mut recorder: Recorder,
    options: RecorderOptions,
    stop_after: Option<Duration>,
    mut stop_rx: mpsc::UnboundedReceiver<()>,
) -> Result<RecordingSummary> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<RecorderState>();
    let printer = tokio::spawn(async move {
        while let Some(state) = progress_rx.recv().await {
            eprintln!("framereel: {:?}", state.stage);
        }
    });

    let observer: Arc<dyn ProgressObserver> = Arc::new(progress_tx);
    recorder
        .start(options, Some(observer))
        .context("Failed to start recording")?;

    match stop_after {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => info!("Recording duration reached"),
                _ = stop_rx.recv() => info!("Stop requested"),
            }
        }
        None => {
            info!("Recording, press Ctrl+C to stop");
            stop_rx.recv().await;
        }
    }

    let frames = recorder.frames_captured();
    info!("Captured {} frames, encoding...", frames);
    let result = recorder.stop().await;

    // The stopped session released the progress sender; the printer drains and exits
    drop(recorder);
    if let Err(e) = printer.await {
        warn!("Progress printer ended abnormally: {}", e);
    }

    result.context("Recording failed")
}
