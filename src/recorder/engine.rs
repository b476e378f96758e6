//! Capture scheduler
//!
//! Owns the recording lifecycle. A tokio interval drives capture ticks; each
//! tick pulls one image from the frame source and hands it to the ingest
//! pipeline. Stopping joins the capture task, flushes persistence, builds the
//! timeline and runs the encoder.

use image::RgbaImage;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use super::session::{RecordingSession, SessionClock};
use super::RecorderOptions;
use crate::capture::{AudioSource, FrameSource, Region};
use crate::data::{
    assemble_timeline, total_duration, write_manifest, Frame, MANIFEST_FILE_NAME,
};
use crate::encode::{run_encoder, EncoderCommandBuilder, DEFAULT_FFMPEG};
use crate::error::{RecorderError, Result};
use crate::persist::{IngestPipeline, SharedPipeline};
use crate::progress::{ProgressObserver, ProgressReporter, RecorderStage};

/// Wait after stopping audio so its trailing buffers reach the file
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(200);

type SharedFrameSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// Result of a completed session
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub session: RecordingSession,
    pub output_path: PathBuf,
    pub frames: usize,
    /// Seconds between the first and last captured frame
    pub duration_secs: f64,
    pub background_drains: usize,
    pub material_deleted: bool,
    pub encoder_args: Vec<String>,
}

/// Tick-loop state that survives pause/resume
#[derive(Debug)]
struct TickState {
    frame_counter: u64,
    last_image: Option<Arc<RgbaImage>>,
    clock: SessionClock,
    /// Set when the loop stopped itself after a persistence failure
    aborted: bool,
}

impl TickState {
    fn new() -> Self {
        Self {
            frame_counter: 0,
            last_image: None,
            clock: SessionClock::start(),
            aborted: false,
        }
    }
}

/// Running tick loop; dropping it stops the loop
struct CaptureTask {
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl CaptureTask {
    fn spawn(
        ticks: Arc<Mutex<TickState>>,
        source: SharedFrameSource,
        region: Region,
        pipeline: SharedPipeline,
        period: Duration,
        reporter: ProgressReporter,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut state = lock(&ticks);
                        let accepted =
                            run_blocking(|| capture_tick(&mut state, &source, &region, &pipeline));
                        if !accepted {
                            state.aborted = true;
                            drop(state);
                            error!("Frame persistence failed, aborting capture");
                            reporter.report(RecorderStage::Failed);
                            break;
                        }
                    }
                }
            }
            debug!("Capture loop stopped");
        });

        Self {
            guard: cancel.drop_guard(),
            handle,
        }
    }

    /// Stop admitting ticks and wait for an in-flight tick to finish
    async fn halt(self) {
        let CaptureTask { guard, handle } = self;
        drop(guard);
        if let Err(e) = handle.await {
            error!("Capture task ended abnormally: {}", e);
        }
    }
}

/// Frame sources may block (subprocesses, OS capture APIs); keep the worker
/// free for other tasks where the runtime allows it.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// One capture tick.
///
/// A failed capture reuses the last good image with a fresh timestamp; with
/// no good image yet the tick is dropped without consuming a frame id.
/// Returns `false` once the pipeline refuses frames.
fn capture_tick(
    state: &mut TickState,
    source: &SharedFrameSource,
    region: &Region,
    pipeline: &IngestPipeline,
) -> bool {
    let captured = lock(source).capture_frame(region);
    let captured_at = state.clock.elapsed();

    let image = match captured {
        Ok(image) => {
            let image = Arc::new(image);
            state.last_image = Some(image.clone());
            image
        }
        Err(e) => match &state.last_image {
            Some(last) => {
                warn!("Frame capture failed, repeating previous frame: {}", e);
                last.clone()
            }
            None => {
                warn!("Frame capture failed before first frame, dropping tick: {}", e);
                return true;
            }
        },
    };

    state.frame_counter += 1;
    pipeline.ingest(Frame::new(state.frame_counter, captured_at, image))
}

enum Phase {
    Recording(CaptureTask),
    Paused,
}

struct ActiveSession {
    session: RecordingSession,
    options: RecorderOptions,
    reporter: ProgressReporter,
    pipeline: SharedPipeline,
    ticks: Arc<Mutex<TickState>>,
    phase: Phase,
    audio_active: bool,
}

/// Screen recorder driving a [`FrameSource`] at a fixed rate.
///
/// Frame sources are called on the capture task. On a multi-threaded runtime
/// the call goes through `block_in_place`, so a slow source does not stall
/// other tasks.
pub struct Recorder {
    frame_source: SharedFrameSource,
    audio_source: Option<Box<dyn AudioSource>>,
    encoder_path: PathBuf,
    active: Option<ActiveSession>,
}

impl Recorder {
    pub fn new(frame_source: impl FrameSource + 'static) -> Self {
        let frame_source: Box<dyn FrameSource> = Box::new(frame_source);
        Self {
            frame_source: Arc::new(Mutex::new(frame_source)),
            audio_source: None,
            encoder_path: PathBuf::from(DEFAULT_FFMPEG),
            active: None,
        }
    }

    /// Microphone recorder used when [`RecorderOptions::record_microphone`] is set
    pub fn with_audio_source(mut self, audio_source: impl AudioSource + 'static) -> Self {
        self.audio_source = Some(Box::new(audio_source));
        self
    }

    pub fn with_encoder_path(mut self, encoder_path: impl Into<PathBuf>) -> Self {
        self.encoder_path = encoder_path.into();
        self
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// `Recording` or `Paused` while a session is active, `Failed` once
    /// persistence aborted it, `None` when idle
    pub fn stage(&self) -> Option<RecorderStage> {
        self.active.as_ref().map(|active| {
            if active.pipeline.is_failed() {
                return RecorderStage::Failed;
            }
            match active.phase {
                Phase::Recording(_) => RecorderStage::Recording,
                Phase::Paused => RecorderStage::Paused,
            }
        })
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    /// Frames captured so far in the active session
    pub fn frames_captured(&self) -> usize {
        self.active
            .as_ref()
            .map(|active| active.pipeline.record_count())
            .unwrap_or(0)
    }

    /// Start a new session. Returns once capture is scheduled.
    pub fn start(
        &mut self,
        options: RecorderOptions,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<()> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let session = RecordingSession::create(&options.material_root)?;
        let reporter = ProgressReporter::new(observer);
        let pipeline = Arc::new(IngestPipeline::with_threshold(
            &session.working_dir,
            options.backpressure_threshold,
        ));

        let audio_active = if options.record_microphone {
            match self.audio_source.as_mut() {
                Some(audio) => {
                    if let Err(e) = audio.start(&session.mic_path()) {
                        let _ = std::fs::remove_dir_all(&session.working_dir);
                        return Err(e);
                    }
                    true
                }
                None => {
                    warn!("Microphone recording requested but no audio source is configured");
                    false
                }
            }
        } else {
            false
        };

        let ticks = Arc::new(Mutex::new(TickState::new()));
        let capture = CaptureTask::spawn(
            ticks.clone(),
            self.frame_source.clone(),
            options.region,
            pipeline.clone(),
            options.tick_interval(),
            reporter.clone(),
        );

        info!(
            "Recording started: session={}, region={:?}, {} fps, microphone={}",
            session.session_id, options.region, options.frame_rate, audio_active
        );
        reporter.report(RecorderStage::Recording);

        self.active = Some(ActiveSession {
            session,
            options,
            reporter,
            pipeline,
            ticks,
            phase: Phase::Recording(capture),
            audio_active,
        });
        Ok(())
    }

    /// Freeze capture. Buffered frames keep draining; the microphone is
    /// paused too so both tracks stay aligned.
    ///
    /// Once persistence has failed only [`Recorder::stop`] is accepted.
    pub async fn pause(&mut self) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Err(RecorderError::NotRecording);
        };
        if active.pipeline.is_failed() {
            return Err(RecorderError::NotRecording);
        }
        let capture = match std::mem::replace(&mut active.phase, Phase::Paused) {
            Phase::Recording(capture) => capture,
            Phase::Paused => return Err(RecorderError::NotRecording),
        };

        capture.halt().await;
        lock(&active.ticks).clock.pause();
        let audio_active = active.audio_active;
        let reporter = active.reporter.clone();

        if audio_active {
            if let Err(e) = self.run_audio(|audio| audio.pause()).await {
                warn!("Failed to pause microphone capture: {}", e);
            }
        }

        info!("Recording paused");
        reporter.report(RecorderStage::Paused);
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<()> {
        let Some(active) = self.active.as_ref() else {
            return Err(RecorderError::NotRecording);
        };
        if active.pipeline.is_failed() {
            return Err(RecorderError::NotRecording);
        }
        if !matches!(active.phase, Phase::Paused) {
            return Err(RecorderError::NotPaused);
        }

        if active.audio_active {
            if let Err(e) = self.run_audio(|audio| audio.resume()).await {
                warn!("Failed to resume microphone capture: {}", e);
            }
        }

        let source = self.frame_source.clone();
        let Some(active) = self.active.as_mut() else {
            return Err(RecorderError::NotRecording);
        };
        lock(&active.ticks).clock.resume();
        active.phase = Phase::Recording(CaptureTask::spawn(
            active.ticks.clone(),
            source,
            active.options.region,
            active.pipeline.clone(),
            active.options.tick_interval(),
            active.reporter.clone(),
        ));

        info!("Recording resumed");
        active.reporter.report(RecorderStage::Recording);
        Ok(())
    }

    /// Stop capture and produce the video.
    ///
    /// The recorder is idle again when this returns, whether or not encoding
    /// succeeded.
    pub async fn stop(&mut self) -> Result<RecordingSummary> {
        let Some(active) = self.active.take() else {
            return Err(RecorderError::NotRecording);
        };
        let ActiveSession {
            session,
            options,
            reporter,
            pipeline,
            ticks,
            phase,
            audio_active,
        } = active;

        info!("Stopping recording {}", session.session_id);
        if let Phase::Recording(capture) = phase {
            capture.halt().await;
        }
        // Set when the capture loop already reported Failed
        let aborted = lock(&ticks).aborted;

        let audio_path = if audio_active {
            match self.run_audio(|audio| audio.stop()).await {
                Ok(()) => Some(session.mic_path()).filter(|path| path.exists()),
                Err(e) => {
                    error!("Failed to stop microphone capture, encoding without audio: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if !aborted {
            tokio::time::sleep(STOP_GRACE_PERIOD).await;
            reporter.report(RecorderStage::Encoding);
        }

        match self.finish(session, &options, &pipeline, audio_path).await {
            Ok(summary) => {
                info!(
                    "Recording complete: {} frames, {:.2}s -> {:?}",
                    summary.frames, summary.duration_secs, summary.output_path
                );
                reporter.report(RecorderStage::Done);
                Ok(summary)
            }
            Err(e) => {
                error!("Recording failed: {}", e);
                if !aborted {
                    reporter.report(RecorderStage::Failed);
                }
                Err(e)
            }
        }
    }

    /// Persistence barrier, timeline, encode, cleanup
    async fn finish(
        &self,
        session: RecordingSession,
        options: &RecorderOptions,
        pipeline: &IngestPipeline,
        audio_path: Option<PathBuf>,
    ) -> Result<RecordingSummary> {
        let persisted = pipeline.finish().await?;
        let records = pipeline.records();
        if persisted != records.len() {
            warn!(
                "Persisted {} frames but the log holds {}",
                persisted,
                records.len()
            );
        }

        let entries = assemble_timeline(&records, &session.working_dir)?;
        let manifest_path = session.working_dir.join(MANIFEST_FILE_NAME);
        write_manifest(&manifest_path, &entries)?;

        let duration = total_duration(&records);
        let encoder_args = EncoderCommandBuilder::new(&manifest_path, &options.output_path)
            .with_audio(audio_path)
            .with_container(options.container.clone())
            .with_dimensions(options.region.width, options.region.height)
            .with_duration(duration)
            .build();
        run_encoder(&self.encoder_path, &encoder_args).await?;

        let material_deleted = if options.delete_material_when_done {
            match tokio::fs::remove_dir_all(&session.working_dir).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to delete material {:?}: {}", session.working_dir, e);
                    false
                }
            }
        } else {
            false
        };

        Ok(RecordingSummary {
            session,
            output_path: options.output_path.clone(),
            frames: records.len(),
            duration_secs: duration.as_secs_f64(),
            background_drains: pipeline.drains_launched(),
            material_deleted,
            encoder_args,
        })
    }

    /// Run a blocking audio-source call off the async workers
    async fn run_audio<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn AudioSource) -> Result<()> + Send + 'static,
    {
        let Some(mut audio) = self.audio_source.take() else {
            return Ok(());
        };
        let (audio, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut *audio);
            (audio, result)
        })
        .await
        .map_err(|e| RecorderError::Audio(format!("audio task failed: {}", e)))?;
        self.audio_source = Some(audio);
        result
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::progress::RecorderState;
    use image::Rgba;
    use std::path::Path;

    fn counting_source() -> impl FrameSource {
        let mut calls: u8 = 0;
        move |region: &Region| -> std::result::Result<RgbaImage, CaptureError> {
            calls = calls.wrapping_add(1);
            Ok(RgbaImage::from_pixel(
                region.width,
                region.height,
                Rgba([calls, 0, 0, 255]),
            ))
        }
    }

    fn failing_source() -> impl FrameSource {
        |_: &Region| -> std::result::Result<RgbaImage, CaptureError> {
            Err(CaptureError::Unavailable("no display".to_string()))
        }
    }

    fn shared(source: impl FrameSource + 'static) -> SharedFrameSource {
        let source: Box<dyn FrameSource> = Box::new(source);
        Arc::new(Mutex::new(source))
    }

    fn options(root: &Path) -> RecorderOptions {
        RecorderOptions {
            region: Region::new(0, 0, 16, 16),
            output_path: root.join("out.mp4"),
            material_root: root.join("material"),
            delete_material_when_done: false,
            ..RecorderOptions::default()
        }
    }

    fn stage_log() -> (Arc<Mutex<Vec<RecorderStage>>>, Arc<dyn ProgressObserver>) {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        let observer: Arc<dyn ProgressObserver> = Arc::new(move |state: RecorderState| {
            sink.lock().unwrap().push(state.stage);
        });
        (stages, observer)
    }

    fn png_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".png"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let mut recorder = Recorder::new(counting_source());
        assert!(matches!(recorder.stop().await, Err(RecorderError::NotRecording)));
        assert!(!recorder.is_recording());
        assert!(matches!(recorder.pause().await, Err(RecorderError::NotRecording)));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(counting_source());
        recorder.start(options(root.path()), None).unwrap();
        let session_id = recorder.session().unwrap().session_id.clone();

        let second = recorder.start(options(root.path()), None);
        assert!(matches!(second, Err(RecorderError::AlreadyRecording)));
        assert_eq!(recorder.session().unwrap().session_id, session_id);
        assert_eq!(recorder.stage(), Some(RecorderStage::Recording));
    }

    #[test]
    fn test_failed_tick_repeats_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(dir.path());
        let outcomes = Mutex::new(vec![false, true, false, true].into_iter());
        let mut value = 0u8;
        let source = shared(move |_: &Region| -> std::result::Result<RgbaImage, CaptureError> {
            value += 10;
            if outcomes.lock().unwrap().next().unwrap_or(true) {
                Ok(RgbaImage::from_pixel(4, 4, Rgba([value, value, value, 255])))
            } else {
                Err(CaptureError::Unavailable("busy".to_string()))
            }
        });
        let region = Region::new(0, 0, 4, 4);
        let mut state = TickState::new();

        // Failure with no prior frame: dropped, no id consumed
        capture_tick(&mut state, &source, &region, &pipeline);
        assert_eq!(state.frame_counter, 0);
        assert!(pipeline.records().is_empty());

        capture_tick(&mut state, &source, &region, &pipeline);
        capture_tick(&mut state, &source, &region, &pipeline);
        capture_tick(&mut state, &source, &region, &pipeline);

        let ids: Vec<u64> = pipeline.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(state.frame_counter, 3);
        assert_eq!(pipeline.pending_len(), 3);
    }

    #[tokio::test]
    async fn test_duplicated_frame_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(dir.path());
        let mut fail_next = false;
        let mut value = 0u8;
        let source = shared(move |_: &Region| -> std::result::Result<RgbaImage, CaptureError> {
            let fail = fail_next;
            fail_next = !fail_next;
            value += 1;
            if fail {
                Err(CaptureError::Unavailable("busy".to_string()))
            } else {
                Ok(RgbaImage::from_pixel(4, 4, Rgba([value, 0, 0, 255])))
            }
        });
        let region = Region::new(0, 0, 4, 4);
        let mut state = TickState::new();
        for _ in 0..4 {
            capture_tick(&mut state, &source, &region, &pipeline);
        }
        pipeline.finish().await.unwrap();

        let read = |id: u64| {
            std::fs::read(dir.path().join(crate::data::frame_file_name(id))).unwrap()
        };
        // Ticks: ok, fail, ok, fail
        assert_eq!(read(1), read(2));
        assert_eq!(read(3), read(4));
        assert_ne!(read(2), read(3));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_five_ticks_at_twenty_fps() {
        let root = tempfile::tempdir().unwrap();
        let (stages, observer) = stage_log();
        let mut recorder = Recorder::new(counting_source()).with_encoder_path("true");

        recorder.start(options(root.path()), Some(observer)).unwrap();
        tokio::time::sleep(Duration::from_millis(225)).await;
        let summary = recorder.stop().await.unwrap();

        assert_eq!(summary.frames, 5);
        approx::assert_relative_eq!(summary.duration_secs, 0.20, epsilon = 1e-9);
        assert!(summary.encoder_args.contains(&"0.200000".to_string()));

        let manifest =
            std::fs::read_to_string(summary.session.working_dir.join(MANIFEST_FILE_NAME)).unwrap();
        let durations: Vec<&str> = manifest
            .lines()
            .filter_map(|line| line.strip_prefix("duration "))
            .collect();
        assert_eq!(
            durations,
            vec!["0.050000", "0.050000", "0.050000", "0.050000", "1.000000"]
        );

        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                RecorderStage::Recording,
                RecorderStage::Encoding,
                RecorderStage::Done
            ]
        );
        assert!(!recorder.is_recording());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_every_frame_is_persisted_once() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(counting_source()).with_encoder_path("true");
        let opts = RecorderOptions {
            frame_rate: 200,
            backpressure_threshold: 4,
            ..options(root.path())
        };

        recorder.start(opts, None).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let summary = recorder.stop().await.unwrap();

        let names = png_names(&summary.session.working_dir);
        assert_eq!(names.len(), summary.frames);
        assert!(summary.background_drains >= 1);

        let expected: Vec<String> = (1..=summary.frames as u64)
            .map(crate::data::frame_file_name)
            .collect();
        assert_eq!(names, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encoder_failure_reports_failed() {
        let root = tempfile::tempdir().unwrap();
        let (stages, observer) = stage_log();
        let mut recorder = Recorder::new(counting_source()).with_encoder_path("false");

        recorder.start(options(root.path()), Some(observer)).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let result = recorder.stop().await;

        assert!(matches!(result, Err(RecorderError::EncodingFailed { .. })));
        assert_eq!(stages.lock().unwrap().last(), Some(&RecorderStage::Failed));
        assert!(!stages.lock().unwrap().contains(&RecorderStage::Done));

        // Back to idle
        recorder.start(options(root.path()), None).unwrap();
        assert!(recorder.is_recording());
    }

    #[tokio::test]
    async fn test_no_frames_captured() {
        let root = tempfile::tempdir().unwrap();
        let (stages, observer) = stage_log();
        let mut recorder = Recorder::new(failing_source()).with_encoder_path("true");

        recorder.start(options(root.path()), Some(observer)).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(recorder.frames_captured(), 0);

        let result = recorder.stop().await;
        assert!(matches!(result, Err(RecorderError::NoFramesCaptured)));
        assert_eq!(stages.lock().unwrap().last(), Some(&RecorderStage::Failed));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_capture_and_clock() {
        let root = tempfile::tempdir().unwrap();
        let (stages, observer) = stage_log();
        let mut recorder = Recorder::new(counting_source()).with_encoder_path("true");

        recorder.start(options(root.path()), Some(observer)).unwrap();
        tokio::time::sleep(Duration::from_millis(125)).await;
        recorder.pause().await.unwrap();
        let frozen = recorder.frames_captured();
        assert_eq!(frozen, 3);
        assert_eq!(recorder.stage(), Some(RecorderStage::Paused));
        assert!(matches!(recorder.pause().await, Err(RecorderError::NotRecording)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.frames_captured(), frozen);

        recorder.resume().await.unwrap();
        assert!(matches!(recorder.resume().await, Err(RecorderError::NotPaused)));
        tokio::time::sleep(Duration::from_millis(75)).await;
        let summary = recorder.stop().await.unwrap();

        // Resumed at 125ms session time: ticks at 125 and 175
        assert_eq!(summary.frames, 5);
        approx::assert_relative_eq!(summary.duration_secs, 0.175, epsilon = 1e-9);
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                RecorderStage::Recording,
                RecorderStage::Paused,
                RecorderStage::Recording,
                RecorderStage::Encoding,
                RecorderStage::Done
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_material_deleted_when_done() {
        let root = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(counting_source()).with_encoder_path("true");
        let opts = RecorderOptions {
            delete_material_when_done: true,
            ..options(root.path())
        };

        recorder.start(opts, None).unwrap();
        let working_dir = recorder.session().unwrap().working_dir.clone();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let summary = recorder.stop().await.unwrap();

        assert!(summary.material_deleted);
        assert!(!working_dir.exists());
    }

    #[derive(Default)]
    struct ScriptedAudio {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl AudioSource for ScriptedAudio {
        fn start(&mut self, output_path: &Path) -> Result<()> {
            self.calls.lock().unwrap().push("start");
            std::fs::write(output_path, b"RIFF")?;
            Ok(())
        }
        fn pause(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("pause");
            Ok(())
        }
        fn resume(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("resume");
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_microphone_track_is_muxed() {
        let root = tempfile::tempdir().unwrap();
        let audio = ScriptedAudio::default();
        let calls = audio.calls.clone();
        let mut recorder = Recorder::new(counting_source())
            .with_audio_source(audio)
            .with_encoder_path("true");
        let opts = RecorderOptions {
            record_microphone: true,
            ..options(root.path())
        };

        recorder.start(opts, None).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        recorder.pause().await.unwrap();
        recorder.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let summary = recorder.stop().await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["start", "pause", "resume", "stop"]);
        assert!(summary.encoder_args.contains(&"mp3".to_string()));
        let mic = summary.session.mic_path().to_string_lossy().into_owned();
        assert!(summary.encoder_args.contains(&mic));
    }

    #[tokio::test]
    async fn test_lost_working_dir_aborts_session() {
        let root = tempfile::tempdir().unwrap();
        let (stages, observer) = stage_log();
        let mut recorder = Recorder::new(counting_source()).with_encoder_path("true");
        let opts = RecorderOptions {
            backpressure_threshold: 0,
            ..options(root.path())
        };

        recorder.start(opts, Some(observer)).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        recorder.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let working_dir = recorder.session().unwrap().working_dir.clone();
        std::fs::remove_dir_all(&working_dir).unwrap();
        recorder.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(recorder.stage(), Some(RecorderStage::Failed));
        let frozen = recorder.frames_captured();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.frames_captured(), frozen);
        assert!(matches!(recorder.pause().await, Err(RecorderError::NotRecording)));

        let result = recorder.stop().await;
        assert!(matches!(result, Err(RecorderError::PersistenceFailed { .. })));
        assert!(!recorder.is_recording());
        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                RecorderStage::Recording,
                RecorderStage::Paused,
                RecorderStage::Recording,
                RecorderStage::Failed
            ]
        );

        recorder.start(options(root.path()), None).unwrap();
        assert_eq!(recorder.stage(), Some(RecorderStage::Recording));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocking_source_leaves_runtime_responsive() {
        let root = tempfile::tempdir().unwrap();
        let slow = |region: &Region| -> std::result::Result<RgbaImage, CaptureError> {
            std::thread::sleep(Duration::from_millis(30));
            Ok(RgbaImage::new(region.width, region.height))
        };
        let mut recorder = Recorder::new(slow).with_encoder_path("true");

        let pings = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = pings.clone();
        let pinger = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });

        recorder.start(options(root.path()), None).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let summary = recorder.stop().await.unwrap();
        pinger.abort();

        assert!(summary.frames >= 2);
        assert!(pings.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }
}
