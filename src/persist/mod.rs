//! Frame ingest and persistence
//!
//! Every captured frame is written to two places:
//! - the pending-write queue, drained to disk by background workers
//! - the persisted-log, an ordered list of frame metadata used to build the
//!   timeline once recording stops
//!
//! When the queue grows past the backpressure threshold a drain is spawned
//! on the blocking pool. Drains pop one frame at a time, so any number of
//! them can run at once without writing a frame twice or skipping one. The
//! first fatal write halts the pipeline: later frames are refused and no
//! more drains start.

mod writer;

pub use writer::{persist_frame, FrameWriter, WRITE_ATTEMPTS};

use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::data::{Frame, FrameRecord};
use crate::error::{RecorderError, Result};

/// Pending frames at which a background drain is launched (~1.5s at 20 fps)
pub const BACKPRESSURE_THRESHOLD: usize = 30;

/// Buffers frames from the capture tick and persists them off the tick path
pub struct IngestPipeline {
    working_dir: PathBuf,
    threshold: usize,
    pending_tx: Sender<Frame>,
    writer: FrameWriter,
    log: Mutex<Vec<FrameRecord>>,
    drains: Mutex<JoinSet<Result<usize>>>,
    drains_launched: AtomicUsize,
    fatal: Mutex<Option<RecorderError>>,
}

impl IngestPipeline {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self::with_threshold(working_dir, BACKPRESSURE_THRESHOLD)
    }

    pub fn with_threshold(working_dir: impl Into<PathBuf>, threshold: usize) -> Self {
        let working_dir = working_dir.into();
        let (pending_tx, pending_rx): (Sender<Frame>, Receiver<Frame>) =
            crossbeam_channel::unbounded();
        Self {
            writer: FrameWriter::new(pending_rx, working_dir.clone()),
            working_dir,
            threshold,
            pending_tx,
            log: Mutex::new(Vec::new()),
            drains: Mutex::new(JoinSet::new()),
            drains_launched: AtomicUsize::new(0),
            fatal: Mutex::new(None),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Accept a frame from the capture tick.
    ///
    /// Must be called from a single task so the log keeps capture order.
    /// Requires a tokio runtime when the threshold is crossed. Returns `false`
    /// without queueing the frame once a fatal write error has halted the
    /// pipeline.
    pub fn ingest(&self, frame: Frame) -> bool {
        self.reap_drains();
        if self.is_failed() {
            return false;
        }

        lock(&self.log).push(frame.record());

        // The receiver lives in `self.writer`, so the channel is never disconnected
        let _ = self.pending_tx.send(frame);

        let pending = self.writer.pending_len();
        if pending > self.threshold {
            debug!("{} frames pending, launching drain", pending);
            self.launch_drain();
        }
        true
    }

    fn launch_drain(&self) {
        let writer = self.writer.clone();
        lock(&self.drains).spawn_blocking(move || writer.drain());
        self.drains_launched.fetch_add(1, Ordering::Relaxed);
    }

    /// Collect drains that already finished, keeping the first fatal error
    fn reap_drains(&self) {
        let mut drains = lock(&self.drains);
        while let Some(joined) = drains.try_join_next() {
            self.settle(joined);
        }
    }

    fn settle(&self, joined: std::result::Result<Result<usize>, JoinError>) {
        let outcome = joined
            .map_err(|e| RecorderError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)));
        match outcome.and_then(|r| r) {
            Ok(written) => debug!("Drain finished after writing {} frames", written),
            Err(e) => {
                error!("Drain failed: {}", e);
                self.writer.halt();
                lock(&self.fatal).get_or_insert(e);
            }
        }
    }

    /// True once a write failed fatally; no further frames are accepted
    pub fn is_failed(&self) -> bool {
        self.writer.is_halted()
    }

    /// Barrier run once capture has stopped: joins every outstanding drain,
    /// then flushes whatever never crossed the threshold.
    ///
    /// Returns the total number of frames persisted by this pipeline, or the
    /// first fatal write error.
    pub async fn finish(&self) -> Result<usize> {
        let mut drains = std::mem::take(&mut *lock(&self.drains));
        debug!("Waiting for {} outstanding drains", drains.len());

        while let Some(joined) = drains.join_next().await {
            self.settle(joined);
        }
        if let Some(e) = lock(&self.fatal).take() {
            return Err(e);
        }

        let writer = self.writer.clone();
        let remainder = tokio::task::spawn_blocking(move || writer.drain())
            .await
            .map_err(|e| RecorderError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let persisted = self.writer.persisted_count();
        info!(
            "Persistence complete: {} frames written ({} in final flush, {} background drains)",
            persisted,
            remainder,
            self.drains_launched()
        );
        Ok(persisted)
    }

    /// Snapshot of the persisted-log in capture order
    pub fn records(&self) -> Vec<FrameRecord> {
        lock(&self.log).clone()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.log).len()
    }

    /// Drains launched but not yet collected
    pub fn outstanding_drains(&self) -> usize {
        lock(&self.drains).len()
    }

    pub fn pending_len(&self) -> usize {
        self.writer.pending_len()
    }

    pub fn persisted_count(&self) -> usize {
        self.writer.persisted_count()
    }

    pub fn drains_launched(&self) -> usize {
        self.drains_launched.load(Ordering::Relaxed)
    }
}

/// Poisoning only happens if a holder panicked mid-push; the data is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("working_dir", &self.working_dir)
            .field("threshold", &self.threshold)
            .field("pending", &self.pending_len())
            .field("persisted", &self.persisted_count())
            .finish()
    }
}

/// Shared handle used by the capture task and the recorder
pub type SharedPipeline = Arc<IngestPipeline>;

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn frame(id: u64) -> Frame {
        let image = RgbaImage::from_pixel(4, 4, Rgba([id as u8, 0, 0, 255]));
        Frame::new(id, Duration::from_millis(id * 50), Arc::new(image))
    }

    fn png_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "png").unwrap_or(false))
            .count()
    }

    #[tokio::test]
    async fn test_below_threshold_waits_for_finish() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(dir.path());

        for id in 1..=30 {
            pipeline.ingest(frame(id));
        }
        assert_eq!(pipeline.drains_launched(), 0);
        assert_eq!(pipeline.pending_len(), 30);

        let persisted = pipeline.finish().await.unwrap();
        assert_eq!(persisted, 30);
        assert_eq!(pipeline.pending_len(), 0);
        assert_eq!(png_count(dir.path()), 30);
    }

    #[tokio::test]
    async fn test_crossing_threshold_launches_drain() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(dir.path());

        for id in 1..=31 {
            pipeline.ingest(frame(id));
        }
        assert!(pipeline.drains_launched() >= 1);

        pipeline.finish().await.unwrap();
        assert_eq!(pipeline.persisted_count(), 31);
        assert_eq!(png_count(dir.path()), 31);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drains_write_each_frame_once() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::with_threshold(dir.path(), 2);

        for id in 1..=200 {
            pipeline.ingest(frame(id));
        }
        assert!(pipeline.drains_launched() > 1);

        let persisted = pipeline.finish().await.unwrap();
        assert_eq!(persisted, 200);
        assert_eq!(pipeline.pending_len(), 0);
        assert_eq!(png_count(dir.path()), 200);
    }

    #[tokio::test]
    async fn test_log_keeps_capture_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::with_threshold(dir.path(), 1);

        for id in 1..=10 {
            pipeline.ingest(frame(id));
        }
        pipeline.finish().await.unwrap();

        let ids: Vec<u64> = pipeline.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_from_finish() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let pipeline = IngestPipeline::new(&missing);

        pipeline.ingest(frame(1));
        let result = pipeline.finish().await;
        assert!(matches!(result, Err(RecorderError::PersistenceFailed { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_drain_failure_halts_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::with_threshold(dir.path().join("gone"), 1);

        let mut accepted = 0;
        for id in 1..=40 {
            if pipeline.ingest(frame(id)) {
                accepted += 1;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(pipeline.drains_launched() >= 1);
        assert!(pipeline.is_failed());
        assert!(accepted < 40);
        assert_eq!(pipeline.record_count(), accepted);
        assert_eq!(pipeline.persisted_count(), 0);

        // Refused frames launch nothing and finished drains were collected
        let launched = pipeline.drains_launched();
        assert!(!pipeline.ingest(frame(41)));
        assert_eq!(pipeline.drains_launched(), launched);
        assert_eq!(pipeline.outstanding_drains(), 0);

        let result = pipeline.finish().await;
        assert!(matches!(result, Err(RecorderError::PersistenceFailed { .. })));
    }

    #[tokio::test]
    async fn test_finished_drains_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::with_threshold(dir.path(), 0);

        for id in 1..=20 {
            pipeline.ingest(frame(id));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pipeline.drains_launched(), 20);
        assert!(pipeline.outstanding_drains() < 20);

        assert_eq!(pipeline.finish().await.unwrap(), 20);
    }
}
