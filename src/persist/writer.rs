//! Frame persistence workers

use crossbeam_channel::Receiver;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::Frame;
use crate::error::{RecorderError, Result};

/// Attempts per frame before a transient I/O error becomes fatal
pub const WRITE_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);

/// Cloneable handle onto the pending queue; each clone drains the same queue
#[derive(Debug, Clone)]
pub struct FrameWriter {
    pending: Receiver<Frame>,
    working_dir: PathBuf,
    persisted: Arc<AtomicUsize>,
    halted: Arc<AtomicBool>,
}

impl FrameWriter {
    pub fn new(pending: Receiver<Frame>, working_dir: PathBuf) -> Self {
        Self {
            pending,
            working_dir,
            persisted: Arc::new(AtomicUsize::new(0)),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pop and write frames until the queue is empty.
    ///
    /// Blocking; run on the blocking pool. The first fatal write error halts
    /// every clone of this writer, so later drains leave the queue untouched.
    /// Returns the number of frames this call wrote.
    pub fn drain(&self) -> Result<usize> {
        let mut written = 0;
        while !self.is_halted() {
            let Ok(frame) = self.pending.try_recv() else {
                break;
            };
            if let Err(e) = persist_frame(&frame, &self.working_dir) {
                self.halt();
                return Err(e);
            }
            // Releases this worker's reference to the image
            drop(frame);
            written += 1;
            self.persisted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(written)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn persisted_count(&self) -> usize {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Set once any drain hit a fatal write error
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

/// Write one frame as PNG into `working_dir`, retrying transient I/O errors
pub fn persist_frame(frame: &Frame, working_dir: &Path) -> Result<()> {
    let path = working_dir.join(&frame.file_name);
    let mut attempt = 1;
    loop {
        let err = match frame.image.save(&path) {
            Ok(()) => return Ok(()),
            Err(image::ImageError::IoError(e)) => e,
            Err(other) => std::io::Error::new(ErrorKind::Other, other),
        };

        if is_transient(&err) && attempt < WRITE_ATTEMPTS {
            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
            warn!(
                "Transient error writing {:?} (attempt {}/{}): {}; retrying in {:?}",
                path, attempt, WRITE_ATTEMPTS, err, delay
            );
            std::thread::sleep(delay);
            attempt += 1;
            continue;
        }

        debug!("Giving up on {:?} after {} attempts", path, attempt);
        return Err(RecorderError::PersistenceFailed { path, source: err });
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}
