//! Captured frames

use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;

/// One captured still.
///
/// `captured_at` is measured from the start of the session on a clock that
/// excludes paused time. The image is shared read-only; it is released when
/// the persistence worker that wrote it drops the frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic per-session id, starting at 1
    pub id: u64,
    pub file_name: String,
    pub captured_at: Duration,
    pub image: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(id: u64, captured_at: Duration, image: Arc<RgbaImage>) -> Self {
        Self {
            id,
            file_name: frame_file_name(id),
            captured_at,
            image,
        }
    }

    /// Metadata retained in the persisted-log once the image is gone
    pub fn record(&self) -> FrameRecord {
        FrameRecord {
            id: self.id,
            file_name: self.file_name.clone(),
            captured_at: self.captured_at,
        }
    }
}

/// Frame metadata without the image
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FrameRecord {
    pub id: u64,
    pub file_name: String,
    pub captured_at: Duration,
}

/// `img000001.png`, `img000002.png`, ...
pub fn frame_file_name(id: u64) -> String {
    format!("img{:06}.png", id)
}
