//! Frame and audio capture collaborators
//!
//! The recorder never grabs pixels or samples itself. It drives a
//! [`FrameSource`] once per capture tick and, when microphone recording is
//! enabled, an [`AudioSource`] for the lifetime of the session.

mod audio;
mod sources;

pub use audio::{AudioSource, FfmpegAudioSource, MIC_CHANNELS, MIC_SAMPLE_RATE};
pub use sources::{CommandFrameSource, TestPatternSource};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Screen rectangle to capture, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    /// Parses `X,Y,WIDTH,HEIGHT`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected X,Y,WIDTH,HEIGHT, got {:?}", s));
        }
        let x = parts[0].parse().map_err(|e| format!("invalid x: {}", e))?;
        let y = parts[1].parse().map_err(|e| format!("invalid y: {}", e))?;
        let width = parts[2].parse().map_err(|e| format!("invalid width: {}", e))?;
        let height = parts[3].parse().map_err(|e| format!("invalid height: {}", e))?;
        if width == 0 || height == 0 {
            return Err("region must have a non-zero size".to_string());
        }
        Ok(Self::new(x, y, width, height))
    }
}

/// Transient failure to obtain a frame
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to decode captured image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces one image of the configured region per call.
///
/// Implementations render any pointer overlay themselves. Calls happen on the
/// capture tick, so they should return well within one tick interval.
pub trait FrameSource: Send {
    fn capture_frame(&mut self, region: &Region) -> Result<RgbaImage, CaptureError>;
}

impl<F> FrameSource for F
where
    F: FnMut(&Region) -> Result<RgbaImage, CaptureError> + Send,
{
    fn capture_frame(&mut self, region: &Region) -> Result<RgbaImage, CaptureError> {
        self(region)
    }
}
