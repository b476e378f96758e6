//! Capture scheduling and session lifecycle
//!
//! `Idle -> Recording -> {Paused -> Recording} -> Encoding -> Done`

mod engine;
mod session;

pub use engine::{Recorder, RecordingSummary, STOP_GRACE_PERIOD};
pub use session::{RecordingSession, SessionClock, MIC_FILE_NAME};

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::Region;
use crate::encode::Container;
use crate::persist::BACKPRESSURE_THRESHOLD;

/// Default capture rate in ticks per second
pub const DEFAULT_FRAME_RATE: u32 = 20;

/// Inputs to [`Recorder::start`]
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub region: Region,
    /// Final video file
    pub output_path: PathBuf,
    pub container: Container,
    pub record_microphone: bool,
    pub audio_device: i32,
    /// Remove the working directory once encoding succeeds
    pub delete_material_when_done: bool,
    /// Parent of per-session working directories
    pub material_root: PathBuf,
    pub frame_rate: u32,
    pub backpressure_threshold: usize,
}

impl RecorderOptions {
    pub fn new(region: Region, output_path: impl Into<PathBuf>) -> Self {
        Self {
            region,
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    /// Interval between capture ticks, never zero
    pub fn tick_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.frame_rate.max(1)).max(Duration::from_nanos(1))
    }
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            region: Region::new(0, 0, 1280, 720),
            output_path: PathBuf::from("recording.mp4"),
            container: Container::Mp4,
            record_microphone: false,
            audio_device: 0,
            delete_material_when_done: true,
            material_root: std::env::temp_dir().join("framereel-material"),
            frame_rate: DEFAULT_FRAME_RATE,
            backpressure_threshold: BACKPRESSURE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tick_interval() {
        let options = RecorderOptions::default();
        assert_eq!(options.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_frame_rate_is_clamped() {
        let options = RecorderOptions {
            frame_rate: 0,
            ..RecorderOptions::default()
        };
        assert_eq!(options.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_frame_rate_keeps_nonzero_interval() {
        let options = RecorderOptions {
            frame_rate: u32::MAX,
            ..RecorderOptions::default()
        };
        assert_eq!(options.tick_interval(), Duration::from_nanos(1));
    }
}
