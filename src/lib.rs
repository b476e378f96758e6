//! framereel
//!
//! Still-frame screen recorder. Captures a screen region at a fixed rate,
//! streams frames to disk in the background and hands the resulting
//! variable-framerate timeline to ffmpeg, optionally muxed with a microphone
//! track.

pub mod capture;
pub mod config;
pub mod data;
pub mod encode;
pub mod error;
pub mod logging;
pub mod persist;
pub mod progress;
pub mod recorder;

pub use capture::{AudioSource, CaptureError, FrameSource, Region};
pub use encode::Container;
pub use error::{RecorderError, Result};
pub use progress::{ProgressObserver, RecorderStage, RecorderState};
pub use recorder::{Recorder, RecorderOptions, RecordingSummary};
