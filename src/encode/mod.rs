//! ffmpeg encoder invocation
//!
//! Turns the concat manifest (and optional microphone track) into the final
//! video. Argument assembly lives in [`commands`]; the subprocess lifecycle in
//! [`process`].

mod commands;
mod process;

pub use commands::{normalize_dimensions, Container, EncoderCommandBuilder};
pub use process::{run_encoder, EncoderRun, STDERR_TAIL_LINES};

/// Default encoder executable, resolved through PATH
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
