//! Errors surfaced by the recording pipeline

use std::path::PathBuf;
use std::process::ExitStatus;

/// Errors returned by [`crate::Recorder`] and the pipeline stages behind it
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Recording is not paused")]
    NotPaused,

    #[error("No frames were captured during the session")]
    NoFramesCaptured,

    #[error("Failed to persist frame to {path:?}: {source}")]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with {status}: {stderr}")]
    EncodingFailed { status: ExitStatus, stderr: String },

    #[error("Failed to launch encoder {program:?}: {source}")]
    EncoderUnavailable {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio Error: {0}")]
    Audio(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;
