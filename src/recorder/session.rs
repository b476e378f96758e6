//! Per-session state created fresh on every start

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;

/// File the microphone track is recorded into
pub const MIC_FILE_NAME: &str = "Microphone.wav";

/// Identity and working material of one recording
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSession {
    pub session_id: String,
    /// `Recording yy-MM-dd HH-mm-ss`, also the working directory name
    pub name: String,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Local>,
}

impl RecordingSession {
    /// Create the session and a fresh working directory under `material_root`.
    ///
    /// A leftover directory with the same name is removed first.
    pub fn create(material_root: &Path) -> Result<Self> {
        let started_at = Local::now();
        let name = format!("Recording {}", started_at.format("%y-%m-%d %H-%M-%S"));
        let working_dir = material_root.join(&name);

        if working_dir.exists() {
            debug!("Removing stale material folder {:?}", working_dir);
            std::fs::remove_dir_all(&working_dir)?;
        }
        std::fs::create_dir_all(&working_dir)?;
        // Manifest entries are resolved by the encoder, keep them absolute
        let working_dir = std::fs::canonicalize(&working_dir)?;

        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            name,
            working_dir,
            started_at,
        };
        info!(
            "Created recording session {} in {:?}",
            session.session_id, session.working_dir
        );
        Ok(session)
    }

    pub fn mic_path(&self) -> PathBuf {
        self.working_dir.join(MIC_FILE_NAME)
    }
}

/// Session time that stands still while paused
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started: Instant,
    paused_total: Duration,
    paused_at: Option<Instant>,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            paused_total: Duration::ZERO,
            paused_at: None,
        }
    }

    /// Recording time elapsed since start, excluding pauses
    pub fn elapsed(&self) -> Duration {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += Instant::now().saturating_duration_since(paused_at);
        }
    }
}
