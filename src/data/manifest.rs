//! Timeline assembly
//!
//! Converts the ordered persisted-log into per-frame display durations and
//! writes them in ffmpeg's concat demuxer grammar:
//!
//! ```text
//! file '/abs/path/img000001.png'
//! duration 0.050000
//! ```
//!
//! Each frame is shown until the next one was captured, so dropped or
//! duplicated ticks keep the video aligned with wall-clock time. The last
//! frame has no successor and gets a fixed duration.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::FrameRecord;
use crate::error::{RecorderError, Result};

/// Display time of the final frame
pub const LAST_FRAME_DURATION_SECS: f64 = 1.0;

/// Manifest file written into the session working directory
pub const MANIFEST_FILE_NAME: &str = "frames.txt";

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub file_path: PathBuf,
    pub duration_secs: f64,
}

/// Build the manifest for `records`, which must be in capture order
pub fn assemble_timeline(records: &[FrameRecord], working_dir: &Path) -> Result<Vec<ManifestEntry>> {
    if records.is_empty() {
        return Err(RecorderError::NoFramesCaptured);
    }

    let entries: Vec<ManifestEntry> = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let duration_secs = match records.get(i + 1) {
                Some(next) => next.captured_at.saturating_sub(record.captured_at).as_secs_f64(),
                None => LAST_FRAME_DURATION_SECS,
            };
            ManifestEntry {
                file_path: working_dir.join(&record.file_name),
                duration_secs,
            }
        })
        .collect();

    debug!("Assembled timeline with {} entries", entries.len());
    Ok(entries)
}

/// Time between the first and last captured frame
pub fn total_duration(records: &[FrameRecord]) -> Duration {
    match (records.first(), records.last()) {
        (Some(first), Some(last)) => last.captured_at.saturating_sub(first.captured_at),
        _ => Duration::ZERO,
    }
}

pub fn render_manifest(entries: &[ManifestEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "file '{}'", escape_path(&entry.file_path));
        let _ = writeln!(out, "duration {:.6}", entry.duration_secs);
    }
    out
}

/// Write the manifest to `path`, replacing any previous file
pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    std::fs::write(path, render_manifest(entries))?;
    Ok(())
}

/// Quote escaping for the concat demuxer: `'` becomes `'\''`
fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
