//! Frame value types and the concat manifest built from them

mod frame;
mod manifest;

pub use frame::{frame_file_name, Frame, FrameRecord};
pub use manifest::{
    assemble_timeline, render_manifest, total_duration, write_manifest, ManifestEntry,
    LAST_FRAME_DURATION_SECS, MANIFEST_FILE_NAME,
};
