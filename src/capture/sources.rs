//! Built-in frame sources
//!
//! `TestPatternSource` draws a synthetic moving pattern and needs no display.
//! `CommandFrameSource` shells out to a screenshot tool that writes an image
//! to stdout (e.g. `grim -g "{x},{y} {w}x{h}" -` on Wayland).

use image::{Rgba, RgbaImage};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use super::{CaptureError, FrameSource, Region};

/// Width of the sweeping bar in the test pattern
const BAR_WIDTH: u32 = 16;

/// Synthetic source: a gradient background with a vertical bar that advances
/// one step per captured frame
#[derive(Debug, Default)]
pub struct TestPatternSource {
    tick: u32,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for TestPatternSource {
    fn capture_frame(&mut self, region: &Region) -> Result<RgbaImage, CaptureError> {
        let (width, height) = (region.width, region.height);
        if width == 0 || height == 0 {
            return Err(CaptureError::Unavailable("empty capture region".to_string()));
        }

        let bar_x = (self.tick * 4) % width.max(1);
        self.tick = self.tick.wrapping_add(1);

        let image = RgbaImage::from_fn(width, height, |x, y| {
            if x >= bar_x && x < bar_x + BAR_WIDTH {
                Rgba([255, 255, 255, 255])
            } else {
                let r = (x * 255 / width) as u8;
                let g = (y * 255 / height) as u8;
                Rgba([r, g, 96, 255])
            }
        });
        Ok(image)
    }
}

/// Runs an external screenshot command on every tick.
///
/// `{x}`, `{y}`, `{w}` and `{h}` in the arguments are replaced with the
/// region geometry. The command must print a single encoded image (PNG,
/// PPM, ...) on stdout.
#[derive(Debug, Clone)]
pub struct CommandFrameSource {
    program: String,
    args: Vec<String>,
}

impl CommandFrameSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line into program and arguments
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn expand_args(&self, region: &Region) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{x}", &region.x.to_string())
                    .replace("{y}", &region.y.to_string())
                    .replace("{w}", &region.width.to_string())
                    .replace("{h}", &region.height.to_string())
            })
            .collect()
    }
}

impl FrameSource for CommandFrameSource {
    fn capture_frame(&mut self, region: &Region) -> Result<RgbaImage, CaptureError> {
        let args = self.expand_args(region);
        debug!("Capturing frame via {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Screenshot command failed ({}): {}", output.status, stderr.trim());
            return Err(CaptureError::Unavailable(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let image = image::load_from_memory(&output.stdout)?;
        Ok(image.to_rgba8())
    }
}
