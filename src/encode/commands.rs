use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Requested output container; decides the video codec flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Avi,
    /// Anything else is passed through with ffmpeg's default codec choice
    Other(String),
}

impl Container {
    /// `-c:v` value, if this container pins one
    pub fn video_codec(&self) -> Option<&'static str> {
        match self {
            Container::Mp4 | Container::Mkv => Some("libx264"),
            Container::Avi => Some("mjpeg"),
            Container::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Avi => "avi",
            Container::Other(other) => other,
        }
    }
}

impl From<&str> for Container {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp4" => Container::Mp4,
            "mkv" => Container::Mkv,
            "avi" => Container::Avi,
            other => Container::Other(other.to_string()),
        }
    }
}

impl From<String> for Container {
    fn from(value: String) -> Self {
        Container::from(value.as_str())
    }
}

impl From<Container> for String {
    fn from(value: Container) -> Self {
        value.as_str().to_string()
    }
}

impl std::str::FromStr for Container {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Container::from(s))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Make dimensions acceptable for yuv420p.
///
/// Odd widths shrink by one, odd heights grow by one.
pub fn normalize_dimensions(width: u32, height: u32) -> (u32, u32) {
    let width = if width % 2 != 0 {
        debug!("Adjusting odd width {}", width);
        width - 1
    } else {
        width
    };
    let height = if height % 2 != 0 {
        debug!("Adjusting odd height {}", height);
        height + 1
    } else {
        height
    };
    (width, height)
}

/// Builds the ffmpeg argument list for one recording
#[derive(Debug, Clone)]
pub struct EncoderCommandBuilder {
    manifest_path: PathBuf,
    output_path: PathBuf,
    audio_path: Option<PathBuf>,
    container: Container,
    width: u32,
    height: u32,
    duration: Duration,
}

impl EncoderCommandBuilder {
    pub fn new(manifest_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            output_path: output_path.into(),
            audio_path: None,
            container: Container::default(),
            width: 0,
            height: 0,
            duration: Duration::ZERO,
        }
    }

    /// Mux a recorded microphone track
    pub fn with_audio(mut self, audio_path: Option<PathBuf>) -> Self {
        self.audio_path = audio_path;
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    /// Capture region size; normalized when the arguments are built
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Bound on the output length (last capture minus first capture)
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            self.manifest_path.to_string_lossy().into_owned(),
        ];

        if let Some(audio) = &self.audio_path {
            args.push("-i".to_string());
            args.push(audio.to_string_lossy().into_owned());
        }

        if let Some(codec) = self.container.video_codec() {
            args.push("-c:v".to_string());
            args.push(codec.to_string());
        }

        args.extend(["-qscale:v".to_string(), "0".to_string()]);

        // Lossless
        if self.container == Container::Mkv {
            args.extend([
                "-preset".to_string(),
                "ultrafast".to_string(),
                "-crf".to_string(),
                "0".to_string(),
            ]);
        }

        if self.audio_path.is_some() {
            args.extend(["-c:a".to_string(), "mp3".to_string()]);
        }

        let (width, height) = normalize_dimensions(self.width, self.height);
        args.extend([
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-t".to_string(),
            format!("{:.6}", self.duration.as_secs_f64()),
            "-y".to_string(),
            self.output_path.to_string_lossy().into_owned(),
        ]);

        args
    }
}
