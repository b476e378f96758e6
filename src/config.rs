//! Configuration management for framereel

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::encode::{Container, DEFAULT_FFMPEG};
use crate::persist::BACKPRESSURE_THRESHOLD;
use crate::recorder::DEFAULT_FRAME_RATE;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Microphone configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Parent directory for per-session frame material
    #[serde(default = "default_material_root")]
    pub material_root: PathBuf,

    /// Capture ticks per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    #[serde(default)]
    pub container: Container,

    /// Remove frame material after a successful encode
    #[serde(default = "default_true")]
    pub delete_material_when_done: bool,

    /// Pending frames before a background write is launched
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// ffmpeg executable, looked up on PATH when relative
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Record the microphone alongside the screen
    #[serde(default)]
    pub enabled: bool,

    /// Device number substituted into `device_pattern`
    #[serde(default)]
    pub device: i32,

    /// ffmpeg input format (`-f`)
    #[serde(default = "default_input_format")]
    pub input_format: String,

    /// ffmpeg input (`-i`); `{device}` is replaced with the device number
    #[serde(default = "default_device_pattern")]
    pub device_pattern: String,
}

// Default value functions
fn default_material_root() -> PathBuf {
    std::env::temp_dir().join("framereel-material")
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE
}

fn default_true() -> bool {
    true
}

fn default_backpressure_threshold() -> usize {
    BACKPRESSURE_THRESHOLD
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from(DEFAULT_FFMPEG)
}

#[cfg(target_os = "macos")]
fn default_input_format() -> String {
    "avfoundation".to_string()
}

#[cfg(target_os = "windows")]
fn default_input_format() -> String {
    "dshow".to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_input_format() -> String {
    "alsa".to_string()
}

#[cfg(target_os = "macos")]
fn default_device_pattern() -> String {
    ":{device}".to_string()
}

#[cfg(target_os = "windows")]
fn default_device_pattern() -> String {
    "audio={device}".to_string()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_device_pattern() -> String {
    "hw:{device}".to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            material_root: default_material_root(),
            frame_rate: default_frame_rate(),
            container: Container::default(),
            delete_material_when_done: true,
            backpressure_threshold: default_backpressure_threshold(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: 0,
            input_format: default_input_format(),
            device_pattern: default_device_pattern(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "framereel", "framereel")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
