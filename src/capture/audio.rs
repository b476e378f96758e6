//! Microphone capture
//!
//! [`FfmpegAudioSource`] records the selected input device with the same
//! ffmpeg executable that encodes the video. Each start/resume writes a new
//! WAV segment; on stop the segments are stitched into the session's
//! microphone file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::{RecorderError, Result};

/// Sample rate of the recorded microphone track
pub const MIC_SAMPLE_RATE: u32 = 44_100;
/// Channel count of the recorded microphone track
pub const MIC_CHANNELS: u16 = 2;

/// Records audio to a WAV file alongside the captured frames
pub trait AudioSource: Send {
    /// Begin recording into `output_path`
    fn start(&mut self, output_path: &Path) -> Result<()>;

    /// Suspend recording; samples are not written until [`AudioSource::resume`]
    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Finish recording. The output file is complete once this returns.
    fn stop(&mut self) -> Result<()>;
}

/// Microphone recorder backed by an ffmpeg child process
#[derive(Debug)]
pub struct FfmpegAudioSource {
    ffmpeg_path: PathBuf,
    input_format: String,
    device: String,
    output_path: Option<PathBuf>,
    segments: Vec<PathBuf>,
    child: Option<Child>,
}

impl FfmpegAudioSource {
    /// `device_pattern` may contain `{device}`, replaced with the device number
    /// (e.g. `hw:{device}` for ALSA).
    pub fn new(
        ffmpeg_path: impl Into<PathBuf>,
        input_format: impl Into<String>,
        device_pattern: &str,
        device_number: i32,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            input_format: input_format.into(),
            device: device_pattern.replace("{device}", &device_number.to_string()),
            output_path: None,
            segments: Vec::new(),
            child: None,
        }
    }

    fn segment_path(output_path: &Path, index: usize) -> PathBuf {
        let stem = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Microphone".to_string());
        output_path.with_file_name(format!("{}.part{:03}.wav", stem, index))
    }

    fn spawn_segment(&mut self) -> Result<()> {
        let output_path = self
            .output_path
            .clone()
            .ok_or_else(|| RecorderError::Audio("audio source was never started".to_string()))?;
        let segment = Self::segment_path(&output_path, self.segments.len());

        debug!(
            "Starting microphone segment {:?} from {} device {}",
            segment, self.input_format, self.device
        );
        let child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-f"])
            .arg(&self.input_format)
            .arg("-i")
            .arg(&self.device)
            .arg("-ar")
            .arg(MIC_SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(MIC_CHANNELS.to_string())
            .args(["-c:a", "pcm_s16le", "-y"])
            .arg(&segment)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecorderError::Audio(format!("failed to start microphone capture: {}", e)))?;

        self.child = Some(child);
        self.segments.push(segment);
        Ok(())
    }

    /// Ask the running ffmpeg to quit so the WAV header is finalized
    fn finish_segment(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q") {
                warn!("Failed to signal microphone capture to quit: {}", e);
                let _ = child.kill();
            }
        }

        let status = child
            .wait()
            .map_err(|e| RecorderError::Audio(format!("failed to wait for microphone capture: {}", e)))?;
        debug!("Microphone segment finished with {}", status);
        Ok(())
    }

    fn stitch_segments(&mut self) -> Result<()> {
        let Some(output_path) = self.output_path.clone() else {
            return Ok(());
        };
        let segments: Vec<PathBuf> = std::mem::take(&mut self.segments)
            .into_iter()
            .filter(|p| p.exists())
            .collect();

        match segments.as_slice() {
            [] => {
                warn!("Microphone capture produced no audio");
                Ok(())
            }
            [single] => Ok(std::fs::rename(single, &output_path)?),
            _ => {
                concat_wav(&segments, &output_path)?;
                for segment in &segments {
                    let _ = std::fs::remove_file(segment);
                }
                Ok(())
            }
        }
    }
}

impl AudioSource for FfmpegAudioSource {
    fn start(&mut self, output_path: &Path) -> Result<()> {
        if self.child.is_some() {
            return Err(RecorderError::Audio("microphone capture already running".to_string()));
        }
        info!("Recording microphone to {:?}", output_path);
        self.output_path = Some(output_path.to_path_buf());
        self.segments.clear();
        self.spawn_segment()
    }

    fn pause(&mut self) -> Result<()> {
        self.finish_segment()
    }

    fn resume(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        self.spawn_segment()
    }

    fn stop(&mut self) -> Result<()> {
        self.finish_segment()?;
        self.stitch_segments()
    }
}

impl Drop for FfmpegAudioSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Concatenate 16-bit WAV files that share one format
fn concat_wav(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let audio_err = |e: hound::Error| RecorderError::Audio(e.to_string());

    let first = hound::WavReader::open(&inputs[0]).map_err(audio_err)?;
    let spec = first.spec();
    drop(first);

    let mut writer = hound::WavWriter::create(output, spec).map_err(audio_err)?;
    for input in inputs {
        let mut reader = hound::WavReader::open(input).map_err(audio_err)?;
        if reader.spec() != spec {
            return Err(RecorderError::Audio(format!(
                "segment {:?} has a different format",
                input
            )));
        }
        for sample in reader.samples::<i16>() {
            writer.write_sample(sample.map_err(audio_err)?).map_err(audio_err)?;
        }
    }
    writer.finalize().map_err(audio_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tone(path: &Path, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: MIC_CHANNELS,
            sample_rate: MIC_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_device_pattern_expansion() {
        let source = FfmpegAudioSource::new("ffmpeg", "alsa", "hw:{device}", 2);
        assert_eq!(source.device, "hw:2");
    }

    #[test]
    fn test_segment_paths() {
        let path = FfmpegAudioSource::segment_path(Path::new("/tmp/rec/Microphone.wav"), 1);
        assert_eq!(path, PathBuf::from("/tmp/rec/Microphone.part001.wav"));
    }

    #[test]
    fn test_concat_wav_appends_segments() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_tone(&a, &[1, 2, 3, 4]);
        write_tone(&b, &[5, 6]);

        let out = dir.path().join("out.wav");
        concat_wav(&[a, b], &out).unwrap();

        let mut reader = hound::WavReader::open(&out).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_resume_before_start_fails() {
        let mut source = FfmpegAudioSource::new("ffmpeg", "alsa", "hw:{device}", 0);
        assert!(matches!(source.resume(), Err(RecorderError::Audio(_))));
    }
}
