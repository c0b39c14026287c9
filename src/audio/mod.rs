pub mod ffmpeg;

pub use ffmpeg::{check_ffmpeg, check_ffprobe, get_audio_duration, FfmpegTool};

use crate::catalog::DurationProbe;
use crate::config::Config;
use crate::error::{Result, SanctclipError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Output audio properties every clip is normalised to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipFormat {
    pub sample_rate: u32,
    pub mono: bool,
    /// ffmpeg sample format name, e.g. `s16`.
    pub sample_format: String,
}

impl Default for ClipFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            mono: true,
            sample_format: "s16".to_string(),
        }
    }
}

impl ClipFormat {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_rate: config.clip_sample_rate,
            mono: config.clip_mono,
            sample_format: config.clip_sample_format.clone(),
        }
    }
}

/// Trim and concatenate primitives used to cut clips.
#[async_trait]
pub trait MediaTool: DurationProbe + Send + Sync {
    /// Cut `duration` starting at `start` from `source`, normalised to `format`.
    async fn trim(
        &self,
        source: &Path,
        start: Duration,
        duration: Duration,
        output: &Path,
        format: &ClipFormat,
    ) -> Result<()>;

    /// Join two same-format parts without re-encoding.
    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Summary of a written WAV clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
}

/// Read a WAV header and check it matches the requested clip format.
pub fn verify_wav(path: &Path, format: &ClipFormat) -> Result<WavInfo> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        SanctclipError::Media(format!("Unreadable WAV {}: {e}", path.display()))
    })?;
    let spec = reader.spec();
    let frames = reader.duration();

    if spec.sample_rate != format.sample_rate {
        return Err(SanctclipError::Media(format!(
            "{} has sample rate {} (expected {})",
            path.display(),
            spec.sample_rate,
            format.sample_rate
        )));
    }
    if format.mono && spec.channels != 1 {
        return Err(SanctclipError::Media(format!(
            "{} has {} channels (expected mono)",
            path.display(),
            spec.channels
        )));
    }

    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration: Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64),
    })
}
