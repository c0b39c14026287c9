use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::DurationProbe;
use crate::error::{Result, SanctclipError};

use super::{ClipFormat, MediaTool};

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            SanctclipError::Media(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(SanctclipError::Media("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Check if FFprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .map_err(|e| {
            SanctclipError::Media(format!(
                "FFprobe not found. Please install FFmpeg (includes FFprobe). Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(SanctclipError::Media("FFprobe check failed".to_string()));
    }

    debug!("FFprobe is available");
    Ok(())
}

/// Get audio duration using FFprobe.
pub fn get_audio_duration(input: &Path) -> Result<Duration> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .map_err(|e| SanctclipError::Media(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SanctclipError::Media(format!("FFprobe failed: {stderr}")));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let duration_secs: f64 = duration_str.trim().parse().map_err(|e| {
        SanctclipError::Media(format!(
            "Failed to parse duration '{}': {e}",
            duration_str.trim()
        ))
    })?;

    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(SanctclipError::Media(format!(
            "Implausible duration: {duration_secs}"
        )));
    }

    Ok(Duration::from_secs_f64(duration_secs))
}

/// Build the argument list for a normalising trim.
fn trim_args(
    source: &Path,
    start: Duration,
    duration: Duration,
    output: &Path,
    format: &ClipFormat,
) -> Vec<String> {
    // ffmpeg rejects zero-length cuts; 10 ms is the shortest it is asked for.
    let duration_secs = duration.as_secs_f64().max(0.01);

    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", start.as_secs_f64()),
        "-t".to_string(),
        format!("{:.3}", duration_secs),
        "-i".to_string(),
        source.display().to_string(),
        "-vn".to_string(),
    ];
    if format.mono {
        args.extend(["-ac".to_string(), "1".to_string()]);
    }
    args.extend([
        "-ar".to_string(),
        format.sample_rate.to_string(),
        "-sample_fmt".to_string(),
        format.sample_format.clone(),
        output.display().to_string(),
    ]);
    args
}

/// Contents of an ffmpeg concat-demuxer list file.
fn concat_list(first: &Path, second: &Path) -> String {
    let quote = |p: &Path| p.display().to_string().replace('\'', r"'\''");
    format!("file '{}'\nfile '{}'\n", quote(first), quote(second))
}

async fn run_ffmpeg(args: &[String], what: &str) -> Result<()> {
    let output = tokio::process::Command::new("ffmpeg")
        .args(args)
        .output()
        .await
        .map_err(|e| SanctclipError::Media(format!("Failed to run FFmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SanctclipError::Media(format!(
            "FFmpeg {what} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// [`MediaTool`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTool;

impl FfmpegTool {
    pub fn new() -> Self {
        Self
    }

    /// Fails when either binary is missing.
    pub fn checked() -> Result<Self> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(Self)
    }
}

impl DurationProbe for FfmpegTool {
    fn probe_duration(&self, identifier: &str) -> Option<Duration> {
        match get_audio_duration(Path::new(identifier)) {
            Ok(d) => Some(d),
            Err(e) => {
                debug!("Duration probe failed for {identifier}: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn trim(
        &self,
        source: &Path,
        start: Duration,
        duration: Duration,
        output: &Path,
        format: &ClipFormat,
    ) -> Result<()> {
        if !source.exists() {
            return Err(SanctclipError::FileNotFound(source.display().to_string()));
        }

        let args = trim_args(source, start, duration, output, format);
        debug!(
            "Trimming {}: start={:.3}s duration={:.3}s",
            source.display(),
            start.as_secs_f64(),
            duration.as_secs_f64()
        );
        run_ffmpeg(&args, "trim").await
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> Result<()> {
        let mut list = tempfile::Builder::new()
            .prefix("concat_list")
            .suffix(".txt")
            .tempfile()?;
        list.write_all(concat_list(first, second).as_bytes())?;
        list.flush()?;

        let args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.path().display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.display().to_string(),
        ];
        debug!("Concatenating {} + {}", first.display(), second.display());
        run_ffmpeg(&args, "concat").await
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_check_ffmpeg() {
        let result = check_ffmpeg();
        if !ffmpeg_available() {
            eprintln!("Skipping test: FFmpeg not available or broken");
            return;
        }
        assert!(result.is_ok(), "FFmpeg check failed: {:?}", result.err());
    }

    #[test]
    fn test_trim_args_normalise_output() {
        let args = trim_args(
            Path::new("/data/a.flac"),
            Duration::from_secs(1800),
            Duration::from_millis(900_500),
            Path::new("/out/a.wav"),
            &ClipFormat::default(),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-ss 1800.000 -t 900.500 -i /data/a.flac"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.ends_with("-sample_fmt s16 /out/a.wav"));
    }

    #[test]
    fn test_trim_args_stereo_and_minimum_duration() {
        let format = ClipFormat {
            mono: false,
            ..Default::default()
        };
        let args = trim_args(
            Path::new("a.flac"),
            Duration::ZERO,
            Duration::ZERO,
            Path::new("a.wav"),
            &format,
        );
        assert!(!args.contains(&"-ac".to_string()));
        assert!(args.contains(&"0.010".to_string()));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(Path::new("/tmp/a.wav"), Path::new("/tmp/it's.wav"));
        assert_eq!(list, "file '/tmp/a.wav'\nfile '/tmp/it'\\''s.wav'\n");
    }

    #[tokio::test]
    async fn test_trim_missing_source() {
        let result = FfmpegTool::new()
            .trim(
                Path::new("/nonexistent/file.flac"),
                Duration::ZERO,
                Duration::from_secs(1),
                Path::new("/tmp/out.wav"),
                &ClipFormat::default(),
            )
            .await;
        match result {
            Err(SanctclipError::FileNotFound(path)) => assert!(path.contains("nonexistent")),
            other => panic!("Expected FileNotFound error, got: {other:?}"),
        }
    }

    #[test]
    fn test_probe_missing_file_is_none() {
        assert!(FfmpegTool::new().probe_duration("/nonexistent/file.flac").is_none());
    }
}
