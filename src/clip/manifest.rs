use crate::config::Mode;
use crate::error::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "clips_manifest.csv";
pub const SUMMARY_FILE: &str = "clips_summary.txt";

const MANIFEST_HEADER: [&str; 6] = [
    "clip_wav",
    "source_flac(s)",
    "start_utc",
    "end_utc",
    "duration_sec",
    "mode",
];

/// One written clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipRecord {
    pub clip_wav: String,
    /// Source name, or two names joined by `" + "` for stitched clips.
    pub sources: String,
    pub start_utc: String,
    pub end_utc: String,
    /// Seconds, rounded to milliseconds.
    pub duration_sec: f64,
    pub mode: Mode,
}

/// Outcome of one clipping batch.
#[derive(Debug, Clone)]
pub struct ClipSummary {
    pub total_windows: usize,
    pub skipped: usize,
    pub mode: Mode,
    pub directory: PathBuf,
    pub records: Vec<ClipRecord>,
}

impl ClipSummary {
    pub fn written(&self) -> usize {
        self.records.len()
    }

    /// `Windows: n | Clips: n | Skipped: n | Mode: m` followed by `Dir: path`.
    pub fn summary_text(&self) -> String {
        format!(
            "Windows: {} | Clips: {} | Skipped: {} | Mode: {}\nDir: {}\n",
            self.total_windows,
            self.written(),
            self.skipped,
            self.mode,
            self.directory.display()
        )
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE)
    }

    /// Write the manifest CSV and the summary text next to the clips.
    pub fn write_artifacts(&self) -> Result<()> {
        write_manifest(&self.manifest_path(), &self.records)?;
        std::fs::write(self.directory.join(SUMMARY_FILE), self.summary_text())?;
        Ok(())
    }
}

/// Round seconds to three decimals.
pub fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

/// Header row is always written, even without records.
pub fn write_manifest(path: &Path, records: &[ClipRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(MANIFEST_HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ClipRecord {
        ClipRecord {
            clip_wav: "a__20240101T004500_20240101T011500.wav".to_string(),
            sources: "a.flac + b.flac".to_string(),
            start_utc: "2024-01-01T00:45:00Z".to_string(),
            end_utc: "2024-01-01T01:15:00Z".to_string(),
            duration_sec: 1800.0,
            mode: Mode::Event,
        }
    }

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(1.23456), 1.235);
        assert_eq!(round_millis(900.0), 900.0);
    }

    #[test]
    fn test_manifest_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        write_manifest(&path, &[record()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("clip_wav,source_flac(s),start_utc,end_utc,duration_sec,mode")
        );
        assert_eq!(
            lines.next(),
            Some("a__20240101T004500_20240101T011500.wav,a.flac + b.flac,2024-01-01T00:45:00Z,2024-01-01T01:15:00Z,1800.0,EVENT")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_empty_manifest_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        write_manifest(&path, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_summary_text() {
        let summary = ClipSummary {
            total_windows: 3,
            skipped: 2,
            mode: Mode::Hour,
            directory: PathBuf::from("/data/clips/grp"),
            records: vec![record()],
        };
        assert_eq!(
            summary.summary_text(),
            "Windows: 3 | Clips: 1 | Skipped: 2 | Mode: HOUR\nDir: /data/clips/grp\n"
        );
    }
}
