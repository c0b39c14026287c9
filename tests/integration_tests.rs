//! Integration tests for sanctclip
//!
//! These tests exercise catalog building, run grouping, coverage resolution
//! and clip cutting together, with a media tool that writes real WAV files.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sanctclip::audio::{ClipFormat, MediaTool};
use sanctclip::catalog::{CatalogBuilder, DurationProbe, FileRecord, NoProbe, TimeRange};
use sanctclip::clip::{ClipCutter, MANIFEST_FILE, SUMMARY_FILE};
use sanctclip::config::Mode;
use sanctclip::coverage::{resolve_windows, CoveragePick};
use sanctclip::error::{Result, SanctclipError};
use sanctclip::runs::{group_consecutive, hours_from_runs, windows_from_points, Window};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const A: &str = "SanctSound_CI01_01_20240101T000000Z.flac";
const B: &str = "SanctSound_CI01_01_20240101T010000Z.flac";

fn t(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

fn low_rate_format() -> ClipFormat {
    ClipFormat {
        sample_rate: 10,
        ..Default::default()
    }
}

// ============================================================================
// Test media tool
// ============================================================================

/// `(source basename, offset secs, duration secs)`
type TrimLog = Arc<Mutex<Vec<(String, f64, f64)>>>;

/// Writes silent WAVs of the requested length instead of decoding anything.
struct WavWritingTool {
    trims: TrimLog,
    fail_on: Option<String>,
    fail_concat: bool,
}

impl WavWritingTool {
    fn new() -> (Self, TrimLog) {
        let trims = TrimLog::default();
        (
            Self {
                trims: trims.clone(),
                fail_on: None,
                fail_concat: false,
            },
            trims,
        )
    }

    fn failing_on(name: &str) -> Self {
        Self {
            trims: TrimLog::default(),
            fail_on: Some(name.to_string()),
            fail_concat: false,
        }
    }

    fn failing_concat() -> Self {
        Self {
            trims: TrimLog::default(),
            fail_on: None,
            fail_concat: true,
        }
    }
}

fn wav_spec(format: &ClipFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: if format.mono { 1 } else { 2 },
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn media_err(e: hound::Error) -> SanctclipError {
    SanctclipError::Media(e.to_string())
}

impl DurationProbe for WavWritingTool {
    fn probe_duration(&self, _identifier: &str) -> Option<std::time::Duration> {
        None
    }
}

#[async_trait]
impl MediaTool for WavWritingTool {
    async fn trim(
        &self,
        source: &Path,
        start: std::time::Duration,
        duration: std::time::Duration,
        output: &Path,
        format: &ClipFormat,
    ) -> Result<()> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_on.as_deref() == Some(name.as_str()) {
            return Err(SanctclipError::Media(format!("decode failed for {name}")));
        }
        self.trims
            .lock()
            .unwrap()
            .push((name, start.as_secs_f64(), duration.as_secs_f64()));

        let spec = wav_spec(format);
        let frames = (duration.as_secs_f64() * format.sample_rate as f64).round() as u64;
        let mut writer = hound::WavWriter::create(output, spec).map_err(media_err)?;
        for _ in 0..frames * spec.channels as u64 {
            writer.write_sample(0i16).map_err(media_err)?;
        }
        writer.finalize().map_err(media_err)
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> Result<()> {
        if self.fail_concat {
            fs::write(output, b"partial").map_err(SanctclipError::Io)?;
            return Err(SanctclipError::Media("concat failed".to_string()));
        }
        let a = hound::WavReader::open(first).map_err(media_err)?;
        let spec = a.spec();
        let mut samples: Vec<i16> = a.into_samples().collect::<std::result::Result<_, _>>().map_err(media_err)?;
        let b = hound::WavReader::open(second).map_err(media_err)?;
        samples.extend(b.into_samples::<i16>().collect::<std::result::Result<Vec<_>, _>>().map_err(media_err)?);

        let mut writer = hound::WavWriter::create(output, spec).map_err(media_err)?;
        for s in samples {
            writer.write_sample(s).map_err(media_err)?;
        }
        writer.finalize().map_err(media_err)
    }

    fn name(&self) -> &'static str {
        "wav-writer"
    }
}

fn dest_with(files: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in files {
        fs::write(dir.path().join(name), b"flac").unwrap();
    }
    dir
}

fn selected(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn cutter(tool: WavWritingTool) -> ClipCutter {
    ClipCutter::new(Box::new(tool))
        .with_format(low_rate_format())
        .with_min_clip_bytes(10_000)
        .with_progress(false)
}

// ============================================================================
// Catalog and resolver
// ============================================================================

mod catalog_tests {
    use super::*;

    fn records(names: &[&str]) -> Vec<FileRecord> {
        names
            .iter()
            .filter_map(|n| FileRecord::from_identifier(format!("gs://b/x/{n}"), Some("x".into())))
            .collect()
    }

    #[test]
    fn test_scenario_a_single_file() {
        let catalog = CatalogBuilder::new().build(records(&[B, A]), &TimeRange::unbounded(), &NoProbe);
        assert_eq!(catalog.get(0).unwrap().end, t(1, 0));
        assert_eq!(catalog.get(1).unwrap().end, t(2, 0));

        let coverage = resolve_windows(&catalog, &[Window::new(t(0, 30), t(1, 0))]);
        match &coverage.picks[0].1 {
            CoveragePick::Single { entry, segment } => {
                assert_eq!(entry.display_name, A);
                assert_eq!(segment.offset_secs(), 1800.0);
                assert_eq!(segment.duration_secs(), 1800.0);
            }
            other => panic!("expected single pick, got {other:?}"),
        }
    }

    #[test]
    fn test_scenario_b_split() {
        let catalog = CatalogBuilder::new().build(records(&[A, B]), &TimeRange::unbounded(), &NoProbe);
        let window = Window::new(t(0, 45), t(1, 15));
        let coverage = resolve_windows(&catalog, &[window]);

        match &coverage.picks[0].1 {
            CoveragePick::Split { first, second, head, tail } => {
                assert_eq!(first.display_name, A);
                assert_eq!(second.display_name, B);
                assert_eq!(head.duration_secs(), 900.0);
                assert_eq!(tail.duration_secs(), 900.0);
                assert_eq!(head.duration + tail.duration, window.duration());
            }
            other => panic!("expected split pick, got {other:?}"),
        }
        assert_eq!(coverage.names, vec![A, B]);
    }

    #[test]
    fn test_scenario_c_window_before_catalog() {
        let catalog = CatalogBuilder::new().build(records(&[A, B]), &TimeRange::unbounded(), &NoProbe);
        let early = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        let coverage = resolve_windows(&catalog, &[Window::new(early, early + Duration::hours(1))]);

        assert_eq!(coverage.picks[0].1, CoveragePick::Unresolved);
        assert!(coverage.identifiers.is_empty());
        assert_eq!(coverage.unresolved_count(), 1);
    }

    #[test]
    fn test_left_boundary_candidate_covers_first_window() {
        let names = [
            "SanctSound_CI01_01_20231231T120000Z.flac",
            "SanctSound_CI01_01_20231231T200000Z.flac",
            "SanctSound_CI01_01_20240101T013000Z.flac",
        ];
        let range = TimeRange::new(t(0, 0), t(2, 0));
        let catalog = CatalogBuilder::new().build(records(&names), &range, &NoProbe);

        assert_eq!(catalog.len(), 2);
        let coverage = resolve_windows(&catalog, &[Window::new(t(0, 0), t(1, 0))]);
        assert_eq!(coverage.names, vec![names[1]]);
    }

    #[test]
    fn test_hour_windows_from_runs() {
        let hours = vec![t(0, 0), t(1, 0), t(2, 0), t(5, 0)];
        let runs = group_consecutive(&hours, Duration::hours(1));
        assert_eq!(runs, vec![Window::new(t(0, 0), t(3, 0)), Window::new(t(5, 0), t(6, 0))]);
        assert_eq!(hours_from_runs(&runs), hours);

        let windows = windows_from_points(&hours_from_runs(&runs), Duration::hours(1));
        let catalog = CatalogBuilder::new().build(records(&[A, B]), &TimeRange::unbounded(), &NoProbe);
        let coverage = resolve_windows(&catalog, &windows);
        // 00:00 and 01:00 are fully covered; 02:00 and 05:00 run past the last file.
        assert_eq!(coverage.unresolved_count(), 2);
        assert_eq!(coverage.picks.len(), 4);
    }
}

// ============================================================================
// Clip cutting
// ============================================================================

mod cutter_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_and_split_clips() {
        let dest = dest_with(&[A, B]);
        let (tool, trims) = WavWritingTool::new();

        let windows = [Window::new(t(0, 30), t(1, 0)), Window::new(t(0, 45), t(1, 15))];
        let summary = cutter(tool)
            .clip_windows(dest.path(), "set_1h", Mode::Hour, &windows, &selected(&[A, B]))
            .await
            .unwrap();

        assert_eq!(summary.total_windows, 2);
        assert_eq!(summary.written(), 2);
        assert_eq!(summary.skipped, 0);

        let single = &summary.records[0];
        assert_eq!(single.sources, A);
        assert_eq!(single.duration_sec, 1800.0);
        assert_eq!(single.start_utc, "2024-01-01T00:30:00Z");

        let split = &summary.records[1];
        assert_eq!(split.sources, format!("{A} + {B}"));
        assert_eq!(split.duration_sec, 1800.0);

        let trims = trims.lock().unwrap().clone();
        assert_eq!(
            trims,
            vec![
                (A.to_string(), 1800.0, 1800.0),
                (A.to_string(), 2700.0, 900.0),
                (B.to_string(), 0.0, 900.0),
            ]
        );

        let clips = dest.path().join("clips").join("set_1h");
        let stitched = clips.join(&split.clip_wav);
        let reader = hound::WavReader::open(&stitched).unwrap();
        assert_eq!(reader.duration(), 18_000);
        assert_eq!(reader.spec().channels, 1);
    }

    #[tokio::test]
    async fn test_manifest_and_summary_written() {
        let dest = dest_with(&[A, B]);
        let (tool, _) = WavWritingTool::new();
        let early = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        let windows = [
            Window::new(t(0, 0), t(0, 30)),
            Window::new(early, early + Duration::hours(1)),
        ];

        let summary = cutter(tool)
            .clip_windows(dest.path(), "grp", Mode::Event, &windows, &selected(&[A, B]))
            .await
            .unwrap();
        assert_eq!(summary.written(), 1);
        assert_eq!(summary.skipped, 1);

        let clips = dest.path().join("clips").join("grp");
        let manifest = fs::read_to_string(clips.join(MANIFEST_FILE)).unwrap();
        let mut lines = manifest.lines();
        assert_eq!(
            lines.next().unwrap(),
            "clip_wav,source_flac(s),start_utc,end_utc,duration_sec,mode"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("SanctSound_CI01_01_20240101T000000Z__20240101T000000_20240101T003000.wav,"));
        assert!(row.ends_with(",1800.0,EVENT"));
        assert!(lines.next().is_none());

        let text = fs::read_to_string(clips.join(SUMMARY_FILE)).unwrap();
        assert!(text.starts_with("Windows: 2 | Clips: 1 | Skipped: 1 | Mode: EVENT\nDir: "));
    }

    #[tokio::test]
    async fn test_unselected_source_is_never_cut() {
        let dest = dest_with(&[A, B]);
        let (tool, trims) = WavWritingTool::new();
        let windows = [Window::new(t(0, 45), t(1, 15)), Window::new(t(1, 10), t(1, 40))];

        let summary = cutter(tool)
            .clip_windows(dest.path(), "grp", Mode::Hour, &windows, &selected(&[A]))
            .await
            .unwrap();

        // B is invisible: the split window loses its second half, the other has no source.
        assert_eq!(summary.written(), 0);
        assert_eq!(summary.skipped, 2);
        assert!(trims.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undersized_output_is_deleted() {
        let dest = dest_with(&[A]);
        let (tool, _) = WavWritingTool::new();
        // 60 s at 10 Hz is ~1.2 KB, under the 10 KB floor.
        let windows = [Window::new(t(0, 0), t(0, 1))];

        let summary = cutter(tool)
            .clip_windows(dest.path(), "grp", Mode::Event, &windows, &selected(&[A]))
            .await
            .unwrap();

        assert_eq!(summary.written(), 0);
        assert_eq!(summary.skipped, 1);
        let clips = dest.path().join("clips").join("grp");
        let wavs: Vec<_> = fs::read_dir(&clips)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "wav"))
            .collect();
        assert!(wavs.is_empty());
    }

    #[tokio::test]
    async fn test_media_failure_counts_as_skip() {
        let dest = dest_with(&[A, B]);
        let windows = [Window::new(t(0, 0), t(0, 30)), Window::new(t(1, 0), t(1, 30))];

        let summary = cutter(WavWritingTool::failing_on(A))
            .clip_windows(dest.path(), "grp", Mode::Hour, &windows, &selected(&[A, B]))
            .await
            .unwrap();

        assert_eq!(summary.written(), 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.records[0].sources, B);
    }

    #[tokio::test]
    async fn test_split_across_deployments_is_skipped() {
        // A ends at 01:00 by fallback; the other deployment only resumes at 01:30.
        let other = "SanctSound_CI01_02_20240101T013000Z.flac";
        let dest = dest_with(&[A, other]);
        let (tool, trims) = WavWritingTool::new();
        let windows = [Window::new(t(0, 45), t(1, 45)), Window::new(t(0, 10), t(0, 40))];

        let summary = cutter(tool)
            .clip_windows(dest.path(), "grp", Mode::Event, &windows, &selected(&[A, other]))
            .await
            .unwrap();

        assert_eq!(summary.written(), 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.records[0].start_utc, "2024-01-01T00:10:00Z");
        assert_eq!(
            trims.lock().unwrap().clone(),
            vec![(A.to_string(), 600.0, 1800.0)]
        );
    }

    #[tokio::test]
    async fn test_failed_stitch_leaves_no_files() {
        for tool in [WavWritingTool::failing_on(B), WavWritingTool::failing_concat()] {
            let dest = dest_with(&[A, B]);
            let scratch = TempDir::new().unwrap();
            let windows = [Window::new(t(0, 45), t(1, 15))];

            let summary = cutter(tool)
                .with_scratch_dir(scratch.path())
                .clip_windows(dest.path(), "grp", Mode::Hour, &windows, &selected(&[A, B]))
                .await
                .unwrap();

            assert_eq!(summary.written(), 0);
            assert_eq!(summary.skipped, 1);

            let clips = dest.path().join("clips").join("grp");
            let wavs: Vec<_> = fs::read_dir(&clips)
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|x| x == "wav"))
                .collect();
            assert!(wavs.is_empty());
            assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn test_missing_destination_is_an_error() {
        let (tool, _) = WavWritingTool::new();
        let result = cutter(tool)
            .clip_windows(
                Path::new("/nonexistent/sanctclip"),
                "grp",
                Mode::Hour,
                &[],
                &HashSet::new(),
            )
            .await;
        assert!(matches!(result, Err(SanctclipError::FileNotFound(_))));
    }
}
