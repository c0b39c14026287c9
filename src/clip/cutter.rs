use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::audio::{verify_wav, ClipFormat, MediaTool};
use crate::catalog::{Catalog, CatalogBuilder, CatalogEntry, FileRecord, TimeRange};
use crate::config::{Config, Mode};
use crate::coverage::{resolve_window, CoveragePick, Segment};
use crate::error::{Result, SanctclipError};
use crate::runs::Window;
use crate::timeparse::{compact_stamp, deployment_from_filename, iso};

use super::manifest::{round_millis, ClipRecord, ClipSummary};

/// Log a progress line every this many windows.
const PROGRESS_EVERY: usize = 100;

/// Why a window produced no clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoCoverage,
    NotSelected(String),
    EmptyRange,
    /// The two recordings of a split window do not meet end to start.
    Discontinuous { first: String, second: String },
    BelowMinimumSize(u64),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCoverage => write!(f, "no local coverage"),
            SkipReason::NotSelected(name) => write!(f, "{name} not selected"),
            SkipReason::EmptyRange => write!(f, "empty range"),
            SkipReason::Discontinuous { first, second } => {
                write!(f, "{first} and {second} are not contiguous")
            }
            SkipReason::BelowMinimumSize(bytes) => write!(f, "output only {bytes} bytes"),
        }
    }
}

enum WindowOutcome {
    Written(ClipRecord),
    Skipped(SkipReason),
}

/// Cuts one clip per window from locally present, user-selected recordings.
pub struct ClipCutter {
    media: Arc<dyn MediaTool>,
    format: ClipFormat,
    min_clip_bytes: u64,
    catalog_builder: CatalogBuilder,
    scratch_dir: Option<PathBuf>,
    show_progress: bool,
}

impl ClipCutter {
    pub fn new(media: Box<dyn MediaTool>) -> Self {
        Self {
            media: Arc::from(media),
            format: ClipFormat::default(),
            min_clip_bytes: 10_000,
            catalog_builder: CatalogBuilder::default(),
            scratch_dir: None,
            show_progress: true,
        }
    }

    pub fn from_config(media: Box<dyn MediaTool>, config: &Config) -> Self {
        Self::new(media)
            .with_format(ClipFormat::from_config(config))
            .with_min_clip_bytes(config.min_clip_bytes)
            .with_catalog_builder(CatalogBuilder::from_config(config))
    }

    pub fn with_format(mut self, format: ClipFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_min_clip_bytes(mut self, bytes: u64) -> Self {
        self.min_clip_bytes = bytes;
        self
    }

    pub fn with_catalog_builder(mut self, builder: CatalogBuilder) -> Self {
        self.catalog_builder = builder;
        self
    }

    /// Parent directory for the per-window stitch parts (system temp dir by default).
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Enable or disable progress bar display.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Cut every window from the selected local recordings and write the
    /// manifest and summary to `{dest_dir}/clips/{group}/`.
    pub async fn clip_windows(
        &self,
        dest_dir: &Path,
        group: &str,
        mode: Mode,
        windows: &[Window],
        selected: &HashSet<String>,
    ) -> Result<ClipSummary> {
        if !dest_dir.is_dir() {
            return Err(SanctclipError::FileNotFound(dest_dir.display().to_string()));
        }

        let catalog = {
            let media = Arc::clone(&self.media);
            let builder = self.catalog_builder.clone();
            let dir = dest_dir.to_path_buf();
            let selected = selected.clone();
            tokio::task::spawn_blocking(move || {
                local_catalog(&dir, &selected, &builder, media.as_ref())
            })
            .await
            .map_err(|e| SanctclipError::Media(format!("Local catalog task failed: {e}")))??
        };
        let clips_dir = dest_dir.join("clips").join(group);
        self.clip_with_catalog(&catalog, &clips_dir, mode, windows, selected)
            .await
    }

    /// Cut every window against an explicit catalog into `clips_dir`.
    pub async fn clip_with_catalog(
        &self,
        catalog: &Catalog,
        clips_dir: &Path,
        mode: Mode,
        windows: &[Window],
        selected: &HashSet<String>,
    ) -> Result<ClipSummary> {
        std::fs::create_dir_all(clips_dir)?;

        info!(
            "Cutting {} {} windows from {} local recordings with {}",
            windows.len(),
            mode,
            catalog.len(),
            self.media.name()
        );

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(windows.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} windows ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut records = Vec::new();
        let mut skipped = 0;

        for (k, window) in windows.iter().enumerate() {
            match self
                .cut_window(catalog, window, clips_dir, mode, selected)
                .await
            {
                Ok(WindowOutcome::Written(record)) => records.push(record),
                Ok(WindowOutcome::Skipped(reason)) => {
                    debug!("Skipping {} -> {}: {}", iso(&window.start), iso(&window.end), reason);
                    skipped += 1;
                }
                Err(e) => {
                    warn!("Cutting {} failed: {}", iso(&window.start), e);
                    skipped += 1;
                }
            }

            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
            if (k + 1) % PROGRESS_EVERY == 0 {
                info!("  cut {}/{} windows", k + 1, windows.len());
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        let summary = ClipSummary {
            total_windows: windows.len(),
            skipped,
            mode,
            directory: clips_dir.to_path_buf(),
            records,
        };
        summary.write_artifacts()?;

        info!(
            "Clips -> {} | written {}, skipped {}",
            clips_dir.display(),
            summary.written(),
            summary.skipped
        );

        Ok(summary)
    }

    async fn cut_window(
        &self,
        catalog: &Catalog,
        window: &Window,
        clips_dir: &Path,
        mode: Mode,
        selected: &HashSet<String>,
    ) -> Result<WindowOutcome> {
        let pick = resolve_window(catalog, window);

        for entry in pick.entries() {
            if !selected.contains(&entry.display_name) {
                return Ok(WindowOutcome::Skipped(SkipReason::NotSelected(
                    entry.display_name.clone(),
                )));
            }
        }

        match pick {
            CoveragePick::Unresolved | CoveragePick::Partial { .. } => {
                Ok(WindowOutcome::Skipped(SkipReason::NoCoverage))
            }
            CoveragePick::Single { entry, segment } => {
                if segment.is_empty() {
                    return Ok(WindowOutcome::Skipped(SkipReason::EmptyRange));
                }
                let output = clips_dir.join(clip_name(entry, window));
                let result = self.trim(entry, &segment, &output).await;
                self.finish(result, output, window, mode, entry.display_name.clone(), segment.duration_secs())
            }
            CoveragePick::Split {
                first,
                second,
                head,
                tail,
            } => {
                if first.end != second.start {
                    return Ok(WindowOutcome::Skipped(SkipReason::Discontinuous {
                        first: first.display_name.clone(),
                        second: second.display_name.clone(),
                    }));
                }
                if head.is_empty() || tail.is_empty() {
                    return Ok(WindowOutcome::Skipped(SkipReason::EmptyRange));
                }
                let output = clips_dir.join(clip_name(first, window));
                let result = self.stitch(first, second, &head, &tail, &output).await;
                let sources = format!("{} + {}", first.display_name, second.display_name);
                let duration = head.duration_secs() + tail.duration_secs();
                self.finish(result, output, window, mode, sources, duration)
            }
        }
    }

    async fn trim(&self, entry: &CatalogEntry, segment: &Segment, output: &Path) -> Result<()> {
        self.media
            .trim(
                Path::new(&entry.identifier),
                to_std(segment.offset_secs()),
                to_std(segment.duration_secs()),
                output,
                &self.format,
            )
            .await
    }

    /// Trim both parts into a scratch directory and join them.
    ///
    /// The scratch directory is removed when it goes out of scope, on every path.
    async fn stitch(
        &self,
        first: &CatalogEntry,
        second: &CatalogEntry,
        head: &Segment,
        tail: &Segment,
        output: &Path,
    ) -> Result<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sanctclip");
        let scratch = match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        let part_a = scratch.path().join("part_a.wav");
        let part_b = scratch.path().join("part_b.wav");

        self.trim(first, head, &part_a).await?;
        self.trim(second, tail, &part_b).await?;
        self.media.concat(&part_a, &part_b, output).await
    }

    /// Validate a freshly cut output and turn it into a manifest row.
    fn finish(
        &self,
        result: Result<()>,
        output: PathBuf,
        window: &Window,
        mode: Mode,
        sources: String,
        duration_secs: f64,
    ) -> Result<WindowOutcome> {
        if let Err(e) = result {
            remove_quietly(&output);
            return Err(e);
        }

        let size = std::fs::metadata(&output)?.len();
        if size < self.min_clip_bytes {
            remove_quietly(&output);
            return Ok(WindowOutcome::Skipped(SkipReason::BelowMinimumSize(size)));
        }
        if let Err(e) = verify_wav(&output, &self.format) {
            remove_quietly(&output);
            return Err(e);
        }

        let clip_wav = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(WindowOutcome::Written(ClipRecord {
            clip_wav,
            sources,
            start_utc: iso(&window.start),
            end_utc: iso(&window.end),
            duration_sec: round_millis(duration_secs),
            mode,
        }))
    }
}

/// Catalog of `.flac` files in `dest_dir` whose basename is in `selected`.
///
/// Files on disk that were not selected are invisible here. The last file of
/// each deployment is probed with the media tool, which blocks.
fn local_catalog(
    dest_dir: &Path,
    selected: &HashSet<String>,
    builder: &CatalogBuilder,
    probe: &dyn MediaTool,
) -> Result<Catalog> {
    let mut records = Vec::new();

    for dir_entry in std::fs::read_dir(dest_dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.to_lowercase().ends_with(".flac") || !selected.contains(name) {
            continue;
        }
        let group = deployment_from_filename(name);
        if let Some(record) = FileRecord::from_identifier(path.display().to_string(), group) {
            records.push(record);
        }
    }

    debug!("Local catalog: {} selected recordings", records.len());
    Ok(builder.build(records, &TimeRange::unbounded(), probe))
}

/// `{sourceStem}__{startCompact}_{endCompact}.wav`
pub fn clip_name(entry: &CatalogEntry, window: &Window) -> String {
    format!(
        "{}__{}_{}.wav",
        entry.stem(),
        compact_stamp(&window.start),
        compact_stamp(&window.end)
    )
}

fn to_std(secs: f64) -> std::time::Duration {
    std::time::Duration::from_secs_f64(secs.max(0.0))
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_clip_name() {
        let entry = CatalogEntry {
            identifier: "/data/SanctSound_CI01_01_20240101T000000Z.flac".into(),
            display_name: "SanctSound_CI01_01_20240101T000000Z.flac".into(),
            start: t(0, 0),
            end: t(1, 0),
            group_key: None,
        };
        let name = clip_name(&entry, &Window::new(t(0, 30), t(1, 0)));
        assert_eq!(
            name,
            "SanctSound_CI01_01_20240101T000000Z__20240101T003000_20240101T010000.wav"
        );
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::NotSelected("a.flac".into()).to_string(),
            "a.flac not selected"
        );
        assert_eq!(SkipReason::BelowMinimumSize(12).to_string(), "output only 12 bytes");
        assert_eq!(
            SkipReason::Discontinuous {
                first: "a.flac".into(),
                second: "b.flac".into()
            }
            .to_string(),
            "a.flac and b.flac are not contiguous"
        );
    }

    #[test]
    fn test_to_std_clamps_negative() {
        assert_eq!(to_std(-1.0), std::time::Duration::ZERO);
        assert_eq!(to_std(1.5), std::time::Duration::from_millis(1500));
    }
}
