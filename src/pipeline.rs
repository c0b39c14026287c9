use crate::catalog::{Catalog, CatalogEntry, TimeRange};
use crate::clip::{ClipCutter, ClipSummary};
use crate::config::{Config, Mode};
use crate::coverage::resolve_windows;
use crate::detections::{parse_events, parse_presence_days, parse_presence_hours, seconds};
use crate::error::{Result, SanctclipError};
use crate::listing::AudioLister;
use crate::products::{extension, list_product_groups, ProductGroup};
use crate::runs::{
    expand_runs, group_consecutive, keep_long_runs, windows_from_points, Window,
};
use crate::store::ObjectStore;
use crate::timeparse::{basename, folder_from_set, iso};
use chrono::Duration;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const SELECTED_URLS_FILE: &str = "debug_selected_urls.txt";
pub const SELECTED_NAMES_FILE: &str = "debug_selected_fnames.txt";
pub const CANDIDATE_URLS_FILE: &str = "debug_candidates_urls.txt";
pub const WINDOWS_FILE: &str = "debug_windows.tsv";
pub const EXPECTED_REPORT_FILE: &str = "debug_expected_vs_selected.txt";

/// Windows derived from a product group's detection tables.
#[derive(Debug, Clone)]
pub struct GroupWindows {
    pub mode: Mode,
    pub windows: Vec<Window>,
    /// Contiguous presence runs (HOUR mode only).
    pub runs: Vec<Window>,
    /// Span to list recordings for; unbounded when there are no windows.
    pub range: TimeRange,
}

/// Everything a preview produced for one product group.
#[derive(Debug, Clone)]
pub struct PreviewResult {
    pub site: String,
    pub group: String,
    pub mode: Mode,
    pub windows: Vec<Window>,
    pub runs: Vec<Window>,
    /// Every recording listed for the time range.
    pub catalog: Catalog,
    /// Sorted union of identifiers the windows need.
    pub urls: Vec<String>,
    /// Sorted union of file names the windows need.
    pub names: Vec<String>,
    /// `start, end, names, urls` per window.
    pub rows: Vec<[String; 4]>,
    pub unresolved: usize,
}

impl PreviewResult {
    /// `Hours: 12 | unique files: 5`
    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} | unique files: {}",
            self.mode.label(),
            self.windows.len(),
            self.names.len()
        )
    }

    /// Catalog entries for the selected recordings, in time order.
    pub fn files(&self) -> Vec<&CatalogEntry> {
        let wanted: HashSet<&str> = self.urls.iter().map(String::as_str).collect();
        self.catalog
            .iter()
            .filter(|e| wanted.contains(e.identifier.as_str()))
            .collect()
    }
}

/// Derive windows from local detection tables.
///
/// HOUR: presence hours, grouped into runs (optionally only runs of at least
/// `config.min_run_hours`), one window per hour. DAY: one window per day with
/// presence. EVENT: explicit spans, deduplicated and sorted by start.
pub fn windows_for_group(
    mode: Mode,
    csvs: &[PathBuf],
    long_runs_only: bool,
    config: &Config,
) -> Result<GroupWindows> {
    let (windows, runs) = match mode {
        Mode::Hour => {
            let step = Duration::hours(1);
            let mut hours = BTreeSet::new();
            for csv in csvs {
                hours.extend(parse_presence_hours(csv)?);
            }
            let hours: Vec<_> = hours.into_iter().collect();

            let mut runs = group_consecutive(&hours, step);
            let hours = if long_runs_only {
                runs = keep_long_runs(runs, Duration::hours(config.min_run_hours));
                expand_runs(&runs, step)
            } else {
                hours
            };
            (windows_from_points(&hours, step), runs)
        }
        Mode::Day => {
            let mut days = BTreeSet::new();
            for csv in csvs {
                days.extend(parse_presence_days(csv)?);
            }
            let days: Vec<_> = days.into_iter().collect();
            (windows_from_points(&days, Duration::days(1)), Vec::new())
        }
        Mode::Event => {
            let fallback = seconds(config.event_fallback_secs);
            let mut events = BTreeSet::new();
            for csv in csvs {
                events.extend(parse_events(csv, fallback)?);
            }
            (events.into_iter().collect(), Vec::new())
        }
    };

    let range = match (windows.first(), windows.last()) {
        (Some(first), Some(last)) => TimeRange::new(first.start, last.end),
        _ => TimeRange::unbounded(),
    };

    Ok(GroupWindows {
        mode,
        windows,
        runs,
        range,
    })
}

/// Drives preview, download and clipping against one object store.
pub struct Pipeline<S> {
    store: S,
    config: Config,
}

impl<S: ObjectStore> Pipeline<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn products_dir(&self, site: &str, group: &str) -> PathBuf {
        self.config.dest_dir.join("products").join(site).join(group)
    }

    pub async fn product_groups(&self, site: &str, tag: &str) -> Result<Vec<ProductGroup>> {
        list_product_groups(&self.store, &self.config.products_prefix, site, tag).await
    }

    /// The group named `set` (case-insensitive), else the first group whose
    /// files mention it.
    pub async fn find_group(&self, site: &str, set: &str) -> Result<ProductGroup> {
        let groups = self.product_groups(site, set).await?;
        if let Some(group) = groups.iter().find(|g| g.name.eq_ignore_ascii_case(set)) {
            return Ok(group.clone());
        }
        groups.into_iter().next().ok_or_else(|| {
            SanctclipError::InvalidInput(format!("No product group matched set: {set}"))
        })
    }

    /// Download the preferred product files of a group and return the local CSVs.
    pub async fn fetch_products(&self, site: &str, group: &ProductGroup) -> Result<Vec<PathBuf>> {
        let dir = self.products_dir(site, &group.name);
        let mut csvs = Vec::new();
        for path in group.best_files() {
            let local = self.store.fetch(&path, &dir).await?;
            if extension(&local.to_string_lossy()).as_deref() == Some(".csv") {
                csvs.push(local);
            }
        }
        if csvs.is_empty() {
            return Err(SanctclipError::Detections(format!(
                "Preview expects at least one CSV artifact in {}",
                group.name
            )));
        }
        Ok(csvs)
    }

    /// Resolve which recordings a product group needs, without downloading audio.
    pub async fn preview_group(
        &self,
        site: &str,
        group: &ProductGroup,
        long_runs_only: bool,
    ) -> Result<PreviewResult> {
        let started = Instant::now();
        info!("Previewing {} ({})", group.name, group.mode);

        let csvs = self.fetch_products(site, group).await?;
        let derived = windows_for_group(group.mode, &csvs, long_runs_only, &self.config)?;
        if let (Some(tmin), Some(tmax)) = (derived.range.tmin, derived.range.tmax) {
            debug!("Listing audio for {} -> {}", iso(&tmin), iso(&tmax));
        }

        let preferred = folder_from_set(&group.name);
        let lister = AudioLister::from_config(&self.store, &self.config);
        let catalog = lister
            .list_audio_files_across(site, preferred.as_deref(), &derived.range)
            .await?;

        let (urls, names, rows, unresolved) = {
            let coverage = resolve_windows(&catalog, &derived.windows);
            (
                coverage.identifiers.clone(),
                coverage.names.clone(),
                coverage.mapping_rows(),
                coverage.unresolved_count(),
            )
        };
        if unresolved > 0 {
            warn!("{} of {} windows lack full coverage", unresolved, derived.windows.len());
        }

        info!(
            "Preview of {} done in {:.2}s",
            group.name,
            started.elapsed().as_secs_f64()
        );

        Ok(PreviewResult {
            site: site.to_string(),
            group: group.name.clone(),
            mode: derived.mode,
            windows: derived.windows,
            runs: derived.runs,
            catalog,
            urls,
            names,
            rows,
            unresolved,
        })
    }

    /// Fetch recordings into the destination directory, one at a time.
    pub async fn download_files(&self, urls: &[String]) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.config.dest_dir)?;
        debug!("Downloading {} files from {}", urls.len(), self.store.name());
        let mut local = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, urls.len(), basename(url));
            local.push(self.store.fetch(url, &self.config.dest_dir).await?);
        }
        info!("Downloaded {} files to {}", local.len(), self.config.dest_dir.display());
        Ok(local)
    }

    /// Cut clips for a group's windows from selected local recordings.
    pub async fn clip_group(
        &self,
        cutter: &ClipCutter,
        group: &str,
        mode: Mode,
        windows: &[Window],
        selected: &HashSet<String>,
    ) -> Result<ClipSummary> {
        cutter
            .clip_windows(&self.config.dest_dir, group, mode, windows, selected)
            .await
    }
}

/// Basenames of every `.flac` in `dir`.
pub fn local_flac_names(dir: &Path) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.to_lowercase().ends_with(".flac") && path.is_file() {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Non-empty trimmed lines of a list file, reduced to basenames.
pub fn read_name_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(SanctclipError::FileNotFound(path.display().to_string()));
    }
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| basename(l).to_string())
        .collect())
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(path, body)?;
    Ok(())
}

/// Dump what a preview selected into `dir`.
pub fn write_debug_artifacts(preview: &PreviewResult, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let urls = dir.join(SELECTED_URLS_FILE);
    write_lines(&urls, &preview.urls)?;

    let names = dir.join(SELECTED_NAMES_FILE);
    write_lines(&names, &preview.names)?;

    let candidates = dir.join(CANDIDATE_URLS_FILE);
    let listed: Vec<String> = preview.catalog.iter().map(|e| e.identifier.clone()).collect();
    write_lines(&candidates, &listed)?;

    let windows = dir.join(WINDOWS_FILE);
    let rows: Vec<String> = preview.rows.iter().map(|r| r.join("\t")).collect();
    write_lines(&windows, &rows)?;

    debug!("Wrote preview debug files to {}", dir.display());
    Ok(vec![urls, names, candidates, windows])
}

/// Set difference between an expected file list and a preview's selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedComparison {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl ExpectedComparison {
    pub fn compare(expected: &[String], selected: &[String]) -> Self {
        let expected: BTreeSet<&String> = expected.iter().collect();
        let selected: BTreeSet<&String> = selected.iter().collect();
        Self {
            missing: expected.difference(&selected).map(|s| s.to_string()).collect(),
            unexpected: selected.difference(&expected).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    pub fn report_lines(&self) -> [String; 2] {
        let join = |items: &[String]| {
            if items.is_empty() {
                "-".to_string()
            } else {
                items.join(",")
            }
        };
        [
            format!("MISSING_FROM_SELECTED={}", join(&self.missing)),
            format!("UNEXPECTED_IN_SELECTED={}", join(&self.unexpected)),
        ]
    }

    pub fn write_report(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(EXPECTED_REPORT_FILE);
        write_lines(&path, &self.report_lines())?;
        Ok(path)
    }
}

/// Print a preview in the same framed layout as the clip summary.
pub fn print_preview(preview: &PreviewResult) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("  {} | {} | mode: {}", preview.site, preview.group, preview.mode);
    println!("═══════════════════════════════════════════════════════════════");
    if !preview.runs.is_empty() {
        println!("  Runs ({}):", preview.runs.len());
        for (i, run) in preview.runs.iter().enumerate() {
            println!("    {:02}. {} -> {}", i + 1, iso(&run.start), iso(&run.end));
        }
    }
    println!("  Listed:     {} recordings", preview.catalog.len());
    if preview.unresolved > 0 {
        println!("  Gaps:       {} windows without full coverage", preview.unresolved);
    }
    println!("  {}", preview.summary_line());
    println!();
}

/// Print a summary of a clipping run.
pub fn print_summary(summary: &ClipSummary) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                        Clipping Complete                       ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Mode:       {}", summary.mode);
    println!("  Windows:    {}", summary.total_windows);
    println!("  Clips:      {}", summary.written());
    println!("  Skipped:    {}", summary.skipped);
    println!("  Output:     {}", summary.directory.display());
    println!("  Manifest:   {}", summary.manifest_path().display());
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
