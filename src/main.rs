use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sanctclip::audio::FfmpegTool;
use sanctclip::catalog::TimeRange;
use sanctclip::clip::ClipCutter;
use sanctclip::interactive;
use sanctclip::listing::AudioLister;
use sanctclip::metadata::{index_path, MetadataIndex, MetadataIndexer};
use sanctclip::pipeline::{
    local_flac_names, print_preview, print_summary, read_name_list, windows_for_group,
    write_debug_artifacts, ExpectedComparison, Pipeline,
};
use sanctclip::products::ProductGroup;
use sanctclip::sites::SiteDirectory;
use sanctclip::store::GcsStore;
use sanctclip::timeparse::parse_iso_utc;
use sanctclip::Config;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sanctclip")]
#[command(version, about = "Clip archival passive-acoustic recordings around detections")]
#[command(long_about = "Resolve which recordings cover the hours, days or events of a detection \
product set, download only those, and cut one normalised WAV clip per window.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Destination directory for downloads and clips
    #[arg(long, global = true)]
    dest: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List one deployment folder and dump the retained recording URLs
    ListAudio {
        #[arg(long)]
        site: String,
        #[arg(long)]
        folder: String,
        /// Range start, YYYY-MM-DDTHH:MM:SSZ
        #[arg(long)]
        tmin: Option<String>,
        /// Range end, YYYY-MM-DDTHH:MM:SSZ
        #[arg(long)]
        tmax: Option<String>,
        /// File to write URLs to, one per line
        #[arg(long)]
        dump: PathBuf,
    },

    /// Resolve the recordings a product set needs
    Preview {
        #[arg(long)]
        site: Option<String>,
        /// Product set name, e.g. sanctsound_ci01_01_bluewhale_1h
        #[arg(long)]
        set: Option<String>,
        /// Keep only presence runs of at least the configured length (HOUR sets)
        #[arg(long)]
        long_runs: bool,
        /// Directory for debug listings
        #[arg(long)]
        dump_debug: Option<PathBuf>,
        /// Download the selected recordings
        #[arg(long)]
        download: bool,
        /// Pick site, set and recordings interactively
        #[arg(short, long)]
        interactive: bool,
    },

    /// Cut clips for a product set from downloaded recordings
    Clip {
        #[arg(long)]
        site: Option<String>,
        #[arg(long)]
        set: Option<String>,
        /// File listing the recordings that may be used, one per line
        #[arg(long)]
        select: Option<PathBuf>,
        #[arg(long)]
        long_runs: bool,
        #[arg(short, long)]
        interactive: bool,
    },

    /// Compare a preview's selection with an expected list (exit code 2 on mismatch)
    VerifyExpected {
        #[arg(long)]
        site: String,
        #[arg(long)]
        set: String,
        /// Expected file names, one per line
        #[arg(long)]
        expect: PathBuf,
        #[arg(long)]
        dump_debug: PathBuf,
    },

    /// Print known site labels (from the metadata index when one is cached)
    Sites,

    /// Read deployment metadata documents and cache a per-site index
    BuildIndex {
        /// Sites to index; every site with products when omitted
        #[arg(long = "site")]
        sites: Vec<String>,
        /// Metadata documents read per product group
        #[arg(long, default_value_t = sanctclip::metadata::DEFAULT_MAX_JSON_PER_GROUP)]
        max_json: usize,
        /// Stop after this many documents overall
        #[arg(long)]
        max_total: Option<usize>,
        /// Index file, defaults to metadata_index.json under --dest
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the metadata documents of one product set
    Metadata {
        #[arg(long)]
        site: String,
        #[arg(long)]
        set: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn resolve_site(site: Option<String>, interactive: bool, sites: &SiteDirectory) -> Result<String> {
    let site = match site {
        Some(s) => s.trim().to_lowercase(),
        None if interactive => interactive::select_site(sites)?,
        None => anyhow::bail!("--site is required (or use --interactive)"),
    };
    if !sites.contains(&site) {
        warn!("{} is not a known site code", site);
    }
    Ok(site)
}

async fn resolve_group(
    pipeline: &Pipeline<GcsStore>,
    site: &str,
    set: Option<String>,
    interactive: bool,
) -> Result<ProductGroup> {
    match set {
        Some(set) => pipeline
            .find_group(site, &set)
            .await
            .with_context(|| format!("Failed to find product set {set}")),
        None if interactive => {
            let groups = pipeline
                .product_groups(site, "")
                .await
                .context("Failed to list product groups")?;
            interactive::select_group(&groups)
        }
        None => anyhow::bail!("--set is required (or use --interactive)"),
    }
}

fn parse_bound(raw: Option<&str>, flag: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.map(|text| {
        parse_iso_utc(text)
            .with_context(|| format!("Invalid --{flag} (expected YYYY-MM-DDTHH:MM:SSZ): {text}"))
    })
    .transpose()
}

/// Sites from the cached metadata index, else the built-in list.
fn load_site_directory(config: &Config) -> SiteDirectory {
    let path = index_path(config);
    if !path.exists() {
        return SiteDirectory::default();
    }
    match MetadataIndex::load(&path) {
        Ok(index) if !index.by_site.is_empty() => index.site_directory(),
        Ok(_) => SiteDirectory::default(),
        Err(e) => {
            warn!("Ignoring metadata index {}: {}", path.display(), e);
            SiteDirectory::default()
        }
    }
}

fn print_fields(fields: &sanctclip::metadata::MetadataFields) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(fields)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(dest) = cli.dest.clone() {
        config.dest_dir = dest;
    }
    if let Command::VerifyExpected { dump_debug, .. } = &cli.command {
        if cli.dest.is_none() {
            config.dest_dir = dump_debug.clone();
        }
    }
    config.validate().context("Configuration validation failed")?;

    let show_progress = console::user_attended();
    let store = GcsStore::new(config.bucket.clone()).with_progress(show_progress);
    let pipeline = Pipeline::new(store, config);
    let sites = load_site_directory(pipeline.config());

    match cli.command {
        Command::Sites => {
            for label in sites.labels() {
                println!("{label}");
            }
        }

        Command::BuildIndex {
            sites: wanted,
            max_json,
            max_total,
            out,
        } => {
            let (index, stats) = MetadataIndexer::from_config(pipeline.store(), pipeline.config())
                .with_max_json_per_group(Some(max_json))
                .with_max_json_total(max_total)
                .build(&wanted)
                .await
                .context("Failed to build metadata index")?;

            let path = out.unwrap_or_else(|| index_path(pipeline.config()));
            index
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{stats}");
            println!("Index written to {}", path.display());
        }

        Command::Metadata { site, set } => {
            let site = site.trim().to_lowercase();
            let indexer = MetadataIndexer::from_config(pipeline.store(), pipeline.config());
            let docs = indexer
                .group_metadata(&site, &set)
                .await
                .context("Failed to read metadata")?;
            if docs.is_empty() {
                println!("No metadata documents for {site}/{set}");
            }
            for (url, fields) in &docs {
                println!("{url}");
                print_fields(fields)?;
            }
        }

        Command::ListAudio {
            site,
            folder,
            tmin,
            tmax,
            dump,
        } => {
            let range = TimeRange {
                tmin: parse_bound(tmin.as_deref(), "tmin")?,
                tmax: parse_bound(tmax.as_deref(), "tmax")?,
            };
            let lister = AudioLister::from_config(pipeline.store(), pipeline.config());
            let catalog = lister
                .list_audio_files_in_folder(&site, &folder, &range)
                .await
                .context("Audio listing failed")?;

            if let Some(parent) = dump.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let urls: Vec<&str> = catalog.iter().map(|e| e.identifier.as_str()).collect();
            let mut body = urls.join("\n");
            body.push('\n');
            std::fs::write(&dump, body)
                .with_context(|| format!("Failed to write {}", dump.display()))?;
            println!("Listed URLs: {}", urls.len());
        }

        Command::Preview {
            site,
            set,
            long_runs,
            dump_debug,
            download,
            interactive,
        } => {
            if interactive {
                interactive::print_header();
            }
            let site = resolve_site(site, interactive, &sites)?;
            let group = resolve_group(&pipeline, &site, set, interactive).await?;

            let preview = pipeline
                .preview_group(&site, &group, long_runs)
                .await
                .context("Preview failed")?;
            print_preview(&preview);

            if let Some(dir) = dump_debug {
                write_debug_artifacts(&preview, &dir).context("Failed to write debug files")?;
                info!("Debug files written to {}", dir.display());
            }

            if download || interactive {
                let dest = &pipeline.config().dest_dir;
                let chosen: Vec<String> = if interactive {
                    let names = interactive::select_recordings(&preview.names, dest)?;
                    preview
                        .files()
                        .into_iter()
                        .filter(|e| names.contains(&e.display_name))
                        .map(|e| e.identifier.clone())
                        .collect()
                } else {
                    preview.urls.clone()
                };

                if !interactive || interactive::confirm_download(chosen.len(), dest)? {
                    pipeline
                        .download_files(&chosen)
                        .await
                        .context("Download failed")?;
                }
            }
        }

        Command::Clip {
            site,
            set,
            select,
            long_runs,
            interactive,
        } => {
            let site = resolve_site(site, interactive, &sites)?;
            let group = resolve_group(&pipeline, &site, set, interactive).await?;
            let config = pipeline.config();

            let csvs = pipeline
                .fetch_products(&site, &group)
                .await
                .context("Failed to fetch detection products")?;
            let derived = windows_for_group(group.mode, &csvs, long_runs, config)?;

            let local = local_flac_names(&config.dest_dir)?;
            let selected: HashSet<String> = match select {
                Some(path) => read_name_list(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?
                    .into_iter()
                    .collect(),
                None if interactive => {
                    let mut names: Vec<String> = local.into_iter().collect();
                    names.sort();
                    interactive::select_recordings(&names, &config.dest_dir)?
                }
                None => local,
            };
            if selected.is_empty() {
                warn!("No recordings selected; every window will be skipped");
            }

            let media = FfmpegTool::checked().context(
                "FFmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)",
            )?;
            let cutter = ClipCutter::from_config(Box::new(media), config).with_progress(show_progress);

            let summary = pipeline
                .clip_group(&cutter, &group.name, derived.mode, &derived.windows, &selected)
                .await
                .context("Clipping failed")?;
            print_summary(&summary);
        }

        Command::VerifyExpected {
            site,
            set,
            expect,
            dump_debug,
        } => {
            let expected = read_name_list(&expect)
                .with_context(|| format!("Expected file not found: {}", expect.display()))?;

            let group = pipeline
                .find_group(&site, &set)
                .await
                .with_context(|| format!("Failed to find product set {set}"))?;
            let preview = pipeline
                .preview_group(&site, &group, false)
                .await
                .context("Preview failed")?;
            write_debug_artifacts(&preview, &dump_debug)?;

            let comparison = ExpectedComparison::compare(&expected, &preview.names);
            comparison.write_report(&dump_debug)?;

            if comparison.is_match() {
                println!("Verification passed");
            } else {
                println!("Verification FAILED");
                for line in comparison.report_lines() {
                    println!("  {line}");
                }
                return Ok(ExitCode::from(2));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
