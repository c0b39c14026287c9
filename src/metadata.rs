//! Deployment metadata index.
//!
//! Product groups may carry `metadata/*.json` documents next to their
//! `data/*.csv` detections. A few of those per group are read, the commonly
//! used fields (position, depth, recording span, sample rate, hardware) are
//! folded into one entry per deployment, and the result is cached on disk as
//! JSON so site pickers do not need the bucket.

use crate::config::Config;
use crate::error::{Result, SanctclipError};
use crate::sites::SiteDirectory;
use crate::store::ObjectStore;
use crate::timeparse::basename;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

pub const INDEX_FILE: &str = "metadata_index.json";

/// Metadata documents read per product group unless configured otherwise.
pub const DEFAULT_MAX_JSON_PER_GROUP: usize = 3;

const UNKNOWN_DEPLOYMENT: &str = "??";

// Accepted keys per field, tried in order.
const SITE_KEYS: &[&str] = &["site", "site_code", "station_code", "location_id"];
const DEPLOYMENT_KEYS: &[&str] = &[
    "deployment",
    "deployment_id",
    "mooring",
    "station",
    "station_id",
    "recorder_id",
];
const LOCATION_KEYS: &[&str] = &[
    "location",
    "station_name",
    "site_name",
    "region",
    "subregion",
    "deployment_zone",
];
const LAT_KEYS: &[&str] = &["lat", "latitude", "Latitude", "LAT"];
const LON_KEYS: &[&str] = &["lon", "longitude", "Longitude", "LON"];
const DEPTH_KEYS: &[&str] = &["depth", "Depth", "depth_m", "water_depth_m", "bottom_depth_m"];
const START_KEYS: &[&str] = &[
    "start",
    "start_time",
    "StartTime",
    "recording_start_utc",
    "deployment_start_utc",
    "utc_start",
];
const END_KEYS: &[&str] = &[
    "end",
    "end_time",
    "EndTime",
    "recording_end_utc",
    "deployment_end_utc",
    "utc_end",
];
const SAMPLE_RATE_KEYS: &[&str] = &["sample_rate", "fs", "sample_rate_hz", "Fs", "sampling_rate_hz"];
const PLATFORM_KEYS: &[&str] = &[
    "platform",
    "moorings",
    "platform_name",
    "platform_id",
    "platform_type",
];
const RECORDER_KEYS: &[&str] = &[
    "recorder",
    "instrument",
    "device",
    "recorder_model",
    "hydrophone_model",
];

fn site_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[a-z]{2}\d{2}$").expect("valid regex"))
}

fn group_deployment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)sanctsound_[a-z]{2}\d{2}_(\d{2})").expect("valid regex"))
}

fn two_digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{2}").expect("valid regex"))
}

/// Fields recognised in one metadata document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFields {
    pub site: Option<String>,
    /// Two-digit deployment number when one can be found.
    pub deployment: Option<String>,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub depth_m: Option<f64>,
    pub start_utc: Option<String>,
    pub end_utc: Option<String>,
    pub sample_rate_hz: Option<f64>,
    pub platform: Option<String>,
    pub recorder: Option<String>,
}

/// First alias present at the top level, else in a directly nested object.
fn pick<'a>(doc: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    if let Some(v) = keys.iter().find_map(|k| doc.get(*k)) {
        return Some(v);
    }
    doc.values()
        .filter_map(Value::as_object)
        .find_map(|nested| keys.iter().find_map(|k| nested.get(*k)))
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        other => Some(other.to_string()),
    }
}

fn as_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pull the known fields out of a metadata document. Non-objects yield nothing.
pub fn extract_fields(doc: &Value) -> MetadataFields {
    let Some(doc) = doc.as_object() else {
        return MetadataFields::default();
    };

    let deployment = as_text(pick(doc, DEPLOYMENT_KEYS)).map(|dep| {
        two_digits_re()
            .find(&dep)
            .map(|m| m.as_str().to_string())
            .unwrap_or(dep)
    });

    MetadataFields {
        site: as_text(pick(doc, SITE_KEYS)).map(|s| s.to_lowercase()),
        deployment,
        location: as_text(pick(doc, LOCATION_KEYS)),
        lat: as_float(pick(doc, LAT_KEYS)),
        lon: as_float(pick(doc, LON_KEYS)),
        depth_m: as_float(pick(doc, DEPTH_KEYS)),
        start_utc: as_text(pick(doc, START_KEYS)),
        end_utc: as_text(pick(doc, END_KEYS)),
        sample_rate_hz: as_float(pick(doc, SAMPLE_RATE_KEYS)),
        platform: as_text(pick(doc, PLATFORM_KEYS)),
        recorder: as_text(pick(doc, RECORDER_KEYS)),
    }
}

/// Two-digit deployment number named by a product group, e.g. `01`.
pub fn deployment_from_group(group: &str) -> Option<String> {
    group_deployment_re()
        .captures(group)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Merged description of one deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub label: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub depth_m: Option<f64>,
    pub start_utc: Option<String>,
    pub end_utc: Option<String>,
    pub sample_rate_hz: Option<f64>,
    pub platform: Option<String>,
    pub recorder: Option<String>,
    /// Documents the fields came from.
    pub json_urls: Vec<String>,
}

impl DeploymentInfo {
    /// Fold in one document. Values already known are kept.
    pub fn absorb(&mut self, site: &str, deployment: &str, fields: MetadataFields, url: &str) {
        fill(&mut self.lat, fields.lat);
        fill(&mut self.lon, fields.lon);
        fill(&mut self.depth_m, fields.depth_m);
        fill(&mut self.start_utc, fields.start_utc);
        fill(&mut self.end_utc, fields.end_utc);
        fill(&mut self.sample_rate_hz, fields.sample_rate_hz);
        fill(&mut self.platform, fields.platform);
        fill(&mut self.recorder, fields.recorder);
        if self.label.is_none() {
            self.label = Some(
                fields
                    .location
                    .unwrap_or_else(|| format!("{} — {}", site.to_uppercase(), deployment)),
            );
        }
        self.json_urls.push(url.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub label: String,
    /// Keyed by two-digit deployment number (`??` when the group names none).
    pub deployments: BTreeMap<String, DeploymentInfo>,
}

/// Per-site deployment metadata, keyed by lowercase site code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub by_site: BTreeMap<String, SiteEntry>,
}

impl MetadataIndex {
    pub fn sites(&self) -> Vec<&str> {
        self.by_site.keys().map(String::as_str).collect()
    }

    pub fn site(&self, code: &str) -> Option<&SiteEntry> {
        self.by_site.get(&code.trim().to_lowercase())
    }

    /// Site directory over the indexed codes.
    pub fn site_directory(&self) -> SiteDirectory {
        SiteDirectory::new(self.by_site.keys().cloned())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Saved metadata index to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SanctclipError::FileNotFound(path.display().to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Where the index is cached for a configuration.
pub fn index_path(config: &Config) -> PathBuf {
    config.dest_dir.join(INDEX_FILE)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub sites: usize,
    pub groups: usize,
    pub deployments: usize,
    pub json_scanned: usize,
    pub csv_listed: usize,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sites={} groups={} deployments={} json_scanned={} csv_listed={}",
            self.sites, self.groups, self.deployments, self.json_scanned, self.csv_listed
        )
    }
}

/// Metadata documents and CSV counts per product group of one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteObjects {
    pub metadata: BTreeMap<String, Vec<String>>,
    pub csv_counts: BTreeMap<String, usize>,
}

impl SiteObjects {
    pub fn groups(&self) -> BTreeSet<&str> {
        self.metadata
            .keys()
            .chain(self.csv_counts.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Builds a [`MetadataIndex`] from the products tree of an object store.
pub struct MetadataIndexer<'a, S: ?Sized> {
    store: &'a S,
    products_prefix: String,
    max_json_per_group: Option<usize>,
    max_json_total: Option<usize>,
}

impl<'a, S: ObjectStore + ?Sized> MetadataIndexer<'a, S> {
    pub fn new(store: &'a S, products_prefix: impl Into<String>) -> Self {
        Self {
            store,
            products_prefix: products_prefix.into().trim_end_matches('/').to_string(),
            max_json_per_group: Some(DEFAULT_MAX_JSON_PER_GROUP),
            max_json_total: None,
        }
    }

    pub fn from_config(store: &'a S, config: &Config) -> Self {
        Self::new(store, config.products_prefix.clone())
    }

    /// `None` reads every document of a group.
    pub fn with_max_json_per_group(mut self, max: Option<usize>) -> Self {
        self.max_json_per_group = max;
        self
    }

    /// Stop reading documents once this many have been indexed.
    pub fn with_max_json_total(mut self, max: Option<usize>) -> Self {
        self.max_json_total = max;
        self
    }

    /// Site codes under the products prefix, sorted.
    ///
    /// Falls back to a recursive listing when the store reports no folders.
    pub async fn discover_sites(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.products_prefix);
        let mut sites: BTreeSet<String> = self
            .store
            .list_prefixes(&prefix)
            .await?
            .iter()
            .map(|p| basename(p).to_lowercase())
            .filter(|code| site_code_re().is_match(code))
            .collect();

        if sites.is_empty() {
            debug!("No site folders under {}, scanning objects", prefix);
            for object in self.store.list(&prefix).await? {
                let code = object
                    .name
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.split_once('/'))
                    .map(|(code, _)| code.to_lowercase());
                if let Some(code) = code.filter(|c| site_code_re().is_match(c)) {
                    sites.insert(code);
                }
            }
        }

        info!("Found {} sites with products", sites.len());
        Ok(sites.into_iter().collect())
    }

    /// One recursive listing of a site's products.
    pub async fn scan_site(&self, site: &str) -> Result<SiteObjects> {
        let site_prefix = format!("{}/{}/", self.products_prefix, site);
        let mut scanned = SiteObjects::default();

        for object in self.store.list(&site_prefix).await? {
            let Some((group, tail)) = object
                .name
                .strip_prefix(&site_prefix)
                .and_then(|rest| rest.split_once('/'))
            else {
                continue;
            };
            let tail = format!("/{}", tail.to_lowercase());
            if tail.contains("/metadata/") && tail.ends_with(".json") {
                scanned
                    .metadata
                    .entry(group.to_string())
                    .or_default()
                    .push(object.url);
            } else if tail.contains("/data/") && tail.ends_with(".csv") {
                *scanned.csv_counts.entry(group.to_string()).or_insert(0) += 1;
            }
        }

        for urls in scanned.metadata.values_mut() {
            urls.sort();
        }
        debug!(
            "{}: {} groups ({} with metadata, {} csv files)",
            site,
            scanned.groups().len(),
            scanned.metadata.len(),
            scanned.csv_counts.values().sum::<usize>()
        );
        Ok(scanned)
    }

    /// Read and parse one metadata document.
    pub async fn read_fields(&self, url: &str) -> Result<MetadataFields> {
        let bytes = self.store.read(url).await?;
        let doc: Value = serde_json::from_slice(&bytes)?;
        Ok(extract_fields(&doc))
    }

    /// Every metadata document of one product group, with its fields.
    ///
    /// Documents that cannot be read or parsed are left out.
    pub async fn group_metadata(&self, site: &str, group: &str) -> Result<Vec<(String, MetadataFields)>> {
        let prefix = format!("{}/{}/{}/metadata/", self.products_prefix, site, group);
        let mut urls: Vec<String> = self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter(|o| o.name.to_lowercase().ends_with(".json"))
            .map(|o| o.url)
            .collect();
        urls.sort();

        let mut out = Vec::with_capacity(urls.len());
        for url in urls {
            match self.read_fields(&url).await {
                Ok(fields) => out.push((url, fields)),
                Err(e) => warn!("Skipping {}: {}", url, e),
            }
        }
        Ok(out)
    }

    /// Index `sites`, or every discovered site when empty.
    ///
    /// Listing failures abort the build; unreadable documents are skipped.
    pub async fn build(&self, sites: &[String]) -> Result<(MetadataIndex, IndexStats)> {
        let sites: Vec<String> = if sites.is_empty() {
            self.discover_sites().await?
        } else {
            let unique: BTreeSet<String> = sites.iter().map(|s| s.trim().to_lowercase()).collect();
            unique.into_iter().collect()
        };

        let directory = SiteDirectory::default();
        let mut index = MetadataIndex::default();
        let mut stats = IndexStats::default();

        for site in &sites {
            info!("Indexing metadata for {}", site);
            let scanned = self.scan_site(site).await?;
            let groups = scanned.groups();
            stats.sites += 1;
            stats.groups += groups.len();

            let mut entry = SiteEntry {
                label: directory.label_for_code(site),
                deployments: BTreeMap::new(),
            };

            for group in groups {
                let deployment =
                    deployment_from_group(group).unwrap_or_else(|| UNKNOWN_DEPLOYMENT.to_string());
                let slot = entry.deployments.entry(deployment.clone()).or_default();

                let urls = scanned.metadata.get(group).map(Vec::as_slice).unwrap_or_default();
                let limit = self.max_json_per_group.unwrap_or(urls.len());
                for url in urls.iter().take(limit) {
                    if self.max_json_total.is_some_and(|max| stats.json_scanned >= max) {
                        break;
                    }
                    match self.read_fields(url).await {
                        Ok(fields) => {
                            slot.absorb(site, &deployment, fields, url);
                            stats.json_scanned += 1;
                        }
                        Err(e) => warn!("Skipping {}: {}", url, e),
                    }
                }

                stats.csv_listed += scanned.csv_counts.get(group).copied().unwrap_or(0);
            }

            stats.deployments += entry.deployments.len();
            index.by_site.insert(site.clone(), entry);
        }

        info!("Metadata index: {}", stats);
        Ok((index, stats))
    }
}
