//! Ordered, in-memory snapshot of recordings and the time spans they cover.
//!
//! Recordings only carry a start time (parsed from their name). The end of
//! each span is inferred from the next recording of the same deployment, or
//! from the media duration / a fallback length for the last one.

use crate::config::Config;
use crate::timeparse::{basename, parse_audio_start_from_name};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// A listed recording before its end has been inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub identifier: String,
    pub display_name: String,
    pub start: DateTime<Utc>,
    pub group_key: Option<String>,
}

impl FileRecord {
    /// Build a record from a path or URL, or `None` when the name carries no timestamp.
    pub fn from_identifier(identifier: impl Into<String>, group_key: Option<String>) -> Option<Self> {
        let identifier = identifier.into();
        let display_name = basename(&identifier).to_string();
        let start = parse_audio_start_from_name(&display_name)?;
        Some(Self {
            identifier,
            display_name,
            start,
            group_key,
        })
    }
}

/// One physical recording and its inferred `[start, end)` coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub identifier: String,
    pub display_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub group_key: Option<String>,
}

impl CatalogEntry {
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && self.end >= end
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        match self.display_name.rfind('.') {
            Some(idx) if idx > 0 => &self.display_name[..idx],
            _ => &self.display_name,
        }
    }
}

/// Optional `[tmin, tmax]` filter applied while building a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub tmin: Option<DateTime<Utc>>,
    pub tmax: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(tmin: DateTime<Utc>, tmax: DateTime<Utc>) -> Self {
        Self {
            tmin: Some(tmin),
            tmax: Some(tmax),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Source of real media durations for the last recording of a run.
pub trait DurationProbe {
    fn probe_duration(&self, identifier: &str) -> Option<std::time::Duration>;
}

/// Probe for remote listings, where nothing can be measured.
pub struct NoProbe;

impl DurationProbe for NoProbe {
    fn probe_duration(&self, _identifier: &str) -> Option<std::time::Duration> {
        None
    }
}

/// Sorted, immutable catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Wrap already-inferred entries, sorting them by start.
    pub fn from_entries(mut entries: Vec<CatalogEntry>) -> Self {
        entries.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.group_key.cmp(&b.group_key)));
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Index of the last entry starting at or before `t`.
    pub fn index_at_or_before(&self, t: DateTime<Utc>) -> Option<usize> {
        self.entries
            .partition_point(|e| e.start <= t)
            .checked_sub(1)
    }
}

/// Builds catalogs from flat listings.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    fallback: Duration,
    left_tolerance: Duration,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self {
            fallback: Duration::hours(1),
            left_tolerance: Duration::hours(6),
        }
    }
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            fallback: config.fallback_file_duration(),
            left_tolerance: config.left_boundary_tolerance(),
        }
    }

    pub fn with_fallback(mut self, fallback: Duration) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_left_tolerance(mut self, tolerance: Duration) -> Self {
        self.left_tolerance = tolerance;
        self
    }

    /// Filter, sort and infer ends in one pass.
    pub fn build<I, P>(&self, records: I, range: &TimeRange, probe: &P) -> Catalog
    where
        I: IntoIterator<Item = FileRecord>,
        P: DurationProbe + ?Sized,
    {
        let retained = self.filter(records, range);
        self.infer_ends(retained, probe)
    }

    /// Apply the range filter and return the survivors sorted by `(start, group)`.
    ///
    /// Records before `tmin` are dropped except the closest one, which is kept
    /// when it starts no more than the left tolerance before `tmin`: it may
    /// still cover a window beginning exactly at `tmin`.
    pub fn filter<I>(&self, records: I, range: &TimeRange) -> Vec<FileRecord>
    where
        I: IntoIterator<Item = FileRecord>,
    {
        let mut kept = Vec::new();
        let mut left_candidate: Option<FileRecord> = None;

        for record in records {
            if let Some(tmin) = range.tmin {
                if record.start < tmin {
                    let closer = left_candidate
                        .as_ref()
                        .map_or(true, |c| record.start > c.start);
                    if closer {
                        left_candidate = Some(record);
                    }
                    continue;
                }
            }
            if let Some(tmax) = range.tmax {
                if record.start > tmax {
                    continue;
                }
            }
            kept.push(record);
        }

        if let (Some(candidate), Some(tmin)) = (left_candidate, range.tmin) {
            if tmin - candidate.start <= self.left_tolerance {
                debug!("Retaining left-boundary file {}", candidate.display_name);
                kept.push(candidate);
            }
        }

        kept.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.group_key.cmp(&b.group_key)));
        kept
    }

    /// Infer `end` for every record.
    ///
    /// The successor is the next record of the same group; its start is the
    /// end, floored at `start + 1s`. Without a successor the probed duration is
    /// used when longer than one second, else the fallback length.
    pub fn infer_ends<P>(&self, mut records: Vec<FileRecord>, probe: &P) -> Catalog
    where
        P: DurationProbe + ?Sized,
    {
        records.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.group_key.cmp(&b.group_key)));

        let mut next_start: HashMap<Option<String>, DateTime<Utc>> = HashMap::new();
        let mut entries = Vec::with_capacity(records.len());

        for record in records.into_iter().rev() {
            let end = match next_start.get(&record.group_key) {
                Some(&successor) if successor > record.start => successor,
                Some(_) => record.start + Duration::seconds(1),
                None => record.start + self.probed_or_fallback(&record, probe),
            };
            next_start.insert(record.group_key.clone(), record.start);
            entries.push(CatalogEntry {
                identifier: record.identifier,
                display_name: record.display_name,
                start: record.start,
                end,
                group_key: record.group_key,
            });
        }

        entries.reverse();
        Catalog { entries }
    }

    fn probed_or_fallback<P>(&self, record: &FileRecord, probe: &P) -> Duration
    where
        P: DurationProbe + ?Sized,
    {
        probe
            .probe_duration(&record.identifier)
            .filter(|d| d.as_secs_f64() > 1.0)
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or(self.fallback)
    }
}
