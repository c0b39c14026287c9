//! Presence and event tables published as detection products.
//!
//! Column layouts differ between product sets, so columns are sniffed: the
//! timestamp column is the first one whose cells read as UTC datetimes, and
//! the presence column the first other one holding only 0/1 flags.

use crate::error::{Result, SanctclipError};
use crate::runs::Window;
use chrono::{DateTime, Duration, DurationRound, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const NAIVE_DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

const DURATION_HINTS: [&str; 3] = ["duration", "dur", "length"];

/// How many cells of a column must parse before it counts as a datetime column.
#[derive(Debug, Clone, Copy)]
struct Threshold {
    min_rows: usize,
    fraction: f64,
}

impl Threshold {
    const HOURS: Threshold = Threshold { min_rows: 10, fraction: 0.10 };
    const DAYS: Threshold = Threshold { min_rows: 5, fraction: 0.05 };

    fn required(&self, rows: usize) -> usize {
        self.min_rows.max((self.fraction * rows as f64) as usize)
    }
}

/// Parse a single cell as a UTC instant.
pub fn parse_datetime(cell: &str) -> Option<DateTime<Utc>> {
    let text = cell.trim();
    if text.is_empty() || text.parse::<f64>().is_ok() {
        return None;
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(t.with_timezone(&Utc));
    }

    let naive = text.strip_suffix('Z').unwrap_or(text);
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(naive, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|n| n.and_utc())
}

fn parse_flag(cell: &str) -> Option<i64> {
    let value = cell.trim().parse::<f64>().ok()?;
    value.is_finite().then(|| value.round() as i64)
}

/// A detection CSV held column-wise.
#[derive(Debug, Clone)]
pub struct DetectionTable {
    name: String,
    headers: Vec<String>,
    columns: Vec<Vec<String>>,
    rows: usize,
}

impl DetectionTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SanctclipError::FileNotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_reader(file, name)
    }

    pub fn from_reader<R: Read>(reader: R, name: impl Into<String>) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut columns = vec![Vec::new(); headers.len()];
        let mut rows = 0;

        for record in rdr.records() {
            let record = record?;
            for (i, column) in columns.iter_mut().enumerate() {
                column.push(record.get(i).unwrap_or("").to_string());
            }
            rows += 1;
        }

        Ok(Self {
            name: name.into(),
            headers,
            columns,
            rows,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Indices of datetime columns: every non-empty cell parses and enough do.
    fn datetime_columns(&self, threshold: Threshold) -> Vec<usize> {
        let required = threshold.required(self.rows);
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, cells)| {
                let mut parsed = 0;
                for cell in cells.iter().filter(|c| !c.is_empty()) {
                    if parse_datetime(cell).is_none() {
                        return false;
                    }
                    parsed += 1;
                }
                parsed >= required
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// First column other than `skip` whose numeric cells are all 0/1 with at least one 1.
    fn presence_column(&self, skip: usize) -> Option<usize> {
        (0..self.columns.len()).filter(|&i| i != skip).find(|&i| {
            let flags: Vec<i64> = self.columns[i].iter().filter_map(|c| parse_flag(c)).collect();
            !flags.is_empty() && flags.iter().all(|f| *f == 0 || *f == 1) && flags.contains(&1)
        })
    }

    /// Instants flagged present, floored to `unit` and deduplicated.
    fn flagged(&self, threshold: Threshold, unit: Duration, what: &str) -> Result<Vec<DateTime<Utc>>> {
        let time_col = self.datetime_columns(threshold).first().copied().ok_or_else(|| {
            SanctclipError::Detections(format!("Could not detect {what} column in {}", self.name))
        })?;
        let flag_col = self.presence_column(time_col).ok_or_else(|| {
            SanctclipError::Detections(format!(
                "Could not detect presence (0/1) column in {}",
                self.name
            ))
        })?;
        debug!(
            "{}: time column '{}', presence column '{}'",
            self.name, self.headers[time_col], self.headers[flag_col]
        );

        let mut out = BTreeSet::new();
        for (time, flag) in self.columns[time_col].iter().zip(&self.columns[flag_col]) {
            let (Some(t), Some(1)) = (parse_datetime(time), parse_flag(flag)) else {
                continue;
            };
            if let Ok(floored) = t.duration_trunc(unit) {
                out.insert(floored);
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Hour starts with presence, sorted.
    pub fn presence_hours(&self) -> Result<Vec<DateTime<Utc>>> {
        self.flagged(Threshold::HOURS, Duration::hours(1), "hour")
    }

    /// Day starts (UTC midnight) with presence, sorted.
    pub fn presence_days(&self) -> Result<Vec<DateTime<Utc>>> {
        self.flagged(Threshold::DAYS, Duration::days(1), "date/datetime")
    }

    /// Explicit event spans sorted by start.
    ///
    /// The end comes from a later datetime column named like `end`, else a
    /// duration column in seconds, else `fallback`. Non-positive spans also
    /// get `fallback`.
    pub fn events(&self, fallback: Duration) -> Result<Vec<Window>> {
        let dt_cols = self.datetime_columns(Threshold::DAYS);
        let Some((&start_col, later)) = dt_cols.split_first() else {
            return Err(SanctclipError::Detections(format!(
                "No usable datetime column in {}",
                self.name
            )));
        };
        let end_col = later
            .iter()
            .copied()
            .find(|&i| self.headers[i].to_lowercase().contains("end"));
        let dur_col = self.headers.iter().position(|h| {
            let h = h.to_lowercase();
            DURATION_HINTS.iter().any(|k| h.contains(k))
        });

        let starts = &self.columns[start_col];
        let mut events = BTreeSet::new();

        if let Some(end_col) = end_col {
            for (s, e) in starts.iter().zip(&self.columns[end_col]) {
                let (Some(start), Some(end)) = (parse_datetime(s), parse_datetime(e)) else {
                    continue;
                };
                let end = if end <= start { start + fallback } else { end };
                events.insert(Window::new(start, end));
            }
        } else {
            for (row, s) in starts.iter().enumerate() {
                let Some(start) = parse_datetime(s) else {
                    continue;
                };
                let span = dur_col
                    .and_then(|c| self.columns[c].get(row))
                    .and_then(|cell| cell.trim().parse::<f64>().ok())
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .map(seconds)
                    .unwrap_or(fallback);
                events.insert(Window::new(start, start + span));
            }
        }

        Ok(events.into_iter().collect())
    }
}

/// Fractional seconds as a millisecond-precision duration.
pub fn seconds(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}

pub fn parse_presence_hours(path: &Path) -> Result<Vec<DateTime<Utc>>> {
    DetectionTable::from_path(path)?.presence_hours()
}

pub fn parse_presence_days(path: &Path) -> Result<Vec<DateTime<Utc>>> {
    DetectionTable::from_path(path)?.presence_days()
}

pub fn parse_events(path: &Path, fallback: Duration) -> Result<Vec<Window>> {
    DetectionTable::from_path(path)?.events(fallback)
}
