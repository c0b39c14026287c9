//! Grouping fixed-cadence instants (hour or day starts) into contiguous runs.

use chrono::{DateTime, Duration, Utc};

/// A requested `[start, end)` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Merge sorted instants at cadence `step` into maximal `[start, end)` runs.
///
/// Any gap other than exactly `step` starts a new run.
pub fn group_consecutive(points: &[DateTime<Utc>], step: Duration) -> Vec<Window> {
    let Some((&first, rest)) = points.split_first() else {
        return Vec::new();
    };

    let mut runs = Vec::new();
    let mut start = first;
    let mut prev = first;

    for &p in rest {
        if p - prev == step {
            prev = p;
            continue;
        }
        runs.push(Window::new(start, prev + step));
        start = p;
        prev = p;
    }
    runs.push(Window::new(start, prev + step));

    runs
}

/// Expand runs back into their `step`-aligned instants.
pub fn expand_runs(runs: &[Window], step: Duration) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    for run in runs {
        let mut t = run.start;
        while t < run.end {
            out.push(t);
            t += step;
        }
    }
    out
}

pub fn hours_from_runs(runs: &[Window]) -> Vec<DateTime<Utc>> {
    expand_runs(runs, Duration::hours(1))
}

pub fn days_from_runs(runs: &[Window]) -> Vec<DateTime<Utc>> {
    expand_runs(runs, Duration::days(1))
}

/// Drop runs shorter than `min_span`.
pub fn keep_long_runs(runs: Vec<Window>, min_span: Duration) -> Vec<Window> {
    runs.into_iter()
        .filter(|r| r.duration() >= min_span)
        .collect()
}

/// One `[p, p + step)` window per instant.
pub fn windows_from_points(points: &[DateTime<Utc>], step: Duration) -> Vec<Window> {
    points.iter().map(|&p| Window::new(p, p + step)).collect()
}
