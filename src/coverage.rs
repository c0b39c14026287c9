//! Minimal file coverage for requested windows.
//!
//! Each window is served by the recording that starts at or before the
//! window start, plus its immediate successor when the window runs past that
//! recording's end. At most two recordings are ever assigned to one window.

use crate::catalog::{Catalog, CatalogEntry};
use crate::runs::Window;
use crate::timeparse::iso;
use chrono::Duration;
use std::collections::BTreeSet;

/// A time range local to one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Offset from the start of the recording.
    pub offset: Duration,
    pub duration: Duration,
}

impl Segment {
    pub fn offset_secs(&self) -> f64 {
        self.offset.num_milliseconds() as f64 / 1000.0
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.num_milliseconds() as f64 / 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.duration <= Duration::zero()
    }
}

/// Recordings assigned to one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoveragePick<'a> {
    /// No recording starts at or before the window.
    Unresolved,
    /// One recording contains the whole window.
    Single {
        entry: &'a CatalogEntry,
        segment: Segment,
    },
    /// The window straddles `first` and its successor `second`.
    Split {
        first: &'a CatalogEntry,
        second: &'a CatalogEntry,
        head: Segment,
        tail: Segment,
    },
    /// The window runs past the last recording and nothing follows it.
    Partial { entry: &'a CatalogEntry },
}

impl<'a> CoveragePick<'a> {
    /// Picked recordings in playback order.
    pub fn entries(&self) -> Vec<&'a CatalogEntry> {
        match *self {
            CoveragePick::Unresolved => Vec::new(),
            CoveragePick::Single { entry, .. } | CoveragePick::Partial { entry } => vec![entry],
            CoveragePick::Split { first, second, .. } => vec![first, second],
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CoveragePick::Single { .. } | CoveragePick::Split { .. })
    }
}

/// Resolve one window against a start-sorted catalog. `O(log n)`.
pub fn resolve_window<'a>(catalog: &'a Catalog, window: &Window) -> CoveragePick<'a> {
    let Some(i) = catalog.index_at_or_before(window.start) else {
        return CoveragePick::Unresolved;
    };
    let Some(first) = catalog.get(i) else {
        return CoveragePick::Unresolved;
    };

    if first.end >= window.end {
        return CoveragePick::Single {
            entry: first,
            segment: Segment {
                offset: window.start - first.start,
                duration: window.end - window.start,
            },
        };
    }

    match catalog.get(i + 1) {
        Some(second) => CoveragePick::Split {
            first,
            second,
            head: Segment {
                offset: window.start - first.start,
                duration: first.end - window.start,
            },
            tail: Segment {
                offset: Duration::zero(),
                duration: window.end - second.start,
            },
        },
        None => CoveragePick::Partial { entry: first },
    }
}

/// Picks for a batch of windows plus the union of recordings they need.
#[derive(Debug, Clone)]
pub struct Coverage<'a> {
    /// One pick per input window, in input order.
    pub picks: Vec<(Window, CoveragePick<'a>)>,
    /// Sorted, deduplicated identifiers of every picked recording.
    pub identifiers: Vec<String>,
    /// Sorted, deduplicated display names of every picked recording.
    pub names: Vec<String>,
}

impl<'a> Coverage<'a> {
    pub fn unresolved_count(&self) -> usize {
        self.picks
            .iter()
            .filter(|(_, pick)| !pick.is_complete())
            .count()
    }

    /// `start, end, names, identifiers` per window; multiple values joined by `;`.
    pub fn mapping_rows(&self) -> Vec<[String; 4]> {
        self.picks
            .iter()
            .map(|(window, pick)| {
                let entries = pick.entries();
                [
                    iso(&window.start),
                    iso(&window.end),
                    entries
                        .iter()
                        .map(|e| e.display_name.as_str())
                        .collect::<Vec<_>>()
                        .join(";"),
                    entries
                        .iter()
                        .map(|e| e.identifier.as_str())
                        .collect::<Vec<_>>()
                        .join(";"),
                ]
            })
            .collect()
    }
}

/// Resolve every window and accumulate the global file union.
pub fn resolve_windows<'a>(catalog: &'a Catalog, windows: &[Window]) -> Coverage<'a> {
    let mut identifiers = BTreeSet::new();
    let mut names = BTreeSet::new();
    let mut picks = Vec::with_capacity(windows.len());

    for window in windows {
        let pick = resolve_window(catalog, window);
        for entry in pick.entries() {
            identifiers.insert(entry.identifier.clone());
            names.insert(entry.display_name.clone());
        }
        picks.push((*window, pick));
    }

    Coverage {
        picks,
        identifiers: identifiers.into_iter().collect(),
        names: names.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn entry(name: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CatalogEntry {
        CatalogEntry {
            identifier: format!("gs://bucket/{name}"),
            display_name: name.to_string(),
            start,
            end,
            group_key: None,
        }
    }

    fn two_hour_catalog() -> Catalog {
        Catalog::from_entries(vec![
            entry("a.flac", t(0, 0), t(1, 0)),
            entry("b.flac", t(1, 0), t(2, 0)),
        ])
    }

    #[test]
    fn test_single_file_pick() {
        let catalog = two_hour_catalog();
        let pick = resolve_window(&catalog, &Window::new(t(0, 30), t(1, 0)));
        match pick {
            CoveragePick::Single { entry, segment } => {
                assert_eq!(entry.display_name, "a.flac");
                assert_eq!(segment.offset_secs(), 1800.0);
                assert_eq!(segment.duration_secs(), 1800.0);
            }
            other => panic!("expected single pick, got {other:?}"),
        }
    }

    #[test]
    fn test_split_pick_sums_to_window() {
        let catalog = two_hour_catalog();
        let window = Window::new(t(0, 45), t(1, 15));
        match resolve_window(&catalog, &window) {
            CoveragePick::Split {
                first,
                second,
                head,
                tail,
            } => {
                assert_eq!(first.display_name, "a.flac");
                assert_eq!(second.display_name, "b.flac");
                assert_eq!(head.offset_secs(), 2700.0);
                assert_eq!(head.duration_secs(), 900.0);
                assert_eq!(tail.offset_secs(), 0.0);
                assert_eq!(tail.duration_secs(), 900.0);
                assert_eq!(head.duration + tail.duration, window.duration());
            }
            other => panic!("expected split pick, got {other:?}"),
        }
    }

    #[test]
    fn test_window_before_catalog_is_unresolved() {
        let catalog = two_hour_catalog();
        let early = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        let pick = resolve_window(&catalog, &Window::new(early, early + Duration::hours(1)));
        assert_eq!(pick, CoveragePick::Unresolved);
        assert!(pick.entries().is_empty());
    }

    #[test]
    fn test_window_past_last_entry_is_partial() {
        let catalog = two_hour_catalog();
        let pick = resolve_window(&catalog, &Window::new(t(1, 30), t(2, 30)));
        assert!(matches!(pick, CoveragePick::Partial { entry } if entry.display_name == "b.flac"));
        assert!(!pick.is_complete());
    }

    #[test]
    fn test_never_picks_later_primary() {
        let catalog = Catalog::from_entries(vec![
            entry("a.flac", t(0, 0), t(0, 10)),
            entry("b.flac", t(0, 30), t(1, 30)),
        ]);
        let pick = resolve_window(&catalog, &Window::new(t(0, 20), t(0, 40)));
        assert_eq!(pick.entries()[0].display_name, "a.flac");
    }

    #[test]
    fn test_at_most_two_entries() {
        let catalog = Catalog::from_entries(vec![
            entry("a.flac", t(0, 0), t(1, 0)),
            entry("b.flac", t(1, 0), t(2, 0)),
            entry("c.flac", t(2, 0), t(3, 0)),
        ]);
        let pick = resolve_window(&catalog, &Window::new(t(0, 30), t(2, 30)));
        assert_eq!(pick.entries().len(), 2);
    }

    #[test]
    fn test_union_is_sorted_and_deduplicated() {
        let catalog = two_hour_catalog();
        let windows = vec![
            Window::new(t(1, 0), t(2, 0)),
            Window::new(t(0, 0), t(1, 0)),
            Window::new(t(0, 30), t(1, 30)),
            Window::new(t(0, 10), t(0, 20)),
        ];
        let coverage = resolve_windows(&catalog, &windows);
        assert_eq!(coverage.picks.len(), 4);
        assert_eq!(coverage.picks[0].0, windows[0]);
        assert_eq!(coverage.names, vec!["a.flac", "b.flac"]);
        assert_eq!(
            coverage.identifiers,
            vec!["gs://bucket/a.flac", "gs://bucket/b.flac"]
        );
        assert_eq!(coverage.unresolved_count(), 0);
    }

    #[test]
    fn test_mapping_rows() {
        let catalog = two_hour_catalog();
        let coverage = resolve_windows(&catalog, &[Window::new(t(0, 45), t(1, 15))]);
        let rows = coverage.mapping_rows();
        assert_eq!(rows[0][0], "2024-01-01T00:45:00Z");
        assert_eq!(rows[0][2], "a.flac;b.flac");
    }
}
