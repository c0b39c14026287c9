pub mod audio;
pub mod catalog;
pub mod clip;
pub mod config;
pub mod coverage;
pub mod detections;
pub mod error;
pub mod interactive;
pub mod listing;
pub mod metadata;
pub mod pipeline;
pub mod products;
pub mod runs;
pub mod sites;
pub mod store;
pub mod timeparse;

pub use catalog::{Catalog, CatalogBuilder, CatalogEntry, FileRecord, TimeRange};
pub use clip::{ClipCutter, ClipRecord, ClipSummary};
pub use config::{Config, Mode};
pub use coverage::{resolve_window, resolve_windows, Coverage, CoveragePick};
pub use error::{Result, SanctclipError};
pub use pipeline::{print_summary, Pipeline, PreviewResult};
pub use runs::Window;
