pub mod cutter;
pub mod manifest;

pub use cutter::{clip_name, ClipCutter, SkipReason};
pub use manifest::{
    round_millis, write_manifest, ClipRecord, ClipSummary, MANIFEST_FILE, SUMMARY_FILE,
};
