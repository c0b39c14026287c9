pub mod gcs;

pub use gcs::GcsStore;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object name inside the bucket, e.g. `sanctsound/audio/ci01/.../x.flac`.
    pub name: String,
    /// `gs://bucket/name`
    pub url: String,
    pub size: Option<u64>,
}

/// Read-only access to a bucket of recordings and detection products.
///
/// Paths may be object names or full `gs://bucket/name` URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object under `prefix`, recursively.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    /// Immediate sub-prefixes of `prefix`, each ending in `/`.
    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Download into `dest_dir` under the object's basename. A local file of
    /// the same size is left untouched.
    async fn fetch(&self, path: &str, dest_dir: &Path) -> Result<PathBuf>;

    fn name(&self) -> &'static str;
}

/// Split `gs://bucket/object` into its parts.
pub fn parse_gs_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.trim().strip_prefix("gs://")?;
    let (bucket, object) = rest.split_once('/')?;
    if bucket.is_empty() || object.is_empty() {
        return None;
    }
    Some((bucket, object))
}

pub fn make_gs_url(bucket: &str, object: &str) -> String {
    format!("gs://{bucket}/{object}")
}
