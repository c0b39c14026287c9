//! Detection product sets published per site.

use crate::config::Mode;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::timeparse::basename;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Product file types, most preferred first.
pub const PREFERRED_PRODUCT_EXTENSIONS: [&str; 3] = [".csv", ".nc", ".json"];

/// One product set (e.g. `sanctsound_ci01_01_bluewhale_1d`) and its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductGroup {
    pub name: String,
    pub mode: Mode,
    /// Full `gs://` URLs.
    pub paths: Vec<String>,
    /// Extension (with dot, lowercase) -> number of files.
    pub ext_counts: BTreeMap<String, usize>,
}

impl ProductGroup {
    fn new(name: String) -> Self {
        Self {
            mode: Mode::from_group_name(&name),
            name,
            paths: Vec::new(),
            ext_counts: BTreeMap::new(),
        }
    }

    /// The subset of files worth downloading.
    pub fn best_files(&self) -> Vec<String> {
        choose_best_files(&self.paths)
    }
}

/// Lowercased extension including the dot, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = basename(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => Some(name[idx..].to_lowercase()),
        _ => None,
    }
}

/// Scan `{products_prefix}/{site}/` for product files whose name contains
/// `tag` and group them by the directory directly under the site.
pub async fn list_product_groups<S: ObjectStore + ?Sized>(
    store: &S,
    products_prefix: &str,
    site: &str,
    tag: &str,
) -> Result<Vec<ProductGroup>> {
    let site_prefix = format!("{}/{}/", products_prefix.trim_end_matches('/'), site);
    let tag = tag.to_lowercase();

    let mut groups: BTreeMap<String, ProductGroup> = BTreeMap::new();
    for object in store.list(&site_prefix).await? {
        if object.name.ends_with('/') {
            continue;
        }
        let Some(ext) = extension(&object.name) else {
            continue;
        };
        if !PREFERRED_PRODUCT_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if !basename(&object.name).to_lowercase().contains(&tag) {
            continue;
        }

        let name = group_name(&object.name, &site_prefix);
        let group = groups
            .entry(name.clone())
            .or_insert_with(|| ProductGroup::new(name));
        group.paths.push(object.url);
        *group.ext_counts.entry(ext).or_insert(0) += 1;
    }

    info!("Found {} product groups for {}", groups.len(), site);
    for group in groups.values() {
        debug!("{} [{}]: {:?}", group.name, group.mode, group.ext_counts);
    }
    Ok(groups.into_values().collect())
}

/// Directory directly under the site, or the file stem for loose files.
fn group_name(object_name: &str, site_prefix: &str) -> String {
    if let Some((dir, _)) = object_name
        .strip_prefix(site_prefix)
        .and_then(|rest| rest.split_once('/'))
    {
        return dir.to_string();
    }
    let file = basename(object_name);
    file.split('.').next().unwrap_or(file).to_string()
}

/// Keep only files of the most preferred type present; the input unchanged
/// when none of the preferred types appear.
pub fn choose_best_files(paths: &[String]) -> Vec<String> {
    PREFERRED_PRODUCT_EXTENSIONS
        .iter()
        .map(|ext| {
            paths
                .iter()
                .filter(|p| extension(p).as_deref() == Some(*ext))
                .cloned()
                .collect::<Vec<_>>()
        })
        .find(|matched| !matched.is_empty())
        .unwrap_or_else(|| paths.to_vec())
}
