//! Remote recording listings per site and deployment folder.

use crate::catalog::{Catalog, CatalogBuilder, FileRecord, NoProbe, TimeRange};
use crate::config::Config;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::timeparse::basename;
use tracing::{debug, info};

const DEPLOYMENT_PREFIX: &str = "sanctsound_";

/// Lists deployments and their `.flac` recordings under the audio prefix.
pub struct AudioLister<'a, S: ?Sized> {
    store: &'a S,
    audio_prefix: String,
    builder: CatalogBuilder,
}

impl<'a, S: ObjectStore + ?Sized> AudioLister<'a, S> {
    pub fn new(store: &'a S, audio_prefix: impl Into<String>) -> Self {
        Self {
            store,
            audio_prefix: audio_prefix.into().trim_end_matches('/').to_string(),
            builder: CatalogBuilder::default(),
        }
    }

    pub fn from_config(store: &'a S, config: &Config) -> Self {
        Self::new(store, config.audio_prefix.clone()).with_builder(CatalogBuilder::from_config(config))
    }

    pub fn with_builder(mut self, builder: CatalogBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Deployment folders of a site (`sanctsound_*`), sorted by name.
    pub async fn list_site_deployments(&self, site: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/{}/", self.audio_prefix, site);
        let mut folders: Vec<String> = self
            .store
            .list_prefixes(&prefix)
            .await?
            .iter()
            .map(|p| basename(p).to_string())
            .filter(|name| name.starts_with(DEPLOYMENT_PREFIX))
            .collect();
        folders.sort();
        folders.dedup();
        debug!("{} deployments under {}", folders.len(), prefix);
        Ok(folders)
    }

    /// Timestamped `.flac` records of one folder, range-filtered with the
    /// left-boundary candidate retained.
    pub async fn folder_records(
        &self,
        site: &str,
        folder: &str,
        range: &TimeRange,
    ) -> Result<Vec<FileRecord>> {
        let prefix = format!("{}/{}/{}/audio/", self.audio_prefix, site, folder);
        let objects = self.store.list(&prefix).await?;

        let records = objects
            .into_iter()
            .filter(|o| o.name.to_lowercase().ends_with(".flac"))
            .filter_map(|o| FileRecord::from_identifier(o.url, Some(folder.to_string())));

        Ok(self.builder.filter(records, range))
    }

    /// Catalog of a single deployment folder.
    pub async fn list_audio_files_in_folder(
        &self,
        site: &str,
        folder: &str,
        range: &TimeRange,
    ) -> Result<Catalog> {
        let records = self.folder_records(site, folder, range).await?;
        Ok(self.builder.infer_ends(records, &NoProbe))
    }

    /// Catalog spanning every deployment of a site, `preferred` folder first.
    ///
    /// Each folder keeps its own left-boundary candidate. Entries end up sorted
    /// by `(start, folder)` and ends never cross folders.
    pub async fn list_audio_files_across(
        &self,
        site: &str,
        preferred: Option<&str>,
        range: &TimeRange,
    ) -> Result<Catalog> {
        let deployments = self.list_site_deployments(site).await?;
        let ordered: Vec<&str> = preferred
            .into_iter()
            .chain(deployments.iter().map(String::as_str).filter(|f| Some(*f) != preferred))
            .collect();

        let mut records = Vec::new();
        for folder in ordered {
            let found = self.folder_records(site, folder, range).await?;
            debug!("{}: {} files in range", folder, found.len());
            records.extend(found);
        }

        let catalog = self.builder.infer_ends(records, &NoProbe);
        info!("Listed {} audio files for {}", catalog.len(), site);
        Ok(catalog)
    }
}
