use crate::error::{Result, SanctclipError};
use crate::store::{make_gs_url, parse_gs_url, ObjectEntry, ObjectStore};
use crate::timeparse::basename;
use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Public Google Cloud Storage endpoint.
const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// Maximum attempts per request.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

/// Connection timeout for listing and downloads.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListResponse {
    items: Vec<GcsObject>,
    prefixes: Vec<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
}

/// Anonymous client for a public GCS bucket, using the JSON listing API.
pub struct GcsStore {
    client: reqwest::Client,
    bucket: String,
    base_url: String,
    retry_delay: Duration,
    show_progress: bool,
}

impl GcsStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            bucket: bucket.into(),
            base_url: GCS_BASE_URL.to_string(),
            retry_delay: Duration::from_millis(BASE_DELAY_MS),
            show_progress: false,
        }
    }

    /// Point at another endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enable or disable per-download progress bars.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Bucket and object name for a path or `gs://` URL.
    fn resolve<'a>(&'a self, path: &'a str) -> (&'a str, &'a str) {
        parse_gs_url(path).unwrap_or((self.bucket.as_str(), path.trim_start_matches('/')))
    }

    fn url_with_segments<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SanctclipError::Store(format!("Bad base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| SanctclipError::Store(format!("Base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn list_url(&self, bucket: &str) -> Result<Url> {
        self.url_with_segments(["storage", "v1", "b", bucket, "o"])
    }

    /// Metadata URL; the object name is a single encoded segment.
    fn object_url(&self, bucket: &str, object: &str) -> Result<Url> {
        self.url_with_segments(["storage", "v1", "b", bucket, "o", object])
    }

    fn download_url(&self, bucket: &str, object: &str) -> Result<Url> {
        self.url_with_segments(std::iter::once(bucket).chain(object.split('/')))
    }

    /// GET with exponential backoff. Client errors (4xx) are not retried.
    async fn get_with_retry(&self, url: &Url, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.pow(attempt - 1);
                debug!("Retry attempt {} after {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            match self.client.get(url.clone()).query(query).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_client_error() => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(SanctclipError::Store(format!(
                        "GET {url} failed ({status}): {}",
                        body.trim()
                    )));
                }
                Ok(response) => {
                    let status = response.status();
                    warn!("Attempt {} for {} failed: {}", attempt + 1, url, status);
                    last_error = Some(SanctclipError::Store(format!("GET {url} failed ({status})")));
                }
                Err(e) => {
                    warn!("Attempt {} for {} failed: {}", attempt + 1, url, e);
                    last_error = Some(SanctclipError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SanctclipError::Store("Unknown error".to_string())))
    }

    /// Walk every listing page under `prefix`.
    async fn list_pages(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<(Vec<ObjectEntry>, Vec<String>)> {
        let (bucket, object_prefix) = self.resolve(prefix);
        let url = self.list_url(bucket)?;

        let mut objects = Vec::new();
        let mut prefixes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", object_prefix)];
            if let Some(d) = delimiter {
                query.push(("delimiter", d));
            }
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            debug!("[gcs] list gs://{}/{}", bucket, object_prefix);
            let body = self.get_with_retry(&url, &query).await?.text().await?;
            let page: ListResponse = serde_json::from_str(&body)?;

            objects.extend(page.items.into_iter().map(|item| ObjectEntry {
                url: make_gs_url(bucket, &item.name),
                size: item.size.and_then(|s| s.parse().ok()),
                name: item.name,
            }));
            prefixes.extend(page.prefixes);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok((objects, prefixes))
    }

    /// Size reported by the object's metadata, when it can be read.
    async fn object_size(&self, bucket: &str, object: &str) -> Option<u64> {
        let url = self.object_url(bucket, object).ok()?;
        let response = match self.get_with_retry(&url, &[]).await {
            Ok(response) => response,
            Err(e) => {
                debug!("No metadata for gs://{}/{}: {}", bucket, object, e);
                return None;
            }
        };
        let meta: GcsObject = response.json().await.ok()?;
        meta.size.and_then(|s| s.parse().ok())
    }

    fn download_bar(&self, len: Option<u64>, name: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len.unwrap_or(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(name.to_string());
        Some(pb)
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        part: &Path,
        pb: Option<&ProgressBar>,
    ) -> Result<()> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            if let Some(pb) = pb {
                pb.inc(chunk.len() as u64);
            }
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let (objects, _) = self.list_pages(prefix, None).await?;
        Ok(objects)
    }

    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let (_, prefixes) = self.list_pages(prefix, Some("/")).await?;
        Ok(prefixes)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let (bucket, object) = self.resolve(path);
        let url = self.download_url(bucket, object)?;
        debug!("[http] GET {}", url);
        let bytes = self.get_with_retry(&url, &[]).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn fetch(&self, path: &str, dest_dir: &Path) -> Result<PathBuf> {
        let (bucket, object) = self.resolve(path);
        let name = basename(object);
        if name.is_empty() {
            return Err(SanctclipError::InvalidInput(format!("No object name in {path}")));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let local = dest_dir.join(name);

        let local_size = tokio::fs::metadata(&local).await.ok().map(|m| m.len());
        let remote_size = match local_size {
            Some(_) => self.object_size(bucket, object).await,
            None => None,
        };
        if remote_size.is_some() && remote_size == local_size {
            debug!("{} already present, skipping", local.display());
            return Ok(local);
        }

        let url = self.download_url(bucket, object)?;
        debug!("[http] GET {}", url);
        let response = self.get_with_retry(&url, &[]).await?;
        let expected = response.content_length();

        if remote_size.is_none() && expected.is_some() && expected == local_size {
            debug!("{} already present, skipping", local.display());
            return Ok(local);
        }

        let part = dest_dir.join(format!("{name}.part"));
        let pb = self.download_bar(expected, name);
        let result = self.stream_to_file(response, &part, pb.as_ref()).await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, &local).await?;
        Ok(local)
    }

    fn name(&self) -> &'static str {
        "Google Cloud Storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_url() {
        let store = GcsStore::new("noaa-passive-bioacoustic");
        assert_eq!(
            store.list_url("noaa-passive-bioacoustic").unwrap().as_str(),
            "https://storage.googleapis.com/storage/v1/b/noaa-passive-bioacoustic/o"
        );
    }

    #[test]
    fn test_download_url_keeps_path_structure() {
        let store = GcsStore::new("bucket").with_base_url("http://localhost:9000/");
        let url = store
            .download_url("bucket", "sanctsound/audio/ci01/x 1.flac")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/bucket/sanctsound/audio/ci01/x%201.flac"
        );
    }

    #[test]
    fn test_object_url_encodes_name_as_one_segment() {
        let store = GcsStore::new("bucket").with_base_url("http://localhost:9000");
        let url = store.object_url("bucket", "a/b/x.flac").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/storage/v1/b/bucket/o/a%2Fb%2Fx.flac"
        );
    }

    #[test]
    fn test_resolve_prefers_gs_url_bucket() {
        let store = GcsStore::new("default");
        assert_eq!(store.resolve("gs://other/a/b.csv"), ("other", "a/b.csv"));
        assert_eq!(store.resolve("a/b.csv"), ("default", "a/b.csv"));
    }

    #[test]
    fn test_list_response_parsing() {
        let body = r#"{
            "kind": "storage#objects",
            "items": [{"name": "a/x.flac", "size": "1024"}],
            "prefixes": ["a/sub/"],
            "nextPageToken": "tok"
        }"#;
        let page: ListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.items[0].name, "a/x.flac");
        assert_eq!(page.items[0].size.as_deref(), Some("1024"));
        assert_eq!(page.prefixes, vec!["a/sub/"]);
        assert_eq!(page.next_page_token.as_deref(), Some("tok"));

        let empty: ListResponse = serde_json::from_str(r#"{"kind": "storage#objects"}"#).unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.next_page_token.is_none());
    }
}
