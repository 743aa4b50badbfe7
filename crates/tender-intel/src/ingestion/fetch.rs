//! Fetch collaborator: resolves document locators to local files

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::types::document::extension_of;

/// A locally readable copy of a document
///
/// Downloaded files live in a temporary path that is deleted when the
/// `FetchedFile` is dropped; local files are referenced in place.
#[derive(Debug)]
pub struct FetchedFile {
    path: PathBuf,
    _temp: Option<TempPath>,
}

impl FetchedFile {
    /// Reference an existing local file
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _temp: None,
        }
    }

    /// Take ownership of a temporary file
    pub fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            _temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

/// Resolves a locator to a local file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `locator`; `name` is the document's file name, used for the
    /// temporary file's extension
    async fn fetch(&self, name: &str, locator: &str) -> Result<FetchedFile>;
}

/// Fetcher for `http(s)://` URLs, `file://` URLs and plain local paths
pub struct LocatorFetcher {
    client: Client,
    max_bytes: u64,
}

impl LocatorFetcher {
    pub fn new(config: &IngestionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_bytes: config.max_download_bytes,
        })
    }

    pub fn is_url(locator: &str) -> bool {
        let lower = locator.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    async fn download(&self, name: &str, url: &str) -> Result<FetchedFile> {
        tracing::debug!("Downloading {} from {}", name, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::fetch(url, format!("HTTP {}", response.status())));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(Error::fetch(
                    url,
                    format!("file is {} bytes, limit is {}", length, self.max_bytes),
                ));
            }
        }

        let suffix = match extension_of(name) {
            ext if ext.is_empty() => String::new(),
            ext => format!(".{}", ext),
        };
        let mut file = tempfile::Builder::new()
            .prefix("tender-doc-")
            .suffix(&suffix)
            .tempfile()?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::fetch(url, e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(Error::fetch(
                    url,
                    format!("download exceeded limit of {} bytes", self.max_bytes),
                ));
            }
            file.write_all(&chunk)?;
        }
        file.flush()?;

        tracing::debug!("Downloaded {} ({} bytes)", name, written);
        Ok(FetchedFile::temporary(file.into_temp_path()))
    }
}

#[async_trait]
impl Fetcher for LocatorFetcher {
    async fn fetch(&self, name: &str, locator: &str) -> Result<FetchedFile> {
        if Self::is_url(locator) {
            return self.download(name, locator).await;
        }

        let path = PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator));
        if !path.is_file() {
            return Err(Error::fetch(locator, "file not found"));
        }
        Ok(FetchedFile::local(path))
    }
}
