//! Image acquisition: HTTP URLs and local paths behind one seam.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("empty source identifier")]
    EmptyIdentifier,
    #[error("http fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {status} fetching {url}")]
    Status { url: String, status: u16 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Where image bytes come from. `probe` is the cheap reachability check
/// cache cleanup uses; it must not download the image body.
#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError>;

    /// `Ok(false)` means the source is confirmed gone; a transport error
    /// means "could not tell" and is surfaced as `Err`.
    async fn probe(&self, identifier: &str) -> Result<bool, FetchError>;
}

/// Production fetcher: `reqwest` for `http(s)` identifiers, the local
/// filesystem for everything else.
pub struct ImageFetcher {
    client: reqwest::Client,
}

fn is_url(identifier: &str) -> bool {
    identifier.starts_with("http://") || identifier.starts_with("https://")
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for ImageFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(FetchError::EmptyIdentifier);
        }

        if is_url(identifier) {
            let response = self.client.get(identifier).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: identifier.to_string(),
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().await?;
            tracing::debug!(url = identifier, bytes = bytes.len(), "image fetched");
            Ok(bytes.to_vec())
        } else {
            let bytes = tokio::fs::read(Path::new(identifier)).await?;
            tracing::debug!(path = identifier, bytes = bytes.len(), "image read");
            Ok(bytes)
        }
    }

    async fn probe(&self, identifier: &str) -> Result<bool, FetchError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(false);
        }

        if is_url(identifier) {
            let response = self.client.head(identifier).send().await?;
            Ok(response.status().is_success())
        } else {
            match tokio::fs::metadata(Path::new(identifier)).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
    }
}
