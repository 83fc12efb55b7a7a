//! Os2FormsFetcher - downloads receipts from the forms portal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::{FetchError, OutlayRequest};
use crate::ports::ReceiptFetcher;

const API_KEY_HEADER: &str = "api-key";

pub struct Os2FormsFetcher {
    client: reqwest::Client,
    api_key: String,
}

impl Os2FormsFetcher {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key)
    }

    pub fn with_client(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ReceiptFetcher for Os2FormsFetcher {
    async fn fetch(&self, request: &OutlayRequest, dir: &Path) -> Result<PathBuf, FetchError> {
        let url = request
            .attachment
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| FetchError::MissingData("missing 'attachment' URL".to_string()))?;
        if request.uuid.trim().is_empty() {
            return Err(FetchError::MissingData("missing 'uuid'".to_string()));
        }

        info!(uuid = %request.uuid, "downloading receipt from OS2Forms");
        let content = self.download(url).await?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| FetchError::Filesystem {
                path: dir.to_path_buf(),
                source,
            })?;
        let path = request.receipt_path(dir);
        tokio::fs::write(&path, &content)
            .await
            .map_err(|source| FetchError::Filesystem {
                path: path.clone(),
                source,
            })?;

        debug!(uuid = %request.uuid, path = %path.display(), bytes = content.len(), "receipt saved");
        Ok(path)
    }
}
