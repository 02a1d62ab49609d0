//! Azure-style blob store: one authenticated `PUT` per blob

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::blob::{validate_blob_name, validate_container, BlobStore};
use crate::content_type::detect_content_type;
use crate::error::{StorageError, StorageResult};

pub const BLOB_SERVICE_VERSION: &str = "2021-08-06";

/// Uploads block blobs to `{account_url}/{container}/{name}` using a
/// shared access signature query string
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    client: Client,
    account_url: Url,
    sas_token: String,
}

impl AzureBlobStore {
    pub fn new(account_url: &str, sas_token: &str) -> StorageResult<Self> {
        Self::with_timeout(account_url, sas_token, Duration::from_secs(30))
    }

    pub fn with_timeout(account_url: &str, sas_token: &str, timeout: Duration) -> StorageResult<Self> {
        let account_url = Url::parse(account_url).map_err(|e| {
            StorageError::Configuration(format!("invalid account URL '{}': {}", account_url, e))
        })?;
        if account_url.cannot_be_a_base() {
            return Err(StorageError::Configuration(format!(
                "account URL '{}' cannot carry a path",
                account_url
            )));
        }
        let sas_token = sas_token.trim_start_matches('?').to_string();
        if sas_token.is_empty() {
            return Err(StorageError::Configuration(
                "a shared access signature is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            account_url,
            sas_token,
        })
    }

    /// Blob URL including the signature
    pub fn blob_url(&self, container: &str, name: &str) -> StorageResult<Url> {
        validate_container(container)?;
        validate_blob_name(name)?;

        let mut url = self.account_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Configuration("account URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(container)
            .extend(name.split('/'));
        url.set_query(Some(&self.sas_token));
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn upload_blob(&self, contents: Bytes, container: &str, name: &str) -> StorageResult<()> {
        let url = self.blob_url(container, name)?;
        let content_type = detect_content_type(name, &contents);
        let size = contents.len();

        let response = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", BLOB_SERVICE_VERSION)
            .header(CONTENT_TYPE, content_type.as_ref())
            .body(contents)
            .send()
            .await
            .map_err(|e| StorageError::from_reqwest("upload_blob", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                operation: "upload_blob".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(container, blob = name, bytes = size, "blob uploaded");
        Ok(())
    }
}
