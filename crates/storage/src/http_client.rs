//! JSON-over-HTTP client for outbound calls

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::error::{StorageError, StorageResult};

/// Thin wrapper over `reqwest` that resolves paths against a base URL
/// and treats every non-2xx answer as an error.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    pub fn new(base_url: &str) -> StorageResult<Self> {
        HttpClientBuilder::new(base_url).build()
    }

    pub fn builder(base_url: &str) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for `path`, relative to the base URL
    pub fn url(&self, path: &str) -> StorageResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| StorageError::InvalidLocation(format!("{}: {}", path, e)))
    }

    /// `GET path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> StorageResult<T> {
        let operation = format!("GET {}", path);
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .map_err(|e| StorageError::from_reqwest(operation.clone(), e))?;
        decode(operation, response).await
    }

    /// `POST path` with a JSON body and decode the JSON answer
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> StorageResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let operation = format!("POST {}", path);
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| StorageError::from_reqwest(operation.clone(), e))?;
        decode(operation, response).await
    }
}

async fn decode<T: DeserializeOwned>(operation: String, response: Response) -> StorageResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%operation, status = status.as_u16(), "outbound request failed");
        return Err(StorageError::Api {
            operation,
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| StorageError::from_reqwest(operation.clone(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode {
        operation,
        message: e.to_string(),
    })
}

/// Builder for [`HttpClient`]
#[derive(Debug)]
pub struct HttpClientBuilder {
    base_url: String,
    timeout: Duration,
    bearer_token: Option<String>,
    user_agent: String,
}

impl HttpClientBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(30),
            bearer_token: None,
            user_agent: format!("paydesk/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bearer_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    pub fn build(self) -> StorageResult<HttpClient> {
        let mut base_url = Url::parse(&self.base_url).map_err(|e| {
            StorageError::Configuration(format!("invalid base URL '{}': {}", self.base_url, e))
        })?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| StorageError::Configuration("bearer token is not a valid header".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| StorageError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(HttpClient { client, base_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_resolve_under_base() {
        let client = HttpClient::new("http://acquirer.test/api/v1").unwrap();
        assert_eq!(
            client.url("/merchants/17").unwrap().as_str(),
            "http://acquirer.test/api/v1/merchants/17"
        );
        assert_eq!(
            client.url("schemes").unwrap().as_str(),
            "http://acquirer.test/api/v1/schemes"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpClient::new("not a url"),
            Err(StorageError::Configuration(_))
        ));
    }
}
