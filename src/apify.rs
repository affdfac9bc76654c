//! Apify API v2 client for the run's key-value store and dataset.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use url::Url;

use crate::config::AppConfig;
use crate::storage::{Dataset, KeyValueStore, StorageError, StorageResult};

#[derive(Clone, Debug)]
pub struct ApifyClient {
    client: Client,
    base_url: Url,
    // Base for the record links handed out; defaults to `base_url`.
    public_base_url: Url,
    token: Option<String>,
    store_id: String,
    dataset_id: String,
}

impl ApifyClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        store_id: String,
        dataset_id: String,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        let base_url = parse_base_url(base_url)?;

        Ok(Self {
            client,
            public_base_url: base_url.clone(),
            base_url,
            token,
            store_id,
            dataset_id,
        })
    }

    /// Hand out record links under `public_base_url` instead of the API base.
    pub fn with_public_base_url(mut self, public_base_url: &str) -> Result<Self> {
        self.public_base_url = parse_base_url(public_base_url)?;
        Ok(self)
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::new(
            &cfg.api_base_url,
            cfg.api_token.clone(),
            cfg.key_value_store_id.clone(),
            cfg.dataset_id.clone(),
            cfg.request_timeout_secs.map(Duration::from_secs),
        )?
        .with_public_base_url(&cfg.public_base_url)
    }

    /// `{base}/v2/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> StorageResult<Url> {
        join_v2(&self.base_url, segments)
    }

    fn record_segments<'a>(&'a self, key: &'a str) -> StorageResult<[&'a str; 4]> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(["key-value-stores", self.store_id.as_str(), "records", key])
    }

    fn record_endpoint(&self, key: &str) -> StorageResult<Url> {
        self.endpoint(&self.record_segments(key)?)
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(StorageError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("Invalid API base URL: {}", raw))?;
    if url.cannot_be_a_base() {
        return Err(anyhow::anyhow!("Invalid API base URL: {}", url));
    }
    Ok(url)
}

fn join_v2(base: &Url, segments: &[&str]) -> StorageResult<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| StorageError::InvalidBaseUrl(base.to_string()))?;
        path.pop_if_empty().push("v2").extend(segments);
    }
    Ok(url)
}

#[async_trait]
impl KeyValueStore for ApifyClient {
    async fn get_record(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let url = self.record_endpoint(key)?;
        let response = self.apply_auth(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(response.bytes().await?))
    }

    async fn set_record(&self, key: &str, value: Bytes, content_type: &str) -> StorageResult<()> {
        let url = self.record_endpoint(key)?;
        let request = self
            .client
            .put(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(value);
        let response = self.apply_auth(request).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    fn record_url(&self, key: &str) -> StorageResult<String> {
        Ok(join_v2(&self.public_base_url, &self.record_segments(key)?)?.to_string())
    }
}

#[async_trait]
impl Dataset for ApifyClient {
    async fn push_items(&self, items: Vec<serde_json::Value>) -> StorageResult<()> {
        let url = self.endpoint(&["datasets", &self.dataset_id, "items"])?;
        let request = self.client.post(url).json(&items);
        let response = self.apply_auth(request).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
