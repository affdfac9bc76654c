//! Key-value store and dataset seams.
//!
//! The pipeline only needs three store operations (read a record, write a
//! record, resolve a record's public URL) and one dataset operation (append
//! items). Backends live in `apify` (HTTP API) and `local_storage` (a local
//! directory tree with the same layout the platform uses for local runs).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API responded with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid record key: {0}")]
    InvalidKey(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `Ok(None)` when no record exists under `key`.
    async fn get_record(&self, key: &str) -> StorageResult<Option<Bytes>>;

    async fn set_record(&self, key: &str, value: Bytes, content_type: &str) -> StorageResult<()>;

    /// Public retrieval URL for `key`. Does not check that the record exists.
    fn record_url(&self, key: &str) -> StorageResult<String>;
}

#[async_trait]
pub trait Dataset: Send + Sync {
    async fn push_items(&self, items: Vec<serde_json::Value>) -> StorageResult<()>;
}
