use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;
use crate::ytdlp::DownloadError;

/// Why a run ended without pushing a dataset item.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("video URL ('videoUrl') not provided")]
    MissingInput,

    #[error("input record is not valid JSON: {0}")]
    InvalidInput(#[source] serde_json::Error),

    #[error("failed to read input record: {0}")]
    InputUnavailable(#[source] StorageError),

    #[error("unable to extract video ID from URL: {0}")]
    UnparseableUrl(String),

    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("downloaded file not found: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("failed to read downloaded file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload to key-value store failed: {0}")]
    Upload(#[source] StorageError),

    #[error("dataset push failed: {0}")]
    Dataset(#[source] StorageError),

    #[error("failed to encode output item: {0}")]
    Encode(#[source] serde_json::Error),
}
