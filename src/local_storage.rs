use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use url::Url;

use crate::storage::{Dataset, KeyValueStore, StorageError, StorageResult};

/// Filesystem storage laid out like a local platform run:
///
/// ```text
/// <root>/key_value_stores/<store_id>/<key>[.ext]
/// <root>/datasets/<dataset_id>/000000001.json
/// ```
#[derive(Clone, Debug)]
pub struct LocalStorage {
    store_dir: PathBuf,
    dataset_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>, store_id: &str, dataset_id: &str) -> Self {
        let root = root.as_ref();
        Self {
            store_dir: root.join("key_value_stores").join(store_id),
            dataset_dir: root.join("datasets").join(dataset_id),
        }
    }

    fn validate_key(key: &str) -> StorageResult<()> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// File a new record is written to. Keys without an extension get one from the content type.
    fn record_path(&self, key: &str, content_type: &str) -> PathBuf {
        if Path::new(key).extension().is_some() {
            return self.store_dir.join(key);
        }
        let ext = if content_type.starts_with("application/json") {
            "json"
        } else {
            "bin"
        };
        self.store_dir.join(format!("{}.{}", key, ext))
    }

    /// Existing file holding `key`: an exact name match first, then any file whose stem is `key`.
    async fn find_record(&self, key: &str) -> StorageResult<Option<PathBuf>> {
        let exact = self.store_dir.join(key);
        if fs::try_exists(&exact).await? {
            return Ok(Some(exact));
        }

        let mut entries = match fs::read_dir(&self.store_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(key) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    async fn next_item_path(&self) -> StorageResult<PathBuf> {
        let mut highest = 0u64;
        let mut entries = fs::read_dir(&self.dataset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(n) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                highest = highest.max(n);
            }
        }
        Ok(self.dataset_dir.join(format!("{:09}.json", highest + 1)))
    }
}

#[async_trait]
impl KeyValueStore for LocalStorage {
    async fn get_record(&self, key: &str) -> StorageResult<Option<Bytes>> {
        Self::validate_key(key)?;
        match self.find_record(key).await? {
            Some(path) => Ok(Some(Bytes::from(fs::read(path).await?))),
            None => Ok(None),
        }
    }

    async fn set_record(&self, key: &str, value: Bytes, content_type: &str) -> StorageResult<()> {
        Self::validate_key(key)?;
        fs::create_dir_all(&self.store_dir).await?;
        fs::write(self.record_path(key, content_type), &value).await?;
        Ok(())
    }

    fn record_url(&self, key: &str) -> StorageResult<String> {
        Self::validate_key(key)?;
        // Assumes the key carries its extension, as video keys do.
        let path = std::path::absolute(self.store_dir.join(key))?;
        Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| StorageError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl Dataset for LocalStorage {
    async fn push_items(&self, items: Vec<serde_json::Value>) -> StorageResult<()> {
        fs::create_dir_all(&self.dataset_dir).await?;
        for item in items {
            let path = self.next_item_path().await?;
            fs::write(path, serde_json::to_vec_pretty(&item)?).await?;
        }
        Ok(())
    }
}
