use std::sync::Arc;

use anyhow::Result;

use crate::apify::ApifyClient;
use crate::config::{AppConfig, StorageBackend};
use crate::local_storage::LocalStorage;
use crate::storage::{Dataset, KeyValueStore};
use crate::ytdlp::{Downloader, YtDlp};

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub downloader: Arc<dyn Downloader>,
    pub store: Arc<dyn KeyValueStore>,
    pub dataset: Arc<dyn Dataset>,
}

impl AppState {
    pub fn from_config(cfg: AppConfig) -> Result<Self> {
        let config = Arc::new(cfg);
        let downloader: Arc<dyn Downloader> = Arc::new(YtDlp::new(config.clone()));

        let (store, dataset): (Arc<dyn KeyValueStore>, Arc<dyn Dataset>) =
            match config.storage_backend {
                StorageBackend::Platform => {
                    let client = Arc::new(ApifyClient::from_config(&config)?);
                    (client.clone() as Arc<dyn KeyValueStore>, client as Arc<dyn Dataset>)
                }
                StorageBackend::Local => {
                    let local = Arc::new(LocalStorage::new(
                        &config.local_storage_dir,
                        &config.key_value_store_id,
                        &config.dataset_id,
                    ));
                    (local.clone() as Arc<dyn KeyValueStore>, local as Arc<dyn Dataset>)
                }
            };

        Ok(Self {
            config,
            downloader,
            store,
            dataset,
        })
    }
}
