use log::info;
use serde::Deserialize;

use crate::error::RunError;
use crate::storage::KeyValueStore;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInput {
    pub video_url: Option<String>,
}

impl ActorInput {
    /// A missing record reads as an empty input.
    pub async fn load(store: &dyn KeyValueStore, key: &str) -> Result<Self, RunError> {
        let raw = store
            .get_record(key)
            .await
            .map_err(RunError::InputUnavailable)?;

        match raw {
            Some(raw) => serde_json::from_slice(&raw).map_err(RunError::InvalidInput),
            None => {
                info!("[INPUT] No input record under key {}", key);
                Ok(Self::default())
            }
        }
    }

    /// `videoUrl` trimmed; blank counts as absent.
    pub fn video_url(&self) -> Option<&str> {
        self.video_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}
