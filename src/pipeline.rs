//! The single download → upload → publish run.
//!
//! `START → input-validated → id-extracted → downloaded → verified-present →
//! uploaded → item-pushed → cleanup → END`. Once the temp path is known, every
//! exit goes through cleanup.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{info, warn};
use serde::Serialize;

use crate::error::RunError;
use crate::input::ActorInput;
use crate::state::AppState;
use crate::util;

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
    pub video_url: String,
    pub download_url: String,
}

/// Owns the run's temp file. Removed by `remove`, or on drop if `remove` never ran.
struct TempVideo {
    path: PathBuf,
    armed: bool,
}

impl TempVideo {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file if present. A failed delete is logged, never returned.
    fn remove(&mut self) {
        self.armed = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("[CLEANUP] Temporary file deleted: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "[CLEANUP] Failed to delete temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for TempVideo {
    fn drop(&mut self) {
        if self.armed {
            self.remove();
        }
    }
}

pub async fn run(state: &AppState) -> Result<OutputItem, RunError> {
    let input = ActorInput::load(state.store.as_ref(), &state.config.input_key).await?;
    let video_url = input.video_url().ok_or(RunError::MissingInput)?.to_string();
    // The dataset item echoes the input as given; parsing and download use the trimmed form.
    let source_url = input.video_url.unwrap_or_default();

    info!("[RUN] Start downloading the video: {}", video_url);

    let safe_id = util::video_id_from_url(&video_url)
        .map(|id| util::sanitize_video_id(&id))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RunError::UnparseableUrl(video_url.clone()))?;

    let filename = format!("{}.mp4", safe_id);
    let mut temp = TempVideo::new(state.config.temp_dir.join(&filename));

    let result = transfer(state, &source_url, &video_url, &filename, temp.path()).await;
    temp.remove();
    result
}

async fn transfer(
    state: &AppState,
    source_url: &str,
    video_url: &str,
    filename: &str,
    local_path: &Path,
) -> Result<OutputItem, RunError> {
    state.downloader.download(video_url, local_path).await?;
    info!("[DOWNLOAD] Video downloaded: {}", local_path.display());

    if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
        return Err(RunError::FileMissing(local_path.to_path_buf()));
    }

    let data = tokio::fs::read(local_path)
        .await
        .map_err(|source| RunError::ReadFile {
            path: local_path.to_path_buf(),
            source,
        })?;
    let size = data.len();

    state
        .store
        .set_record(filename, Bytes::from(data), VIDEO_CONTENT_TYPE)
        .await
        .map_err(RunError::Upload)?;
    let download_url = state.store.record_url(filename).map_err(RunError::Upload)?;
    info!("[UPLOAD] Stored {} ({} bytes) in the key-value store", filename, size);
    info!("[UPLOAD] Download link: {}", download_url);

    let item = OutputItem {
        video_url: source_url.to_string(),
        download_url,
    };
    let value = serde_json::to_value(&item).map_err(RunError::Encode)?;
    state
        .dataset
        .push_items(vec![value])
        .await
        .map_err(RunError::Dataset)?;
    info!("[DATASET] Pushed item for {}", video_url);

    Ok(item)
}
