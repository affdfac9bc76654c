use std::path::PathBuf;

use log::{error, info};

mod apify;
mod config;
mod error;
mod input;
mod local_storage;
mod pipeline;
mod state;
mod storage;
mod util;
mod ytdlp;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cfg_path = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .map(PathBuf::from);

    let cfg = match config::AppConfig::load(cfg_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("[CONFIG] Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    let fail_on_error = cfg.fail_on_error;

    info!(
        "[CONFIG] storage_backend={:?} temp_dir={}",
        cfg.storage_backend,
        cfg.temp_dir.display()
    );

    let state = match AppState::from_config(cfg) {
        Ok(s) => s,
        Err(e) => {
            error!("[CONFIG] Failed to initialize: {:#}", e);
            std::process::exit(1);
        }
    };

    match pipeline::run(&state).await {
        Ok(item) => info!("[RUN] Done: {} -> {}", item.video_url, item.download_url),
        Err(e) => {
            error!("[RUN] Error: {}", e);
            if fail_on_error {
                std::process::exit(1);
            }
        }
    }
}
