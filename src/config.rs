use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
pub const DEFAULT_API_BASE_URL: &str = "https://api.apify.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Platform,
    Local,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub temp_dir: PathBuf,
    pub format: String,

    pub ytdlp_bin: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_bin: Option<PathBuf>,
    // Explicit yt-dlp proxy (e.g. socks5://127.0.0.1:7890).
    pub ytdlp_proxy: Option<String>,
    // Whether to let yt-dlp inherit http_proxy/https_proxy from our environment.
    pub inherit_proxy_env: bool,
    pub cookies_file: Option<PathBuf>,
    pub quiet: bool,
    pub download_timeout_secs: Option<u64>,

    pub storage_backend: StorageBackend,
    pub api_base_url: String,
    // Base of the download links handed out; may differ from the API endpoint we call.
    pub public_base_url: String,
    pub api_token: Option<String>,
    pub key_value_store_id: String,
    pub dataset_id: String,
    pub input_key: String,
    pub local_storage_dir: PathBuf,
    pub request_timeout_secs: Option<u64>,

    pub fail_on_error: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AppConfigFile {
    temp_dir: Option<String>,
    format: Option<String>,

    ytdlp_bin: Option<String>,
    ytdlp_path: Option<String>,
    ffmpeg_bin: Option<String>,
    ytdlp_proxy: Option<String>,
    inherit_proxy_env: Option<bool>,
    cookies_file: Option<String>,
    quiet: Option<bool>,
    download_timeout_secs: Option<u64>,

    // "platform" or "local"
    storage_backend: Option<String>,
    api_base_url: Option<String>,
    public_base_url: Option<String>,
    api_token: Option<String>,
    key_value_store_id: Option<String>,
    dataset_id: Option<String>,
    input_key: Option<String>,
    local_storage_dir: Option<String>,
    request_timeout_secs: Option<u64>,

    fail_on_error: Option<bool>,
}

fn default_ytdlp_path() -> String {
    std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.and_then(|s| {
        let s = s.trim().to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    })
}

impl AppConfig {
    /// Load from an optional TOML file, then apply `APIFY_*` environment overrides.
    ///
    /// With `path = None`, `config.toml` is read only when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let raw = match path {
            Some(path) => Some(fs::read_to_string(path).with_context(|| {
                format!("Failed to read config file: {}", path.display())
            })?),
            None => {
                let default = Path::new("config.toml");
                if default.exists() {
                    Some(fs::read_to_string(default).context("Failed to read config.toml")?)
                } else {
                    None
                }
            }
        };

        Self::from_sources(raw.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources(raw: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file: AppConfigFile = match raw {
            Some(raw) => toml::from_str(raw).context("Failed to parse config file")?,
            None => AppConfigFile::default(),
        };
        let env_var = |key: &str| non_empty(env(key));

        let api_token = env_var("APIFY_TOKEN").or(non_empty(file.api_token));
        let storage_backend = match non_empty(file.storage_backend)
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Some("platform") => StorageBackend::Platform,
            Some("local") => StorageBackend::Local,
            Some(other) => {
                return Err(anyhow!(
                    "Invalid storage_backend: {} (expected: platform|local)",
                    other
                ))
            }
            None if api_token.is_some() => StorageBackend::Platform,
            None => StorageBackend::Local,
        };

        let key_value_store_id =
            env_var("APIFY_DEFAULT_KEY_VALUE_STORE_ID").or(non_empty(file.key_value_store_id));
        let dataset_id = env_var("APIFY_DEFAULT_DATASET_ID").or(non_empty(file.dataset_id));

        if storage_backend == StorageBackend::Platform {
            if key_value_store_id.is_none() {
                return Err(anyhow!(
                    "storage_backend=platform requires key_value_store_id (or APIFY_DEFAULT_KEY_VALUE_STORE_ID)"
                ));
            }
            if dataset_id.is_none() {
                return Err(anyhow!(
                    "storage_backend=platform requires dataset_id (or APIFY_DEFAULT_DATASET_ID)"
                ));
            }
        }

        let api_base_url = env_var("APIFY_API_BASE_URL")
            .or(non_empty(file.api_base_url))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let public_base_url = env_var("APIFY_API_PUBLIC_BASE_URL")
            .or(non_empty(file.public_base_url))
            .unwrap_or_else(|| api_base_url.clone());

        let cfg = Self {
            temp_dir: PathBuf::from(non_empty(file.temp_dir).unwrap_or_else(|| "/tmp".to_string())),
            format: non_empty(file.format).unwrap_or_else(|| DEFAULT_FORMAT.to_string()),

            ytdlp_bin: PathBuf::from(non_empty(file.ytdlp_bin).unwrap_or_else(|| "yt-dlp".to_string())),
            ytdlp_path: non_empty(file.ytdlp_path).unwrap_or_else(default_ytdlp_path),
            ffmpeg_bin: non_empty(file.ffmpeg_bin).map(PathBuf::from),
            ytdlp_proxy: non_empty(file.ytdlp_proxy),
            inherit_proxy_env: file.inherit_proxy_env.unwrap_or(false),
            cookies_file: non_empty(file.cookies_file).map(PathBuf::from),
            quiet: file.quiet.unwrap_or(false),
            download_timeout_secs: file.download_timeout_secs.filter(|s| *s > 0),

            storage_backend,
            api_base_url,
            public_base_url,
            api_token,
            key_value_store_id: key_value_store_id.unwrap_or_else(|| "default".to_string()),
            dataset_id: dataset_id.unwrap_or_else(|| "default".to_string()),
            input_key: env_var("APIFY_INPUT_KEY")
                .or(non_empty(file.input_key))
                .unwrap_or_else(|| "INPUT".to_string()),
            local_storage_dir: PathBuf::from(
                env_var("APIFY_LOCAL_STORAGE_DIR")
                    .or(non_empty(file.local_storage_dir))
                    .unwrap_or_else(|| "./storage".to_string()),
            ),
            request_timeout_secs: file.request_timeout_secs.filter(|s| *s > 0),

            fail_on_error: file.fail_on_error.unwrap_or(false),
        };

        Ok(cfg)
    }
}
