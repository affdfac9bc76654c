use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, log, warn, Level};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::AppConfig;

const STDERR_TAIL_LINES: usize = 50;

type TailBuf = Arc<AsyncMutex<VecDeque<String>>>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to start yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed waiting for yt-dlp: {0}")]
    Wait(#[source] std::io::Error),

    #[error("yt-dlp exited with error (status={status}): {stderr_tail}")]
    Failed {
        status: ExitStatus,
        stderr_tail: String,
    },

    #[error("yt-dlp did not finish within {0}s")]
    TimedOut(u64),
}

/// Fetches a video into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str, out_path: &Path) -> Result<(), DownloadError>;
}

/// Runs the `yt-dlp` executable.
pub struct YtDlp {
    config: Arc<AppConfig>,
}

impl YtDlp {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    fn find_ffmpeg(&self) -> Option<String> {
        if let Some(p) = &self.config.ffmpeg_bin {
            return Some(p.to_string_lossy().to_string());
        }
        for p in ["/usr/local/bin/ffmpeg", "/usr/bin/ffmpeg", "/opt/homebrew/bin/ffmpeg"] {
            if Path::new(p).exists() {
                return Some(p.to_string());
            }
        }
        None
    }

    fn build_command(&self, url: &str, out_path: &Path) -> Command {
        let cfg = self.config.as_ref();
        let mut cmd = Command::new(&cfg.ytdlp_bin);
        cmd.env("PATH", &cfg.ytdlp_path);

        if !cfg.inherit_proxy_env {
            // A stale shell proxy would otherwise leak into every download.
            cmd.env_remove("http_proxy")
                .env_remove("https_proxy")
                .env_remove("HTTP_PROXY")
                .env_remove("HTTPS_PROXY")
                .env_remove("no_proxy")
                .env_remove("NO_PROXY");
        }

        if let Some(p) = &cfg.ytdlp_proxy {
            cmd.arg("--proxy").arg(p);
        }
        if let Some(cookies) = &cfg.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(ffmpeg) = self.find_ffmpeg() {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        if cfg.quiet {
            cmd.arg("--quiet");
        }

        cmd.arg("--newline")
            .arg("--no-playlist")
            .arg("--no-cache-dir")
            .arg("--no-part")
            .arg("-f")
            .arg(&cfg.format)
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("-o")
            .arg(out_path)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

/// Log every line of `reader` until EOF, keeping the last lines in `tail` when given.
///
/// Invalid UTF-8 is replaced rather than ending the read, so the pipe always drains.
async fn collect_lines<R>(reader: R, level: Level, tail: Option<TailBuf>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut r = BufReader::new(reader);
    let mut raw = Vec::new();
    let mut count = 0;
    loop {
        raw.clear();
        match r.read_until(b'\n', &mut raw).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        count += 1;
        log!(level, "[YT-DLP] {}", line);
        if let Some(buf) = &tail {
            let mut g = buf.lock().await;
            if g.len() >= STDERR_TAIL_LINES {
                g.pop_front();
            }
            g.push_back(line);
        }
    }
    count
}

async fn render_tail(buf: &AsyncMutex<VecDeque<String>>) -> String {
    let g = buf.lock().await;
    if g.is_empty() {
        return "no stderr output captured".to_string();
    }
    g.iter().cloned().collect::<Vec<_>>().join("\n")
}

#[async_trait]
impl Downloader for YtDlp {
    async fn download(&self, url: &str, out_path: &Path) -> Result<(), DownloadError> {
        let mut child = self
            .build_command(url, out_path)
            .spawn()
            .map_err(DownloadError::Spawn)?;
        if let Some(pid) = child.id() {
            info!("[DOWNLOAD] yt-dlp started (pid={})", pid);
        }

        let tail_buf: TailBuf = Arc::new(AsyncMutex::new(VecDeque::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(collect_lines(stdout, Level::Info, None)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_lines(stderr, Level::Warn, Some(tail_buf.clone()))));

        let waited = match self.config.download_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait())
                .await
                .map_err(|_| secs),
            None => Ok(child.wait().await),
        };
        let status = match waited {
            Ok(res) => res.map_err(DownloadError::Wait)?,
            Err(secs) => {
                warn!("[DOWNLOAD] yt-dlp timed out after {}s, killing", secs);
                if let Err(e) = child.kill().await {
                    warn!("[DOWNLOAD] Failed to kill yt-dlp: {}", e);
                }
                return Err(DownloadError::TimedOut(secs));
            }
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if !status.success() {
            return Err(DownloadError::Failed {
                status,
                stderr_tail: render_tail(&tail_buf).await,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn config(raw: &str) -> Arc<AppConfig> {
        Arc::new(AppConfig::from_sources(Some(raw), |_| None).unwrap())
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn env_of<'a>(cmd: &'a Command, key: &str) -> Option<Option<&'a OsStr>> {
        cmd.as_std()
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .map(|(_, v)| v)
    }

    #[test]
    fn command_requests_mp4_at_output_path() {
        let ytdlp = YtDlp::new(config(
            r#"
            ytdlp_bin = "/opt/yt-dlp"
            ytdlp_path = "/opt/bin:/usr/bin"
            ffmpeg_bin = "/opt/ffmpeg"
            "#,
        ));
        let cmd = ytdlp.build_command(
            "https://www.youtube.com/watch?v=abc123",
            &PathBuf::from("/tmp/abc123.mp4"),
        );
        let a = args(&cmd);

        assert_eq!(cmd.as_std().get_program(), OsStr::new("/opt/yt-dlp"));
        assert_eq!(env_of(&cmd, "PATH"), Some(Some(OsStr::new("/opt/bin:/usr/bin"))));

        let fmt = a.iter().position(|x| x == "-f").unwrap();
        assert_eq!(a[fmt + 1], crate::config::DEFAULT_FORMAT);
        let merge = a.iter().position(|x| x == "--merge-output-format").unwrap();
        assert_eq!(a[merge + 1], "mp4");
        let out = a.iter().position(|x| x == "-o").unwrap();
        assert_eq!(a[out + 1], "/tmp/abc123.mp4");
        let ffmpeg = a.iter().position(|x| x == "--ffmpeg-location").unwrap();
        assert_eq!(a[ffmpeg + 1], "/opt/ffmpeg");
        assert!(a.contains(&"--no-playlist".to_string()));
        assert!(a.contains(&"--newline".to_string()));
        assert!(!a.contains(&"--quiet".to_string()));
        assert_eq!(a.last().unwrap(), "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn proxy_env_is_stripped_unless_inherited() {
        let cmd = YtDlp::new(config("")).build_command("u", Path::new("/tmp/x.mp4"));
        assert_eq!(env_of(&cmd, "https_proxy"), Some(None));
        assert_eq!(env_of(&cmd, "HTTP_PROXY"), Some(None));

        let cmd = YtDlp::new(config("inherit_proxy_env = true"))
            .build_command("u", Path::new("/tmp/x.mp4"));
        assert_eq!(env_of(&cmd, "https_proxy"), None);
    }

    #[test]
    fn optional_flags_follow_config() {
        let cmd = YtDlp::new(config(
            r#"
            ytdlp_proxy = "socks5://127.0.0.1:7890"
            cookies_file = "/etc/yt/cookies.txt"
            quiet = true
            "#,
        ))
        .build_command("u", Path::new("/tmp/x.mp4"));
        let a = args(&cmd);

        let proxy = a.iter().position(|x| x == "--proxy").unwrap();
        assert_eq!(a[proxy + 1], "socks5://127.0.0.1:7890");
        let cookies = a.iter().position(|x| x == "--cookies").unwrap();
        assert_eq!(a[cookies + 1], "/etc/yt/cookies.txt");
        assert!(a.contains(&"--quiet".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let ytdlp = YtDlp::new(config(r#"ytdlp_bin = "/nonexistent/yt-dlp-binary""#));
        let err = ytdlp
            .download("https://youtu.be/abc123", Path::new("/tmp/never.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Spawn(_)));
    }

    #[tokio::test]
    async fn tail_keeps_last_lines() {
        let buf = AsyncMutex::new(VecDeque::new());
        assert_eq!(render_tail(&buf).await, "no stderr output captured");

        buf.lock().await.extend(["ERROR: one".to_string(), "ERROR: two".to_string()]);
        assert_eq!(render_tail(&buf).await, "ERROR: one\nERROR: two");
    }

    #[tokio::test]
    async fn collector_replaces_invalid_utf8_and_keeps_reading() {
        let tail: TailBuf = Arc::new(AsyncMutex::new(VecDeque::new()));
        let input: &[u8] = b"first\n\xff\xfe broken\r\n\nlast";

        let n = collect_lines(input, Level::Warn, Some(tail.clone())).await;

        assert_eq!(n, 3);
        let g = tail.lock().await;
        assert_eq!(g[0], "first");
        assert_eq!(g[1], "\u{FFFD}\u{FFFD} broken");
        assert_eq!(g[2], "last");
    }

    #[tokio::test]
    async fn collector_keeps_only_the_last_lines() {
        let tail: TailBuf = Arc::new(AsyncMutex::new(VecDeque::new()));
        let input: String = (0..STDERR_TAIL_LINES + 5).map(|i| format!("line {}\n", i)).collect();

        collect_lines(input.as_bytes(), Level::Warn, Some(tail.clone())).await;

        let g = tail.lock().await;
        assert_eq!(g.len(), STDERR_TAIL_LINES);
        assert_eq!(g.front().map(String::as_str), Some("line 5"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;
        use tempfile::TempDir;

        /// A stand-in `yt-dlp` that ignores its arguments and runs `body`.
        fn fake_ytdlp(dir: &TempDir, body: &str, extra_config: &str) -> YtDlp {
            let bin = dir.path().join("yt-dlp");
            std::fs::write(&bin, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
            YtDlp::new(config(&format!(
                "ytdlp_bin = {:?}\n{}",
                bin.display().to_string(),
                extra_config
            )))
        }

        #[tokio::test]
        async fn stdout_reaches_the_collector() {
            let dir = TempDir::new().unwrap();
            let ytdlp = fake_ytdlp(
                &dir,
                "echo '[youtube] abc123: Downloading webpage'\necho '[download] 100% of 1.00MiB'",
                "",
            );

            let mut child = ytdlp
                .build_command("https://youtu.be/abc123", &dir.path().join("abc123.mp4"))
                .spawn()
                .unwrap();
            let stdout = child.stdout.take().expect("stdout is piped");
            let tail: TailBuf = Arc::new(AsyncMutex::new(VecDeque::new()));

            let n = collect_lines(stdout, Level::Info, Some(tail.clone())).await;
            assert!(child.wait().await.unwrap().success());

            assert_eq!(n, 2);
            assert_eq!(
                render_tail(&tail).await,
                "[youtube] abc123: Downloading webpage\n[download] 100% of 1.00MiB"
            );
        }

        #[tokio::test]
        async fn zero_exit_is_success() {
            let dir = TempDir::new().unwrap();
            let ytdlp = fake_ytdlp(&dir, "echo progress\necho 'WARNING: slow' >&2\nexit 0", "");

            ytdlp
                .download("https://youtu.be/abc123", &dir.path().join("abc123.mp4"))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn nonzero_exit_reports_status_and_stderr_tail() {
            let dir = TempDir::new().unwrap();
            let ytdlp = fake_ytdlp(
                &dir,
                "echo '[youtube] abc123: Downloading webpage'\necho 'ERROR: nope' >&2\nexit 3",
                "",
            );

            let err = ytdlp
                .download("https://youtu.be/abc123", &dir.path().join("abc123.mp4"))
                .await
                .unwrap_err();

            match err {
                DownloadError::Failed { status, stderr_tail } => {
                    assert_eq!(status.code(), Some(3));
                    assert_eq!(stderr_tail, "ERROR: nope");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn slow_download_is_killed_at_timeout() {
            let dir = TempDir::new().unwrap();
            let ytdlp = fake_ytdlp(&dir, "exec sleep 30", "download_timeout_secs = 1");

            let started = Instant::now();
            let err = ytdlp
                .download("https://youtu.be/abc123", &dir.path().join("abc123.mp4"))
                .await
                .unwrap_err();

            assert!(matches!(err, DownloadError::TimedOut(1)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
