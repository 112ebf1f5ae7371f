use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, trace};

use crate::config::DownloadConfig;

const WATCH_URL_BASE: &str = "https://www.youtube.com/watch";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to launch downloader at '{0}'")]
    ToolMissing(String),
    #[error("not a video URL or id: '{0}'")]
    InvalidUrl(String),
    #[error("downloader exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("downloader finished without reporting an output file")]
    NoOutput,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Fetches one video into a directory and returns the final file path.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &Url, target_dir: &Path) -> Result<PathBuf, DownloadError>;
}

fn video_id_pattern() -> &'static Regex {
    static VIDEO_ID: OnceLock<Regex> = OnceLock::new();
    VIDEO_ID.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static pattern is valid"))
}

/// Accepts an http(s) URL or a bare 11-character YouTube video id.
pub fn resolve_video_url(input: &str) -> Result<Url, DownloadError> {
    let trimmed = input.trim();

    if let Ok(url) = Url::parse(trimmed) {
        return match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(DownloadError::InvalidUrl(trimmed.to_string())),
        };
    }

    if video_id_pattern().is_match(trimmed) {
        return Url::parse_with_params(WATCH_URL_BASE, &[("v", trimmed)])
            .map_err(|_| DownloadError::InvalidUrl(trimmed.to_string()));
    }

    Err(DownloadError::InvalidUrl(trimmed.to_string()))
}

/// Drives the `yt-dlp` executable: best video at or below `max_height` plus
/// best audio, merged into one container by yt-dlp itself.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    executable: PathBuf,
    max_height: u32,
    merge_format: String,
}

impl YtDlpDownloader {
    pub fn from_config(config: &DownloadConfig) -> Self {
        let executable = config
            .executable
            .clone()
            .or_else(|| env::var_os("YTDLP").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("yt-dlp"));

        Self {
            executable,
            max_height: config.max_height,
            merge_format: config.merge_format.clone(),
        }
    }

    pub fn format_selector(&self) -> String {
        format!("bestvideo[height<={}]+bestaudio/best", self.max_height)
    }

    fn build_args(&self, url: &Url, target_dir: &Path) -> Vec<OsString> {
        vec![
            "--no-progress".into(),
            "--no-simulate".into(),
            "--print".into(),
            "after_move:filepath".into(),
            "-f".into(),
            self.format_selector().into(),
            "--merge-output-format".into(),
            self.merge_format.clone().into(),
            "--paths".into(),
            target_dir.as_os_str().to_owned(),
            "--output".into(),
            OUTPUT_TEMPLATE.into(),
            "--".into(),
            url.as_str().into(),
        ]
    }
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn download(&self, url: &Url, target_dir: &Path) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(target_dir).await?;

        info!("⬇️  Downloading {} into {}", url, target_dir.display());

        let output = Command::new(&self.executable)
            .kill_on_drop(true)
            .args(self.build_args(url, target_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    DownloadError::ToolMissing(self.executable.to_string_lossy().to_string())
                }
                _ => DownloadError::Io(err),
            })?;

        trace!("yt-dlp stderr: {}", String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(DownloadError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or(DownloadError::NoOutput)?;

        debug!("yt-dlp reported {}", path.display());
        Ok(path)
    }
}

/// Resolves `target`, downloads it into `target_dir` and logs the outcome.
/// Failures end up in the log only; the caller just sees `None`.
pub async fn fetch_and_report(
    downloader: &dyn MediaDownloader,
    target: &str,
    target_dir: &Path,
) -> Option<PathBuf> {
    let result = match resolve_video_url(target) {
        Ok(url) => downloader.download(&url, target_dir).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(path) => {
            info!("✅ Video downloaded successfully to {}", path.display());
            Some(path)
        }
        Err(err) => {
            error!("An error occurred: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubDownloader {
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaDownloader for StubDownloader {
        async fn download(&self, url: &Url, target_dir: &Path) -> Result<PathBuf, DownloadError> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(target_dir.join("Video.mp4"))
        }
    }

    fn downloader() -> YtDlpDownloader {
        YtDlpDownloader {
            executable: PathBuf::from("yt-dlp"),
            max_height: 1080,
            merge_format: "mp4".into(),
        }
    }

    #[test]
    fn bare_video_id_expands_to_watch_url() {
        let url = resolve_video_url("3GZa9x9vioQ").unwrap();
        assert_eq!(url.as_str(), "https://www.youtube.com/watch?v=3GZa9x9vioQ");
    }

    #[test]
    fn full_urls_pass_through() {
        let url = resolve_video_url(" https://www.youtube.com/watch?v=3GZa9x9vioQ ").unwrap();
        assert_eq!(url.as_str(), "https://www.youtube.com/watch?v=3GZa9x9vioQ");
    }

    #[test]
    fn rejects_non_http_and_garbage() {
        assert!(matches!(
            resolve_video_url("file:///etc/passwd"),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert!(matches!(
            resolve_video_url("not a video"),
            Err(DownloadError::InvalidUrl(_))
        ));
    }

    #[test]
    fn args_select_capped_height_and_merge_format() {
        let url = resolve_video_url("3GZa9x9vioQ").unwrap();
        let args = downloader().build_args(&url, Path::new("videos"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-f") + 1], "bestvideo[height<=1080]+bestaudio/best");
        assert_eq!(args[pos("--merge-output-format") + 1], "mp4");
        assert_eq!(args[pos("--paths") + 1], "videos");
        assert_eq!(args[pos("--output") + 1], "%(title)s.%(ext)s");
        assert_eq!(args.last().unwrap(), url.as_str());
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn configured_executable_wins() {
        let config = DownloadConfig {
            executable: Some(PathBuf::from("/opt/yt-dlp")),
            max_height: 720,
            ..DownloadConfig::default()
        };
        let downloader = YtDlpDownloader::from_config(&config);
        assert_eq!(downloader.executable, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(
            downloader.format_selector(),
            "bestvideo[height<=720]+bestaudio/best"
        );
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = YtDlpDownloader {
            executable: dir.path().join("no-such-yt-dlp"),
            ..downloader()
        };
        let url = resolve_video_url("3GZa9x9vioQ").unwrap();
        let err = downloader.download(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolMissing(_)));
    }

    #[tokio::test]
    async fn fetch_and_report_returns_downloaded_path() {
        let stub = StubDownloader::default();
        let path = fetch_and_report(&stub, "3GZa9x9vioQ", Path::new("videos")).await;
        assert_eq!(path, Some(PathBuf::from("videos/Video.mp4")));
        assert_eq!(
            *stub.requested.lock().unwrap(),
            vec!["https://www.youtube.com/watch?v=3GZa9x9vioQ".to_string()]
        );
    }

    #[tokio::test]
    async fn fetch_and_report_swallows_invalid_url() {
        let stub = StubDownloader::default();
        let path = fetch_and_report(&stub, "not a video", Path::new("videos")).await;
        assert_eq!(path, None);
        assert!(stub.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_and_report_swallows_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = YtDlpDownloader {
            executable: dir.path().join("no-such-yt-dlp"),
            ..downloader()
        };
        let path = fetch_and_report(&downloader, "3GZa9x9vioQ", dir.path()).await;
        assert_eq!(path, None);
    }
}
