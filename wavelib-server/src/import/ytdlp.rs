//! yt-dlp process driver
//!
//! Metadata comes from `yt-dlp -J`; the audio transfer runs `yt-dlp -x`
//! with a machine-readable progress template on stdout. The process is
//! killed if the future driving it is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wavelib_common::config::DownloaderConfig;

use super::fetcher::{FetchError, MediaFetcher, VideoInfo};
use crate::library::store::DOWNLOADER_BINARY_NAME;
use crate::resolver::VideoId;

/// Latest release of the standalone binary
const RELEASE_URL: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp";

/// Prefix of progress lines printed through `--progress-template`
const PROGRESS_PREFIX: &str = "WAVELIB_PROGRESS|";

const PROGRESS_TEMPLATE: &str = "download:WAVELIB_PROGRESS|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s";

/// `MediaFetcher` backed by the yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch_info(&self, id: &VideoId) -> Result<VideoInfo, FetchError> {
        let output = Command::new(&self.binary)
            .args(["-J", "--skip-download", "--no-playlist", "--no-warnings", "--"])
            .arg(id.as_str())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Process(last_line(&stderr, "metadata lookup failed")));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn download(
        &self,
        id: &VideoId,
        output: &Path,
        progress: mpsc::UnboundedSender<f64>,
    ) -> Result<(), FetchError> {
        // yt-dlp names the final file from the template after transcoding
        let template = output.with_extension("%(ext)s");

        let mut child = Command::new(&self.binary)
            .args(["-x", "--audio-format", "wav"])
            .args(["--no-playlist", "--no-warnings", "--newline", "--progress"])
            .arg("--progress-template")
            .arg(PROGRESS_TEMPLATE)
            .arg("--output")
            .arg(&template)
            .arg("--")
            .arg(id.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Process("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Process("stderr not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = None;
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!("yt-dlp: {}", trimmed);
                    last = Some(trimmed.to_string());
                }
            }
            last
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(fraction) = parse_progress_line(&line) {
                // Receiver gone means nobody forwards progress any more
                let _ = progress.send(fraction);
            } else if !line.trim().is_empty() {
                debug!("yt-dlp: {}", line.trim());
            }
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.ok().flatten();

        if !status.success() {
            return Err(FetchError::Process(
                stderr_tail.unwrap_or_else(|| format!("yt-dlp exited with {}", status)),
            ));
        }
        Ok(())
    }
}

/// Parse `WAVELIB_PROGRESS|<downloaded>|<total>|<estimate>` into a fraction
///
/// Missing values are printed as `NA` by yt-dlp.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split('|').map(|f| f.trim().parse::<f64>().ok());

    let downloaded = fields.next().flatten()?;
    let total = fields.next().flatten();
    let estimate = fields.next().flatten();
    let total = total.or(estimate).filter(|t| *t > 0.0)?;

    Some((downloaded / total).clamp(0.0, 1.0))
}

fn last_line(output: &str, fallback: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Pick the downloader binary, installing it into the library folder if needed
///
/// An explicit binary from the config always wins. Otherwise the binary
/// lives in the library folder; when it is missing and `auto_install` is
/// off, `yt-dlp` is looked up on `PATH`.
pub async fn ensure_binary(
    config: &DownloaderConfig,
    library_root: &Path,
) -> Result<PathBuf, FetchError> {
    if let Some(binary) = &config.binary {
        return Ok(binary.clone());
    }

    let local = library_root.join(DOWNLOADER_BINARY_NAME);
    if tokio::fs::try_exists(&local).await.unwrap_or(false) {
        return Ok(local);
    }

    if !config.auto_install {
        warn!(
            "No downloader in {}, relying on '{}' from PATH",
            library_root.display(),
            DOWNLOADER_BINARY_NAME
        );
        return Ok(PathBuf::from(DOWNLOADER_BINARY_NAME));
    }

    info!("Installing yt-dlp into {}", local.display());
    install_release(&local).await?;
    Ok(local)
}

async fn install_release(target: &Path) -> Result<(), FetchError> {
    let response = reqwest::get(RELEASE_URL)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| FetchError::Install(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Install(e.to_string()))?;

    let partial = target.with_extension("part");
    tokio::fs::write(&partial, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755)).await?;
    }

    tokio::fs::rename(&partial, target).await?;
    info!("yt-dlp installed ({} bytes)", bytes.len());
    Ok(())
}
