//! Video download and metadata probing with yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vidq_models::{Quality, VideoInfo};

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::watch_cancelled;

/// yt-dlp format selector for a quality ceiling.
fn format_for(quality: Quality) -> &'static str {
    match quality {
        Quality::Best => "bestvideo+bestaudio/best",
        Quality::P2160 => "bestvideo[height<=2160]+bestaudio/best[height<=2160]",
        Quality::P1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
        Quality::P720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
        Quality::P480 => "bestvideo[height<=480]+bestaudio/best[height<=480]",
    }
}

/// Subset of `yt-dlp -J` output we care about.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

/// Fetch video metadata without downloading.
///
/// Runs `yt-dlp -J --no-playlist` and maps the JSON blob to [`VideoInfo`].
pub async fn fetch_info(url: &str) -> MediaResult<VideoInfo> {
    if !check_url(url) {
        return Err(MediaError::download_failed(format!(
            "unsupported URL '{url}'"
        )));
    }
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;

    debug!(url = %url, "Probing video metadata with yt-dlp");

    let output = Command::new("yt-dlp")
        .args(["-J", "--no-playlist", url])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::download_failed(format!(
            "yt-dlp -J failed: {}",
            last_error_line(&stderr)
        )));
    }

    let info: YtDlpInfo = serde_json::from_slice(&output.stdout)?;

    Ok(VideoInfo {
        title: info.title.unwrap_or_else(|| "Unknown".to_string()),
        uploader: info.uploader.or(info.channel),
        duration: info.duration,
        thumbnail: info.thumbnail,
    })
}

/// Download a video into `work_dir` using yt-dlp.
///
/// Progress percentages from `--newline` output are forwarded to the
/// callback as a fraction in `[0, 1]`. The returned path is the final
/// artifact (the merge target when video and audio are fetched separately).
pub async fn download_video<F>(
    url: &str,
    quality: Quality,
    browser: Option<&str>,
    work_dir: impl AsRef<Path>,
    cancel: watch::Receiver<bool>,
    progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(f64) + Send + 'static,
{
    let work_dir = work_dir.as_ref();
    if !check_url(url) {
        return Err(MediaError::download_failed(format!(
            "unsupported URL '{url}'"
        )));
    }
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;
    tokio::fs::create_dir_all(work_dir).await?;

    let template = work_dir.join("%(title)s [%(id)s].%(ext)s");
    let template = template.to_string_lossy().to_string();

    let mut args = vec![
        "--newline",
        "--no-playlist",
        "--no-warnings",
        "-f",
        format_for(quality),
        "--merge-output-format",
        "mp4",
        "-o",
        &template,
    ];
    if let Some(browser) = browser {
        args.push("--cookies-from-browser");
        args.push(browser);
    }
    args.push(url);

    info!(url = %url, quality = ?quality, "Downloading video");

    let mut child = Command::new("yt-dlp")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::download_failed("stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| MediaError::download_failed("stderr not captured"))?;

    // Drain stderr off to the side for the failure message.
    let stderr_handle = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut cancel_rx = Some(cancel);
    let mut artifact: Option<PathBuf> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Some(path) = parse_artifact_path(&line) {
                            artifact = Some(path);
                        } else if let Some(percent) = parse_download_percent(&line) {
                            progress((percent / 100.0).clamp(0.0, 1.0));
                        }
                    }
                    None => break,
                }
            }
            cancelled = watch_cancelled(&mut cancel_rx) => {
                if cancelled {
                    info!(url = %url, "Download cancelled, killing yt-dlp");
                    let _ = child.kill().await;
                    let _ = stderr_handle.await;
                    return Err(MediaError::Cancelled);
                }
                cancel_rx = None;
            }
        }
    }

    let status = child.wait().await?;
    let stderr = stderr_handle.await.unwrap_or_default();

    if !status.success() {
        debug!("yt-dlp stderr: {}", stderr);
        return Err(MediaError::download_failed(format!(
            "yt-dlp exited with {}: {}",
            status.code().unwrap_or(-1),
            last_error_line(&stderr)
        )));
    }

    let path = artifact
        .ok_or_else(|| MediaError::download_failed("yt-dlp reported no output file"))?;
    if !path.exists() {
        return Err(MediaError::FileNotFound(path));
    }

    let size = path.metadata()?.len();
    info!(
        output = %path.display(),
        size_mb = size as f64 / (1024.0 * 1024.0),
        "Downloaded video"
    );

    Ok(path)
}

/// Pull the output path out of a yt-dlp status line.
///
/// The merge target wins over the per-stream destinations, so callers can
/// keep the last path seen.
fn parse_artifact_path(line: &str) -> Option<PathBuf> {
    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return Some(PathBuf::from(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into ") {
        return Some(PathBuf::from(rest.trim().trim_matches('"')));
    }
    if line.starts_with("[download] ") && line.ends_with(" has already been downloaded") {
        let path = line
            .trim_start_matches("[download] ")
            .trim_end_matches(" has already been downloaded");
        return Some(PathBuf::from(path));
    }
    None
}

/// Extract the percentage from a `--newline` progress line, e.g.
/// `[download]  42.3% of 100.00MiB at 5.00MiB/s ETA 00:12`.
fn parse_download_percent(line: &str) -> Option<f64> {
    let rest = line.strip_prefix("[download]")?;
    let token = rest.split_whitespace().next()?;
    let percent = token.strip_suffix('%')?;
    percent.parse().ok()
}

fn last_error_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("Unknown error")
}

/// Gate for URLs yt-dlp would reject outright; the downloader refuses them
/// before spawning a process.
pub fn check_url(url: &str) -> bool {
    let ok = url.starts_with("http://") || url.starts_with("https://");
    if !ok {
        warn!(url = %url, "URL does not look like an http(s) link");
    }
    ok
}
