//! Audio transcription with the whisper CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info};

use vidq_models::TranscriptionModel;

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::{probe_video, watch_cancelled};

/// Transcribe a media file into `output_dir`, returning the plain-text
/// transcript path. Whisper is asked for every output format, so an `.srt`
/// subtitle track lands next to the returned file.
///
/// Whisper prints each decoded segment with its timestamps; those are
/// mapped against the input duration into a completion fraction for the
/// progress callback.
pub async fn transcribe<F>(
    input: impl AsRef<Path>,
    model: TranscriptionModel,
    language: Option<&str>,
    output_dir: impl AsRef<Path>,
    cancel: watch::Receiver<bool>,
    progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(f64) + Send + 'static,
{
    let input = input.as_ref();
    let output_dir = output_dir.as_ref();

    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }
    which::which("whisper").map_err(|_| MediaError::WhisperNotFound)?;
    tokio::fs::create_dir_all(output_dir).await?;

    // Duration is only needed to scale progress; a failed probe just means
    // no sub-task progress.
    let duration_secs = probe_video(input)
        .await
        .map(|info| info.duration)
        .unwrap_or(0.0);

    let input_str = input.to_string_lossy().to_string();
    let output_dir_str = output_dir.to_string_lossy().to_string();
    let mut args = vec![
        input_str.as_str(),
        "--model",
        model.as_str(),
        "--output_format",
        "all",
        "--output_dir",
        output_dir_str.as_str(),
        "--fp16",
        "False",
    ];
    if let Some(language) = language {
        args.push("--language");
        args.push(language);
    }

    info!(
        input = %input.display(),
        model = model.as_str(),
        "Transcribing with whisper"
    );

    let mut child = Command::new("whisper")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::transcription_failed("stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| MediaError::transcription_failed("stderr not captured"))?;

    let stderr_handle = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut cancel_rx = Some(cancel);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Some(end_secs) = parse_segment_end(&line) {
                            if duration_secs > 0.0 {
                                progress((end_secs / duration_secs).clamp(0.0, 1.0));
                            }
                        }
                    }
                    None => break,
                }
            }
            cancelled = watch_cancelled(&mut cancel_rx) => {
                if cancelled {
                    info!(input = %input.display(), "Transcription cancelled, killing whisper");
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
        debug!("whisper stderr: {}", stderr);
        return Err(MediaError::transcription_failed(format!(
            "whisper exited with {}",
            status.code().unwrap_or(-1)
        )));
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "transcript".to_string());
    let transcript = output_dir.join(format!("{stem}.txt"));
    if !transcript.exists() {
        return Err(MediaError::transcription_failed(
            "whisper produced no transcript file",
        ));
    }

    info!(transcript = %transcript.display(), "Transcription complete");
    Ok(transcript)
}

/// Parse the end timestamp (in seconds) from a whisper segment line, e.g.
/// `[01:10.000 --> 01:14.500]  and that is why ...`.
fn parse_segment_end(line: &str) -> Option<f64> {
    let line = line.trim();
    let inner = line.strip_prefix('[')?;
    let (range, _) = inner.split_once(']')?;
    let (_, end) = range.split_once("-->")?;
    parse_timestamp(end.trim())
}

/// Parse `MM:SS.mmm` or `HH:MM:SS.mmm` into seconds.
fn parse_timestamp(ts: &str) -> Option<f64> {
    let parts: Vec<&str> = ts.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [h, m, s] => (
            h.parse::<f64>().ok()?,
            m.parse::<f64>().ok()?,
            s.parse::<f64>().ok()?,
        ),
        _ => return None,
    };
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
