//! FFmpeg command builder, runner and the processing operations built on it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Scale+pad filter producing a 16:9 1080p frame with pillarbox/letterbox
/// bars instead of stretching.
const ASPECT_FILTER: &str =
    "scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2,setsar=1";

/// Single-pass EBU R128 loudness normalization.
const LOUDNORM_FILTER: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before -i.
    input_args: Vec<String>,
    /// Arguments placed after -i.
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Progress information parsed from FFmpeg's `-progress pipe:2` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub fps: f64,
    /// Output time in milliseconds.
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime.
    pub speed: f64,
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Completion in `[0, 1]` given the total input duration.
    pub fn fraction(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 / total_duration_ms as f64).clamp(0.0, 1.0)
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command, reporting parsed progress through the callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        if let Some(cancel) = &self.cancel_rx {
            if *cancel.borrow() {
                return Err(MediaError::Cancelled);
            }
        }

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("stderr not captured", None, None)
        })?;
        let mut reader = BufReader::new(stderr).lines();

        let progress_handle = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(update) = parse_progress_line(&line, &mut current) {
                    progress(update);
                }
            }
        });

        let result = self.wait_for_completion(&mut child).await;

        let _ = progress_handle.await;

        result
    }

    /// Wait for the child, honoring cancellation and the optional timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let mut cancel_rx = self.cancel_rx.clone();
        let timeout_secs = self.timeout_secs;
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs.unwrap_or(u64::MAX)));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    if status.success() {
                        return Ok(());
                    }
                    return Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        None,
                        status.code(),
                    ));
                }
                _ = &mut deadline, if timeout_secs.is_some() => {
                    let secs = timeout_secs.unwrap_or_default();
                    warn!("FFmpeg timed out after {} seconds, killing process", secs);
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(secs));
                }
                changed = watch_cancelled(&mut cancel_rx) => {
                    if changed {
                        info!("FFmpeg cancelled, killing process");
                        let _ = child.kill().await;
                        return Err(MediaError::Cancelled);
                    }
                    // Sender dropped; stop watching.
                    cancel_rx = None;
                }
            }
        }
    }
}

/// Resolve to `true` once the flag flips. Resolves `false` when the sender
/// is gone.
pub(crate) async fn watch_cancelled(cancel_rx: &mut Option<watch::Receiver<bool>>) -> bool {
    match cancel_rx {
        Some(rx) => {
            if *rx.borrow_and_update() {
                return true;
            }
            loop {
                if rx.changed().await.is_err() {
                    return false;
                }
                if *rx.borrow_and_update() {
                    return true;
                }
            }
        }
        None => std::future::pending().await,
    }
}

/// Parse one line of FFmpeg's `-progress` output into the running state.
/// Returns an update to publish when a `progress=` record boundary is seen.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys carry microseconds in practice.
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                if let Some(speed_str) = value.strip_suffix('x') {
                    if let Ok(speed) = speed_str.parse() {
                        current.speed = speed;
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Video file information from FFprobe.
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    /// Duration in seconds.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    /// File size in bytes.
    pub size: u64,
}

impl ProbeInfo {
    pub fn duration_ms(&self) -> i64 {
        (self.duration * 1000.0) as i64
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<ProbeInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    Ok(ProbeInfo {
        duration: probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size: probe
            .format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

/// Re-encode to a 16:9 1080p frame, padding instead of stretching.
/// Audio is passed through untouched.
pub async fn fix_aspect_ratio<F>(
    input: impl AsRef<Path>,
    cancel: watch::Receiver<bool>,
    progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(f64) + Send + 'static,
{
    let input = input.as_ref();
    let cmd = |output: &Path| {
        FfmpegCommand::new(input, output)
            .video_filter(ASPECT_FILTER)
            .video_codec("libx264")
            .preset("medium")
            .crf(18)
            .audio_codec("copy")
    };
    run_processing(input, "16x9", cmd, cancel, progress).await
}

/// Normalize audio loudness with single-pass loudnorm. Video is copied.
pub async fn normalize_audio<F>(
    input: impl AsRef<Path>,
    cancel: watch::Receiver<bool>,
    progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(f64) + Send + 'static,
{
    let input = input.as_ref();
    let cmd = |output: &Path| {
        FfmpegCommand::new(input, output)
            .audio_filter(LOUDNORM_FILTER)
            .video_codec("copy")
            .audio_codec("aac")
            .output_arg("-b:a")
            .output_arg("192k")
    };
    run_processing(input, "norm", cmd, cancel, progress).await
}

/// Combined aspect-ratio fix and loudness normalization in one encode.
pub async fn process_video<F>(
    input: impl AsRef<Path>,
    fix_aspect: bool,
    normalize: bool,
    cancel: watch::Receiver<bool>,
    progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(f64) + Send + 'static,
{
    let input = input.as_ref();
    if !fix_aspect && !normalize {
        return Ok(input.to_path_buf());
    }
    if fix_aspect != normalize {
        return if fix_aspect {
            fix_aspect_ratio(input, cancel, progress).await
        } else {
            normalize_audio(input, cancel, progress).await
        };
    }
    let cmd = |output: &Path| {
        FfmpegCommand::new(input, output)
            .video_filter(ASPECT_FILTER)
            .audio_filter(LOUDNORM_FILTER)
            .video_codec("libx264")
            .preset("medium")
            .crf(18)
            .audio_codec("aac")
            .output_arg("-b:a")
            .output_arg("192k")
    };
    run_processing(input, "processed", cmd, cancel, progress).await
}

/// Encode into a `.part` sibling, then rename into place once FFmpeg exits
/// cleanly, so interrupted runs never leave a half-written output behind.
async fn run_processing<B, F>(
    input: &Path,
    suffix: &str,
    build: B,
    cancel: watch::Receiver<bool>,
    progress: F,
) -> MediaResult<PathBuf>
where
    B: Fn(&Path) -> FfmpegCommand,
    F: Fn(f64) + Send + 'static,
{
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let info = probe_video(input).await?;
    let total_ms = info.duration_ms();

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let output = parent.join(format!("{stem}_{suffix}.mp4"));
    let partial = parent.join(format!("{stem}_{suffix}.part.mp4"));

    let runner = FfmpegRunner::new().with_cancel(cancel);
    let result = runner
        .run_with_progress(&build(&partial), move |p| {
            progress(p.fraction(total_ms));
        })
        .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }

    tokio::fs::rename(&partial, &output).await?;
    info!(
        input = %input.display(),
        output = %output.display(),
        "Processed video"
    );
    Ok(output)
}
