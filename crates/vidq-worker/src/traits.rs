//! Collaborator seams for the task dispatch table.
//!
//! One trait per external capability, so the dispatch table can be tested
//! against mocks without yt-dlp, ffmpeg, whisper or a model endpoint on
//! the machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use vidq_models::{AnalysisProvider, Quality, TranscriptionModel, VideoId, VideoInfo};

use crate::error::WorkerResult;

/// Sub-task progress callback, completion fraction in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Fetches metadata and media for remote URLs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Probe metadata without downloading.
    async fn fetch_info(&self, url: &str) -> WorkerResult<VideoInfo>;

    /// Download the video, returning the local artifact path.
    async fn download(
        &self,
        url: &str,
        quality: Quality,
        browser: Option<String>,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf>;
}

/// Moves artifacts into the on-disk library and resolves them later.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Importer: Send + Sync {
    /// Import a file, returning the assigned id and its library path.
    async fn import(
        &self,
        source: &Path,
        info: Option<VideoInfo>,
    ) -> WorkerResult<(VideoId, PathBuf)>;

    /// Resolve a library video id to its media file.
    async fn resolve(&self, id: &VideoId) -> WorkerResult<PathBuf>;

    /// Persist a transcript for a library video, returning the stored path.
    async fn store_transcript(&self, id: &VideoId, text: &str) -> WorkerResult<PathBuf>;

    /// Persist a subtitle file for a library video, returning the stored
    /// path.
    async fn store_subtitles(&self, id: &VideoId, source: &Path) -> WorkerResult<PathBuf>;
}

/// FFmpeg-backed processing steps.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn fix_aspect_ratio(
        &self,
        input: &Path,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf>;

    async fn normalize_audio(
        &self,
        input: &Path,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf>;

    /// Combined aspect fix and loudness normalization.
    async fn process(
        &self,
        input: &Path,
        fix_aspect: bool,
        normalize: bool,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf>;
}

/// Produces a plain-text transcript for a media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        input: &Path,
        model: TranscriptionModel,
        language: Option<String>,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf>;
}

/// Runs AI analysis over a transcript, writing the report to `output`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyzer: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn analyze(
        &self,
        transcript: &Path,
        provider: AnalysisProvider,
        model: &str,
        api_key: Option<String>,
        title: Option<String>,
        output: &Path,
    ) -> WorkerResult<PathBuf>;
}
