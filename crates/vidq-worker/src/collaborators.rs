//! Production collaborators backed by the media crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;

use vidq_media::{HttpAnalyzer, Library};
use vidq_models::{AnalysisProvider, Quality, TranscriptionModel, VideoId, VideoInfo};

use crate::error::WorkerResult;
use crate::traits::{Analyzer, Downloader, Importer, MediaProcessor, ProgressFn, Transcriber};

/// yt-dlp against a working directory.
pub struct YtDlpDownloader {
    work_dir: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch_info(&self, url: &str) -> WorkerResult<VideoInfo> {
        Ok(vidq_media::fetch_info(url).await?)
    }

    async fn download(
        &self,
        url: &str,
        quality: Quality,
        browser: Option<String>,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf> {
        let path = vidq_media::download_video(
            url,
            quality,
            browser.as_deref(),
            &self.work_dir,
            cancel,
            move |fraction| progress(fraction),
        )
        .await?;
        Ok(path)
    }
}

/// Importer over the on-disk library.
pub struct LibraryImporter {
    library: Library,
}

impl LibraryImporter {
    pub fn new(library: Library) -> Self {
        Self { library }
    }
}

#[async_trait]
impl Importer for LibraryImporter {
    async fn import(
        &self,
        source: &Path,
        info: Option<VideoInfo>,
    ) -> WorkerResult<(VideoId, PathBuf)> {
        Ok(self.library.import(source, info.as_ref()).await?)
    }

    async fn resolve(&self, id: &VideoId) -> WorkerResult<PathBuf> {
        Ok(self.library.resolve(id).await?)
    }

    async fn store_transcript(&self, id: &VideoId, text: &str) -> WorkerResult<PathBuf> {
        Ok(self.library.store_transcript(id, text).await?)
    }

    async fn store_subtitles(&self, id: &VideoId, source: &Path) -> WorkerResult<PathBuf> {
        Ok(self.library.store_subtitles(id, source).await?)
    }
}

/// FFmpeg-backed processor.
#[derive(Default)]
pub struct FfmpegProcessor;

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn fix_aspect_ratio(
        &self,
        input: &Path,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf> {
        Ok(vidq_media::fix_aspect_ratio(input, cancel, move |f| progress(f)).await?)
    }

    async fn normalize_audio(
        &self,
        input: &Path,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf> {
        Ok(vidq_media::normalize_audio(input, cancel, move |f| progress(f)).await?)
    }

    async fn process(
        &self,
        input: &Path,
        fix_aspect: bool,
        normalize: bool,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf> {
        Ok(
            vidq_media::process_video(input, fix_aspect, normalize, cancel, move |f| progress(f))
                .await?,
        )
    }
}

/// whisper CLI transcriber writing into the work directory.
pub struct WhisperTranscriber {
    work_dir: PathBuf,
}

impl WhisperTranscriber {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        input: &Path,
        model: TranscriptionModel,
        language: Option<String>,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<PathBuf> {
        let path = vidq_media::transcribe(
            input,
            model,
            language.as_deref(),
            &self.work_dir,
            cancel,
            move |fraction| progress(fraction),
        )
        .await?;
        Ok(path)
    }
}

/// HTTP model analyzer, reading the transcript from disk.
pub struct ModelAnalyzer {
    inner: HttpAnalyzer,
}

impl ModelAnalyzer {
    pub fn new(inner: HttpAnalyzer) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Analyzer for ModelAnalyzer {
    async fn analyze(
        &self,
        transcript: &Path,
        provider: AnalysisProvider,
        model: &str,
        api_key: Option<String>,
        title: Option<String>,
        output: &Path,
    ) -> WorkerResult<PathBuf> {
        let text = tokio::fs::read_to_string(transcript).await?;
        let path = self
            .inner
            .analyze_to_file(
                provider,
                model,
                api_key.as_deref(),
                &text,
                title.as_deref(),
                output,
            )
            .await?;
        Ok(path)
    }
}
