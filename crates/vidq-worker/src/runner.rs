//! The task dispatch table.
//!
//! `TaskRunner` is the scheduler's [`JobRunner`]: it matches each task
//! variant exhaustively, verifies the context fields the task depends on,
//! calls the collaborator, and records the task's outputs back into the
//! context for the tasks that follow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use vidq_models::{Job, JobContext, TaskKind};
use vidq_queue::{JobRunner, TaskFailure, TaskProgress, TaskResult};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLog;
use crate::traits::{Analyzer, Downloader, Importer, MediaProcessor, ProgressFn, Transcriber};

const ANALYSIS_FILE: &str = "analysis.json";

/// Executes tasks against a set of collaborators.
pub struct TaskRunner {
    downloader: Arc<dyn Downloader>,
    importer: Arc<dyn Importer>,
    processor: Arc<dyn MediaProcessor>,
    transcriber: Arc<dyn Transcriber>,
    analyzer: Arc<dyn Analyzer>,
}

impl TaskRunner {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        importer: Arc<dyn Importer>,
        processor: Arc<dyn MediaProcessor>,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            downloader,
            importer,
            processor,
            transcriber,
            analyzer,
        }
    }

    /// The file the next task should operate on: the chained working path,
    /// falling back to resolving the library id.
    async fn working_path(&self, ctx: &JobContext, task: &'static str) -> WorkerResult<PathBuf> {
        if let Some(path) = &ctx.video_path {
            return Ok(path.clone());
        }
        if let Some(id) = &ctx.video_id {
            return self.importer.resolve(id).await;
        }
        Err(WorkerError::missing_context("video", task))
    }

    async fn execute(
        &self,
        job: &Job,
        task: &TaskKind,
        cancel: watch::Receiver<bool>,
        progress: ProgressFn,
    ) -> WorkerResult<JobContext> {
        let mut ctx = job.context.clone();

        match task {
            TaskKind::GetInfo => {
                let url = job
                    .url
                    .as_deref()
                    .ok_or_else(|| WorkerError::missing_context("url", "get-info"))?;
                let info = self.downloader.fetch_info(url).await?;
                info!(job_id = %job.id, title = %info.title, "Fetched video info");
                ctx.video_info = Some(info);
            }

            TaskKind::Download { quality, browser } => {
                let url = job
                    .url
                    .as_deref()
                    .ok_or_else(|| WorkerError::missing_context("url", "download"))?;
                let path = self
                    .downloader
                    .download(url, *quality, browser.clone(), cancel, progress)
                    .await?;
                ctx.video_path = Some(path);
            }

            TaskKind::Import => {
                let source = ctx
                    .video_path
                    .clone()
                    .ok_or_else(|| WorkerError::missing_context("video path", "import"))?;
                let (id, path) = self.importer.import(&source, ctx.video_info.clone()).await?;
                ctx.video_id = Some(id);
                ctx.video_path = Some(path);
            }

            TaskKind::FixAspectRatio => {
                let input = self.working_path(&ctx, "fix-aspect-ratio").await?;
                let output = self.processor.fix_aspect_ratio(&input, cancel, progress).await?;
                ctx.video_path = Some(output);
            }

            TaskKind::NormalizeAudio => {
                let input = self.working_path(&ctx, "normalize-audio").await?;
                let output = self.processor.normalize_audio(&input, cancel, progress).await?;
                ctx.video_path = Some(output);
            }

            TaskKind::ProcessVideo {
                fix_aspect,
                normalize_audio,
            } => {
                let input = self.working_path(&ctx, "process-video").await?;
                let output = self
                    .processor
                    .process(&input, *fix_aspect, *normalize_audio, cancel, progress)
                    .await?;
                ctx.video_path = Some(output);
            }

            TaskKind::Transcribe { model, language } => {
                let input = self.working_path(&ctx, "transcribe").await?;
                let raw = self
                    .transcriber
                    .transcribe(&input, *model, language.clone(), cancel, progress)
                    .await?;
                // Imported videos keep their transcript, and the subtitle
                // track whisper writes beside it, with the rest of their
                // library artifacts.
                ctx.transcript_path = Some(match &ctx.video_id {
                    Some(id) => {
                        let text = tokio::fs::read_to_string(&raw).await?;
                        let stored = self.importer.store_transcript(id, &text).await?;
                        let subtitles = raw.with_extension("srt");
                        if subtitles.exists() {
                            self.importer.store_subtitles(id, &subtitles).await?;
                        }
                        stored
                    }
                    None => raw,
                });
            }

            TaskKind::Analyze {
                provider,
                model,
                api_key,
            } => {
                let transcript = ctx
                    .transcript_path
                    .clone()
                    .ok_or_else(|| WorkerError::missing_context("transcript", "analyze"))?;
                let output = transcript
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(ANALYSIS_FILE);
                let title = ctx.video_info.as_ref().map(|i| i.title.clone());
                let path = self
                    .analyzer
                    .analyze(
                        &transcript,
                        *provider,
                        model,
                        api_key.clone(),
                        title,
                        &output,
                    )
                    .await?;
                ctx.analysis_path = Some(path);
            }
        }

        Ok(ctx)
    }
}

#[async_trait]
impl JobRunner for TaskRunner {
    async fn run_task(
        &self,
        job: Job,
        task: TaskKind,
        cancel: watch::Receiver<bool>,
        progress: TaskProgress,
    ) -> TaskResult {
        let log = TaskLog::new(&job.id, task.label());
        if *cancel.borrow() {
            log.skipped_cancelled();
            return Err(TaskFailure::new(WorkerError::Cancelled.to_string()));
        }

        log.started();
        let callback: ProgressFn = Arc::new(move |fraction| progress.update(fraction));
        match self.execute(&job, &task, cancel, callback).await {
            Ok(ctx) => {
                log.completed();
                Ok(ctx)
            }
            Err(err) => {
                log.failed(&err);
                Err(TaskFailure::new(err.to_string()))
            }
        }
    }
}
