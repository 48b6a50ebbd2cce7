//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A task needs something an earlier task never put into the context.
    #[error("No {what} available for {task}")]
    MissingContext {
        what: &'static str,
        task: &'static str,
    },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Import failed: {0}")]
    ImportFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] vidq_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vidq_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn missing_context(what: &'static str, task: &'static str) -> Self {
        Self::MissingContext { what, task }
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
