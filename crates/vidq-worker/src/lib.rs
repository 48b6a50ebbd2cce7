//! The task executor: collaborator seams, the dispatch table behind the
//! queue's `JobRunner`, production collaborators and worker configuration.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
pub mod traits;

pub use collaborators::{
    FfmpegProcessor, LibraryImporter, ModelAnalyzer, WhisperTranscriber, YtDlpDownloader,
};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::TaskLog;
pub use runner::TaskRunner;
pub use traits::{Analyzer, Downloader, Importer, MediaProcessor, ProgressFn, Transcriber};
