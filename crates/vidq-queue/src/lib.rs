//! In-memory job queue and task-pipeline scheduler.
//!
//! Two queue instances (batch and analysis) each own an ordered job table,
//! a concurrency ceiling and a scheduling loop. Task execution is reached
//! through the [`JobRunner`] seam so this crate never touches yt-dlp,
//! ffmpeg or any other collaborator directly.

mod config;
mod error;
mod manager;
mod progress;
mod queue;
mod runner;

pub use config::{QueueConfig, ANALYSIS_CONCURRENCY};
pub use error::{QueueError, QueueResult};
pub use manager::{QueueManager, QueueStatus};
pub use progress::{BroadcastSink, ProgressEvent, ProgressSink, TracingSink};
pub use queue::Queue;
pub use runner::{JobRunner, TaskFailure, TaskProgress, TaskResult, TaskTick};
