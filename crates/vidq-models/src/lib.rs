//! Shared data models for the vidq backend.
//!
//! Everything the queue, the task runner and the collaborators agree on
//! lives here: jobs and their lifecycle, the task vocabulary, the shared
//! per-job context, and video metadata.

mod job;
mod status;
mod task;
mod video;

pub use job::{Job, JobContext, JobId, JobSpec, JobSpecError, QueueClass};
pub use status::{DisplayStatus, JobStatus, TransitionError};
pub use task::{AnalysisProvider, Quality, TaskKind, TranscriptionModel};
pub use video::{VideoId, VideoInfo};
