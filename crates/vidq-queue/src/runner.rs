//! The seam between the scheduler and task execution.
//!
//! The queue drives jobs through an implementation of [`JobRunner`]; the
//! worker crate supplies the dispatch table behind it. Keeping the trait
//! here means the scheduler compiles without any collaborator code.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use vidq_models::{Job, JobContext, TaskKind};

/// Failure of a single task, recorded verbatim as the job's error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of one task: the updated job context on success, or a failure
/// that terminates the job.
pub type TaskResult = Result<JobContext, TaskFailure>;

/// A sub-task progress report from a collaborator.
#[derive(Debug, Clone)]
pub struct TaskTick {
    /// Completion of the current task in `[0, 1]`.
    pub fraction: f64,
    pub message: Option<String>,
}

/// Handle a task uses to report sub-task progress (download percent,
/// transcription position) back to the scheduler.
///
/// Reports are advisory: they refine the job's displayed progress within
/// the current task's slice and never influence scheduling.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    tx: mpsc::UnboundedSender<TaskTick>,
}

impl TaskProgress {
    /// Create a handle together with the receiving end the driver drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A handle whose reports go nowhere, for tests and one-shot tools.
    pub fn discard() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Report task completion fraction.
    pub fn update(&self, fraction: f64) {
        let _ = self.tx.send(TaskTick {
            fraction,
            message: None,
        });
    }

    /// Report task completion fraction with a human-readable note.
    pub fn message(&self, fraction: f64, message: impl Into<String>) {
        let _ = self.tx.send(TaskTick {
            fraction,
            message: Some(message.into()),
        });
    }
}

/// Executes exactly one task of a job.
///
/// Implementations must turn every collaborator failure into an `Err`
/// result; the scheduler additionally catches panics at this boundary so a
/// crashing task degrades to a failed job instead of wedging the loop.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run `task` against a snapshot of `job`, returning the updated
    /// context. `cancel` flips to `true` when the job is cancelled;
    /// long-running collaborators should kill in-flight work best-effort.
    async fn run_task(
        &self,
        job: Job,
        task: TaskKind,
        cancel: watch::Receiver<bool>,
        progress: TaskProgress,
    ) -> TaskResult;
}
