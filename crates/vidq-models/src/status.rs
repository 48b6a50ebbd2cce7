//! Job lifecycle states and the transition rules between them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job state in the queue.
///
/// The only legal paths are `Pending -> Processing -> {Completed | Failed}`
/// and `{Pending, Processing} -> Cancelled`. Everything else is rejected by
/// [`JobStatus::validate_transition`]; callers never mutate the status field
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in queue
    #[default]
    Pending,
    /// Job is being processed
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed; the job's error field says which task broke
    Failed,
    /// Job was cancelled before completion
    Cancelled,
}

/// Attempted an illegal job state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    /// Validate a transition, returning the would-be next state.
    pub fn validate_transition(&self, next: JobStatus) -> Result<JobStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: *self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Presentation-level status vocabulary.
///
/// This is always derived from (job status, current task kind) and never
/// stored, so it cannot drift out of sync with the authoritative
/// [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Queued,
    Downloading,
    Downloaded,
    Processing,
    Transcribing,
    Analyzing,
    Completed,
    Failed,
    Cancelled,
}

impl DisplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::Queued => "queued",
            DisplayStatus::Downloading => "downloading",
            DisplayStatus::Downloaded => "downloaded",
            DisplayStatus::Processing => "processing",
            DisplayStatus::Transcribing => "transcribing",
            DisplayStatus::Analyzing => "analyzing",
            DisplayStatus::Completed => "completed",
            DisplayStatus::Failed => "failed",
            DisplayStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
