//! Queue error types.

use thiserror::Error;
use vidq_models::{JobId, JobSpecError, TransitionError};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid job spec: {0}")]
    InvalidSpec(#[from] JobSpecError),

    #[error("job {0} is not failed; only failed jobs can be requeued")]
    NotRequeueable(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
