//! Structured logging for task execution.

use std::fmt;

use tracing::{info, warn};
use vidq_models::JobId;

/// Logs one task attempt with consistent job and task fields, so a job's
/// lifecycle can be followed through the log with a single filter.
pub struct TaskLog {
    job_id: JobId,
    task: &'static str,
}

impl TaskLog {
    pub fn new(job_id: &JobId, task: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            task,
        }
    }

    pub fn started(&self) {
        info!(job_id = %self.job_id, task = self.task, "Task started");
    }

    pub fn completed(&self) {
        info!(job_id = %self.job_id, task = self.task, "Task completed");
    }

    pub fn failed(&self, error: &dyn fmt::Display) {
        warn!(
            job_id = %self.job_id,
            task = self.task,
            error = %error,
            "Task failed"
        );
    }

    pub fn skipped_cancelled(&self) {
        info!(
            job_id = %self.job_id,
            task = self.task,
            "Task skipped, job already cancelled"
        );
    }
}
