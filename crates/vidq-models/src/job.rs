//! Jobs: the unit of scheduling work.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::status::{DisplayStatus, JobStatus, TransitionError};
use crate::task::TaskKind;
use crate::video::{VideoId, VideoInfo};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workload class a job belongs to for its entire lifetime.
///
/// The class decides which queue (and which concurrency ceiling) a job is
/// scheduled under and is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    /// Downloads, imports and light processing; parallelizes well.
    #[default]
    Batch,
    /// Transcription and AI inference; serialized on the shared model
    /// runtime.
    Analysis,
}

impl QueueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Batch => "batch",
            QueueClass::Analysis => "analysis",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared mutable context threaded through a job's pipeline.
///
/// Fields are populated by one task and consumed by later tasks in the same
/// job. They are append-only: a task may overwrite `video_path` with a newer
/// artifact but never clears a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct JobContext {
    /// Current working file; chained through processing tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    /// Library identity once imported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<VideoId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<VideoInfo>,
}

/// Submission record for a new job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct JobSpec {
    /// Remote source, required by get-info/download tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Existing library item to operate on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<VideoId>,
    /// Existing file to operate on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Ordered pipeline; immutable after creation.
    pub tasks: Vec<TaskKind>,
}

/// A job submission that cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobSpecError {
    #[error("job has no tasks")]
    NoTasks,
    #[error("task '{0}' requires a url but none was given")]
    MissingUrl(&'static str),
    #[error("job has no url, video id or video path to work on")]
    NoSource,
}

impl JobSpec {
    /// Convenience constructor for a url-based job.
    pub fn for_url(url: impl Into<String>, tasks: Vec<TaskKind>) -> Self {
        Self {
            url: Some(url.into()),
            tasks,
            ..Default::default()
        }
    }

    /// Convenience constructor for an existing library video.
    pub fn for_video(video_id: VideoId, tasks: Vec<TaskKind>) -> Self {
        Self {
            video_id: Some(video_id),
            tasks,
            ..Default::default()
        }
    }

    /// Reject submissions that could never run.
    pub fn validate(&self) -> Result<(), JobSpecError> {
        if self.tasks.is_empty() {
            return Err(JobSpecError::NoTasks);
        }
        if let Some(task) = self.tasks.iter().find(|t| t.requires_url()) {
            if self.url.is_none() {
                return Err(JobSpecError::MissingUrl(task.label()));
            }
        }
        if self.url.is_none() && self.video_id.is_none() && self.video_path.is_none() {
            return Err(JobSpecError::NoSource);
        }
        Ok(())
    }
}

/// One user-requested unit of work: an ordered task list plus the shared
/// context those tasks communicate through.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub class: QueueClass,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Ordered pipeline; never mutated after creation.
    pub tasks: Vec<TaskKind>,

    /// Index of the task currently running (or next to run). Always in
    /// `[0, tasks.len()]`; equals `tasks.len()` only when completed.
    pub current_task: usize,

    pub status: JobStatus,

    /// 0-100, fraction of completed tasks (refined within a task when its
    /// collaborator reports sub-progress).
    pub progress: u8,

    /// Human-readable phase, e.g. `"transcribe (3/5)"`.
    pub current_phase: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub context: JobContext,
}

impl Job {
    /// Create a pending job from a validated spec.
    pub fn new(class: QueueClass, spec: JobSpec) -> Result<Self, JobSpecError> {
        spec.validate()?;

        let context = JobContext {
            video_path: spec.video_path,
            video_id: spec.video_id,
            ..Default::default()
        };

        let mut job = Self {
            id: JobId::new(),
            class,
            url: spec.url,
            display_name: spec.display_name,
            tasks: spec.tasks,
            current_task: 0,
            status: JobStatus::Pending,
            progress: 0,
            current_phase: "Queued".to_string(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            context,
        };
        job.current_phase = job.phase_for(0);
        Ok(job)
    }

    /// The task at `current_task`, if any remain.
    pub fn current_task_kind(&self) -> Option<&TaskKind> {
        self.tasks.get(self.current_task)
    }

    /// Render the phase string for a task index: `"transcribe (3/5)"`.
    pub fn phase_for(&self, index: usize) -> String {
        match self.tasks.get(index) {
            Some(task) => format!("{} ({}/{})", task.label(), index + 1, self.tasks.len()),
            None => "Completed".to_string(),
        }
    }

    /// Fraction-of-completed-tasks progress, rounded.
    fn progress_for(&self, completed_tasks: usize) -> u8 {
        if self.tasks.is_empty() {
            return 0;
        }
        let pct = (completed_tasks as f64 / self.tasks.len() as f64) * 100.0;
        pct.round().min(100.0) as u8
    }

    /// Pending -> Processing. Sets `started_at`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.validate_transition(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        self.current_phase = self.phase_for(self.current_task);
        Ok(())
    }

    /// Record one finished task and move on to the next. Never advances
    /// past the last task; finishing the final task goes through
    /// [`Job::complete`].
    pub fn advance_task(&mut self) {
        debug_assert!(self.current_task + 1 < self.tasks.len());
        self.current_task += 1;
        self.progress = self.progress_for(self.current_task);
        self.current_phase = self.phase_for(self.current_task);
    }

    /// Whether the task at `current_task` is the last of the pipeline.
    pub fn on_last_task(&self) -> bool {
        self.current_task + 1 >= self.tasks.len()
    }

    /// Processing -> Completed, after every task succeeded.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.validate_transition(JobStatus::Completed)?;
        self.current_task = self.tasks.len();
        self.progress = 100;
        self.current_phase = "Completed".to_string();
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Processing -> Failed. The index stays at the failing task so the
    /// error is diagnosable without re-deriving state from logs.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.status = self.status.validate_transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Pending|Processing -> Cancelled.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.validate_transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        self.current_phase = "Cancelled".to_string();
        Ok(())
    }

    /// Refine displayed progress within the current task's slice of 0-100
    /// without advancing `current_task`. `fraction` is the current task's
    /// own completion in `[0, 1]`.
    pub fn refine_progress(&mut self, fraction: f64) {
        if self.status != JobStatus::Processing || self.tasks.is_empty() {
            return;
        }
        let done = self.current_task as f64 + fraction.clamp(0.0, 1.0);
        let pct = (done / self.tasks.len() as f64) * 100.0;
        // Never move the bar backwards within a task.
        self.progress = self.progress.max(pct.round().min(100.0) as u8);
    }

    /// Fill in `display_name` from context once metadata or a file exists.
    pub fn refresh_display_name(&mut self) {
        if self.display_name.is_some() {
            return;
        }
        if let Some(info) = &self.context.video_info {
            if !info.title.is_empty() {
                self.display_name = Some(info.title.clone());
                return;
            }
        }
        if let Some(path) = &self.context.video_path {
            if let Some(stem) = path.file_stem() {
                self.display_name = Some(stem.to_string_lossy().into_owned());
            }
        }
    }

    /// Presentation status, derived from (status, current task kind).
    pub fn display_status(&self) -> DisplayStatus {
        match self.status {
            JobStatus::Pending => DisplayStatus::Queued,
            JobStatus::Completed => DisplayStatus::Completed,
            JobStatus::Failed => DisplayStatus::Failed,
            JobStatus::Cancelled => DisplayStatus::Cancelled,
            JobStatus::Processing => match self.current_task_kind() {
                Some(TaskKind::Download { .. }) => DisplayStatus::Downloading,
                Some(TaskKind::Import) => DisplayStatus::Downloaded,
                Some(TaskKind::Transcribe { .. }) => DisplayStatus::Transcribing,
                Some(TaskKind::Analyze { .. }) => DisplayStatus::Analyzing,
                _ => DisplayStatus::Processing,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Quality;

    fn download_job() -> Job {
        let spec = JobSpec::for_url(
            "https://example.com/v",
            vec![
                TaskKind::GetInfo,
                TaskKind::Download {
                    quality: Quality::Best,
                    browser: None,
                },
                TaskKind::Import,
            ],
        );
        Job::new(QueueClass::Batch, spec).unwrap()
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = download_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_task, 0);
        assert_eq!(job.progress, 0);
        assert_eq!(job.current_phase, "get-info (1/3)");
    }

    #[test]
    fn test_spec_validation() {
        assert_eq!(
            Job::new(QueueClass::Batch, JobSpec::default()).unwrap_err(),
            JobSpecError::NoTasks
        );

        let spec = JobSpec {
            tasks: vec![TaskKind::Download {
                quality: Quality::Best,
                browser: None,
            }],
            ..Default::default()
        };
        assert_eq!(
            Job::new(QueueClass::Batch, spec).unwrap_err(),
            JobSpecError::MissingUrl("download")
        );

        let spec = JobSpec {
            tasks: vec![TaskKind::FixAspectRatio],
            ..Default::default()
        };
        assert_eq!(
            Job::new(QueueClass::Batch, spec).unwrap_err(),
            JobSpecError::NoSource
        );
    }

    #[test]
    fn test_lifecycle_and_progress() {
        let mut job = download_job();
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        job.advance_task();
        assert_eq!(job.current_task, 1);
        assert_eq!(job.progress, 33);
        assert_eq!(job.current_phase, "download (2/3)");

        job.advance_task();
        assert_eq!(job.progress, 67);
        assert!(job.on_last_task());

        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.current_task, job.tasks.len());
        assert_eq!(job.progress, 100);
        assert_eq!(job.current_phase, "Completed");
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_completed_job_rejects_restart() {
        let mut job = download_job();
        job.start().unwrap();
        job.current_task = 2;
        job.complete().unwrap();
        assert!(job.start().is_err());
        assert!(job.fail("nope").is_err());
        assert!(job.cancel().is_err());
    }

    #[test]
    fn test_fail_keeps_failing_index() {
        let mut job = download_job();
        job.start().unwrap();
        job.advance_task(); // task 1 (download) is now running
        job.fail("yt-dlp exited with 1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.current_task, 1);
        assert_eq!(job.error.as_deref(), Some("yt-dlp exited with 1"));
    }

    #[test]
    fn test_refine_progress_stays_within_slice() {
        let mut job = download_job();
        job.start().unwrap();
        job.advance_task(); // on task 1 of 3, base progress 33
        job.refine_progress(0.5);
        assert_eq!(job.progress, 50);
        // A later, lower report never moves the bar backwards.
        job.refine_progress(0.1);
        assert_eq!(job.progress, 50);
        job.refine_progress(5.0); // clamped to end of slice
        assert_eq!(job.progress, 67);
    }

    #[test]
    fn test_display_status_derivation() {
        let mut job = download_job();
        assert_eq!(job.display_status(), DisplayStatus::Queued);

        job.start().unwrap();
        assert_eq!(job.display_status(), DisplayStatus::Processing); // get-info
        job.advance_task();
        assert_eq!(job.display_status(), DisplayStatus::Downloading);
        job.advance_task();
        assert_eq!(job.display_status(), DisplayStatus::Downloaded); // import
        job.complete().unwrap();
        assert_eq!(job.display_status(), DisplayStatus::Completed);
    }

    #[test]
    fn test_display_name_from_info_then_path() {
        let mut job = download_job();
        job.refresh_display_name();
        assert!(job.display_name.is_none());

        job.context.video_path = Some(PathBuf::from("/tmp/some clip.mp4"));
        job.refresh_display_name();
        assert_eq!(job.display_name.as_deref(), Some("some clip"));

        // Already set: metadata does not overwrite it.
        job.context.video_info = Some(VideoInfo::new("Proper Title"));
        job.refresh_display_name();
        assert_eq!(job.display_name.as_deref(), Some("some clip"));
    }
}
