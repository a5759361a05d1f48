// src/job.rs
// Single-flight job state machine.
//
// The job-state record is the only mutable shared resource in the core.
// Every read and write happens under one mutex; the lock is only held
// across small state mutations, never across I/O or compute. `try_start`
// is the sole compare-and-set: at most one run is RUNNING at any instant.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{AnalysisError, Result, GENERIC_FAILURE_MESSAGE};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "IDLE",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub status: JobStatus,
    pub progress: f64,
    pub total_certificates: usize,
    pub processed_certificates: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Idle,
            progress: 0.0,
            total_certificates: 0,
            processed_certificates: 0,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

#[derive(Default)]
pub struct JobController {
    state: Mutex<JobState>,
}

impl JobController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JobState {
        self.state.lock().clone()
    }

    /// Transition to RUNNING. Rejected with `StateConflict` when a run is
    /// already in flight; IDLE, COMPLETED and FAILED all accept a start.
    pub fn try_start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.status == JobStatus::Running {
            return Err(AnalysisError::StateConflict);
        }
        *state = JobState {
            status: JobStatus::Running,
            started_at: Some(Utc::now()),
            ..JobState::default()
        };
        Ok(())
    }

    pub fn set_total(&self, total: usize) {
        self.state.lock().total_certificates = total;
    }

    pub fn set_processed(&self, processed: usize) {
        self.state.lock().processed_certificates = processed;
    }

    /// Advance progress monotonically; regressions are ignored.
    pub fn set_progress(&self, progress: f64) {
        let mut state = self.state.lock();
        state.progress = state.progress.max(progress.clamp(0.0, 1.0));
    }

    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.status = JobStatus::Completed;
        state.progress = 1.0;
        state.completed_at = Some(Utc::now());
        state.error_message = None;
    }

    /// Mark the run FAILED. Only the generic message is stored; detail
    /// belongs in the log sink.
    pub fn fail(&self) {
        let mut state = self.state.lock();
        state.status = JobStatus::Failed;
        state.error_message = Some(GENERIC_FAILURE_MESSAGE.to_string());
    }
}
