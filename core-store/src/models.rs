//! # Store Value Types
//!
//! Immutable records read from and written to the durable store, plus the job
//! lifecycle state machine.
//!
//! ```text
//! PENDING ──► RUNNING ──► DONE
//!    ▲           │
//!    │           ├──► FAILED ──► RUNNING   (automatic retry while attempts remain)
//!    │           │      │
//!    │           └──► DEAD
//!    │                  │
//!    └──── admin retry ─┘
//! ```

use crate::{Result, StoreError};
use bridge_traits::RemoteFileMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default retry budget for a new job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ============================================================================
// Files
// ============================================================================

/// Mirrored metadata of one remote file. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: String,
}

impl FileRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        modified_time: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            modified_time: modified_time.into(),
        }
    }
}

impl From<RemoteFileMetadata> for FileRecord {
    fn from(remote: RemoteFileMetadata) -> Self {
        Self {
            id: remote.id,
            name: remote.name,
            mime_type: remote.mime_type,
            modified_time: remote.modified_time,
        }
    }
}

// ============================================================================
// Job Types
// ============================================================================

/// Auto-assigned, monotonic job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<i64>()
            .map(JobId)
            .map_err(|_| StoreError::InvalidData(format!("invalid job id: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker; attempts already counts this run
    Running,
    /// Completed successfully
    Done,
    /// Last attempt failed; retried while attempts remain
    Failed,
    /// Attempts exhausted; needs an administrative retry
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Dead,
    ];

    /// No worker will pick the job up again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Dead)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Dead => "DEAD",
        }
    }

    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Failed, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Dead)
                | (JobStatus::Pending, JobStatus::Dead)
                | (JobStatus::Failed, JobStatus::Dead)
                | (JobStatus::Failed, JobStatus::Pending)
                | (JobStatus::Dead, JobStatus::Pending)
        )
    }

    fn validate_transition(&self, to: JobStatus) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(StoreError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "DONE" => Ok(JobStatus::Done),
            "FAILED" => Ok(JobStatus::Failed),
            "DEAD" => Ok(JobStatus::Dead),
            _ => Err(StoreError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error recorded on queued jobs retired by [`Job::exhaust`].
pub const EXHAUSTED_ERROR: &str = "no attempts left";

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Attempts left before the job goes DEAD.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Claim for execution: RUNNING with one more attempt counted.
    ///
    /// Fails with [`StoreError::AttemptsExhausted`] when no attempt is left;
    /// see [`Job::exhaust`].
    pub fn start(mut self) -> Result<Self> {
        self.status.validate_transition(JobStatus::Running)?;
        if self.remaining_attempts() == 0 {
            return Err(StoreError::AttemptsExhausted {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.last_error = None;
        Ok(self)
    }

    pub fn complete(mut self) -> Result<Self> {
        self.status.validate_transition(JobStatus::Done)?;
        self.status = JobStatus::Done;
        self.last_error = None;
        Ok(self)
    }

    /// Record a failed run. FAILED while attempts remain, DEAD otherwise.
    pub fn fail(mut self, error: impl Into<String>) -> Result<Self> {
        let to = if self.attempts < self.max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Dead
        };
        self.status.validate_transition(to)?;
        self.status = to;
        self.last_error = Some(error.into());
        Ok(self)
    }

    /// Retire a queued job whose budget is already spent, without running it.
    /// Attempts are clamped to `max_attempts`.
    pub fn exhaust(mut self) -> Result<Self> {
        self.status.validate_transition(JobStatus::Dead)?;
        if self.remaining_attempts() > 0 {
            return Err(StoreError::InvalidData(format!(
                "job {} still has {} attempt(s) left",
                self.id,
                self.remaining_attempts()
            )));
        }
        self.status = JobStatus::Dead;
        self.attempts = self.max_attempts;
        self.last_error = Some(EXHAUSTED_ERROR.to_string());
        Ok(self)
    }

    /// Record a failed run as DEAD regardless of the remaining budget.
    pub fn kill(mut self, error: impl Into<String>) -> Result<Self> {
        self.status.validate_transition(JobStatus::Dead)?;
        self.status = JobStatus::Dead;
        self.last_error = Some(error.into());
        Ok(self)
    }
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusCounts {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
    pub dead: u64,
}

impl JobStatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Done => self.done,
            JobStatus::Failed => self.failed,
            JobStatus::Dead => self.dead,
        }
    }

    pub(crate) fn set(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Running => self.running = count,
            JobStatus::Done => self.done = count,
            JobStatus::Failed => self.failed = count,
            JobStatus::Dead => self.dead = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.done + self.failed + self.dead
    }
}

/// Result of a crash-recovery sweep over RUNNING jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// RUNNING jobs with attempts left, moved to FAILED.
    pub recovered: u64,
    /// RUNNING jobs with no attempts left, moved to DEAD.
    pub exhausted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus, attempts: u32, max_attempts: u32) -> Job {
        Job {
            id: JobId(1),
            job_type: "metadata_sync".to_string(),
            status,
            attempts,
            max_attempts,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_job_status_round_trips_storage_form() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!(matches!(
            "COMPLETE".parse::<JobStatus>(),
            Err(StoreError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_start_counts_attempt() {
        let started = job(JobStatus::Pending, 0, 3).start().unwrap();
        assert_eq!(started.status, JobStatus::Running);
        assert_eq!(started.attempts, 1);
    }

    #[test]
    fn test_failed_job_can_restart() {
        let started = job(JobStatus::Failed, 1, 3).start().unwrap();
        assert_eq!(started.attempts, 2);
    }

    #[test]
    fn test_cannot_start_done_or_dead_job() {
        assert!(job(JobStatus::Done, 1, 3).start().is_err());
        assert!(matches!(
            job(JobStatus::Dead, 3, 3).start(),
            Err(StoreError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_start_without_budget_is_refused() {
        let result = job(JobStatus::Pending, 3, 3).start();
        assert!(matches!(
            result,
            Err(StoreError::AttemptsExhausted {
                attempts: 3,
                max_attempts: 3
            })
        ));
    }

    #[test]
    fn test_exhaust_clamps_attempts() {
        let dead = job(JobStatus::Pending, 5, 3).exhaust().unwrap();
        assert_eq!(dead.status, JobStatus::Dead);
        assert_eq!(dead.attempts, 3);
        assert_eq!(dead.last_error.as_deref(), Some(EXHAUSTED_ERROR));

        assert!(matches!(
            job(JobStatus::Pending, 1, 3).exhaust(),
            Err(StoreError::InvalidData(_))
        ));
        assert!(job(JobStatus::Done, 3, 3).exhaust().is_err());
    }

    #[test]
    fn test_fail_with_attempts_left_is_failed() {
        let failed = job(JobStatus::Pending, 0, 3)
            .start()
            .unwrap()
            .fail("rate limited")
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_fail_on_last_attempt_is_dead() {
        let dead = job(JobStatus::Failed, 2, 3)
            .start()
            .unwrap()
            .fail("still broken")
            .unwrap();
        assert_eq!(dead.status, JobStatus::Dead);
        assert_eq!(dead.attempts, 3);
    }

    #[test]
    fn test_kill_ignores_remaining_budget() {
        let dead = job(JobStatus::Pending, 0, 5)
            .start()
            .unwrap()
            .kill("forbidden")
            .unwrap();
        assert_eq!(dead.status, JobStatus::Dead);
        assert_eq!(dead.remaining_attempts(), 4);
    }

    #[test]
    fn test_file_record_from_remote() {
        let remote = RemoteFileMetadata {
            id: "f1".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            modified_time: "2024-01-01T00:00:00Z".into(),
        };
        let record = FileRecord::from(remote);
        assert_eq!(
            record,
            FileRecord::new("f1", "a.txt", "text/plain", "2024-01-01T00:00:00Z")
        );
    }
}
