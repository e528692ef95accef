//! # Job Runner
//!
//! Single-worker loop that turns persisted job rows into executed work.
//!
//! ## Lifecycle
//!
//! ```text
//! PENDING ──▶ RUNNING ──▶ DONE
//!    ▲           │
//!    │           ├──▶ FAILED ──(picked up again while attempts remain)──▶ RUNNING
//!    │           └──▶ DEAD
//!    └── retry (administrative) ── FAILED / DEAD
//! ```
//!
//! Jobs of a batch run one after another. Every outcome, including an
//! unknown job type or a store failure inside the handler, is written back to
//! the job row; only a failure to write that row stops the loop.
//!
//! On start the runner reclaims rows left RUNNING by a previous process:
//! those with attempts left become FAILED, the rest DEAD.

use crate::handler::HandlerRegistry;
use crate::{Result, SyncError};
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use core_store::{DurableStore, Job, JobStatus, RecoveryOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BATCH_SIZE: u32 = 5;

pub struct JobRunner {
    store: Arc<dyn DurableStore>,
    registry: HandlerRegistry,
    events: Arc<EventBus>,
    poll_interval: Duration,
    batch_size: u32,
    dead_on_permanent_error: bool,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("registry", &self.registry)
            .field("poll_interval", &self.poll_interval)
            .field("batch_size", &self.batch_size)
            .field("dead_on_permanent_error", &self.dead_on_permanent_error)
            .finish()
    }
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn DurableStore>,
        registry: HandlerRegistry,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            dead_on_permanent_error: false,
        }
    }

    /// Sleep between polls that found no work.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Send jobs straight to DEAD when the source reports a permanent error,
    /// instead of spending the remaining attempts.
    pub fn with_dead_on_permanent_error(mut self, enabled: bool) -> Self {
        self.dead_on_permanent_error = enabled;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Reclaim jobs left RUNNING by a worker that is gone.
    pub async fn recover_stuck_jobs(&self) -> Result<RecoveryOutcome> {
        let outcome = self.store.recover_stuck_jobs().await?;

        if outcome.recovered > 0 || outcome.exhausted > 0 {
            warn!(
                recovered = outcome.recovered,
                exhausted = outcome.exhausted,
                "Reclaimed jobs interrupted by a previous run"
            );
        }
        self.events
            .emit(CoreEvent::Job(JobEvent::Recovered {
                recovered: outcome.recovered,
                exhausted: outcome.exhausted,
            }))
            .ok();

        Ok(outcome)
    }

    /// Recover, then poll until `shutdown` is cancelled.
    ///
    /// Cancellation is observed while idle and between jobs; a job that has
    /// started always runs to its recorded outcome.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.recover_stuck_jobs().await?;

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            job_types = ?self.registry.job_types(),
            "Job runner started"
        );

        while !shutdown.is_cancelled() {
            let processed = match self.store.fetch_pending_jobs(self.batch_size).await {
                Ok(jobs) => self.execute_batch(jobs, Some(&shutdown)).await?,
                Err(e) => {
                    error!(error = %e, "Failed to fetch pending jobs");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!("Job runner stopped");
        Ok(())
    }

    /// Fetch one batch and run it. Returns the number of jobs executed.
    pub async fn run_once(&self) -> Result<usize> {
        let jobs = self.store.fetch_pending_jobs(self.batch_size).await?;
        self.execute_batch(jobs, None).await
    }

    async fn execute_batch(
        &self,
        jobs: Vec<Job>,
        shutdown: Option<&CancellationToken>,
    ) -> Result<usize> {
        if !jobs.is_empty() {
            debug!(count = jobs.len(), "Fetched pending jobs");
        }

        let mut processed = 0;
        for job in jobs {
            if shutdown.is_some_and(CancellationToken::is_cancelled) {
                debug!("Shutdown requested, leaving rest of batch pending");
                break;
            }
            self.process_job(job).await?;
            processed += 1;
        }
        Ok(processed)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    async fn process_job(&self, job: Job) -> Result<()> {
        if job.remaining_attempts() == 0 {
            return self.retire_exhausted(job).await;
        }

        let job = match job.start() {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Skipping job that cannot be started");
                return Ok(());
            }
        };
        self.record(&job).await?;

        info!(
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Job started"
        );
        self.events
            .emit(CoreEvent::Job(JobEvent::Started {
                job_id: job.id.0,
                job_type: job.job_type.clone(),
                attempt: job.attempts,
                max_attempts: job.max_attempts,
            }))
            .ok();

        let outcome = match self.registry.get(&job.job_type) {
            Some(handler) => handler.execute(&job).await,
            None => Err(SyncError::UnknownJobType(job.job_type.clone())),
        };

        match outcome {
            Ok(()) => self.record_success(job).await,
            Err(err) => self.record_failure(job, err).await,
        }
    }

    async fn record_success(&self, job: Job) -> Result<()> {
        let job = job.complete()?;
        self.record(&job).await?;

        info!(attempts = job.attempts, "Job completed");
        self.events
            .emit(CoreEvent::Job(JobEvent::Completed {
                job_id: job.id.0,
                job_type: job.job_type,
                attempts: job.attempts,
            }))
            .ok();
        Ok(())
    }

    async fn record_failure(&self, job: Job, err: SyncError) -> Result<()> {
        let message = err.to_string();
        let transient = err.is_transient();

        let job = if self.dead_on_permanent_error && err.is_permanent_source() {
            job.kill(&message)?
        } else {
            job.fail(&message)?
        };
        self.record(&job).await?;

        if job.status == JobStatus::Dead {
            error!(
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                error = %message,
                "Job is dead, manual retry required"
            );
            self.events
                .emit(CoreEvent::Job(JobEvent::Dead {
                    job_id: job.id.0,
                    job_type: job.job_type,
                    attempts: job.attempts,
                    message,
                }))
                .ok();
        } else {
            warn!(
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                transient,
                error = %message,
                "Job failed, will retry"
            );
            self.events
                .emit(CoreEvent::Job(JobEvent::Failed {
                    job_id: job.id.0,
                    job_type: job.job_type,
                    attempts: job.attempts,
                    max_attempts: job.max_attempts,
                    message,
                    transient,
                }))
                .ok();
        }
        Ok(())
    }

    /// A queued row can arrive with its budget already spent when it was
    /// written outside the store API. It goes DEAD without another attempt.
    async fn retire_exhausted(&self, job: Job) -> Result<()> {
        let job = match job.exhaust() {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Skipping job that cannot be retired");
                return Ok(());
            }
        };
        self.record(&job).await?;

        let message = job.last_error.clone().unwrap_or_default();
        error!(
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            "Queued job has no attempts left, marked dead"
        );
        self.events
            .emit(CoreEvent::Job(JobEvent::Dead {
                job_id: job.id.0,
                job_type: job.job_type,
                attempts: job.attempts,
                message,
            }))
            .ok();
        Ok(())
    }

    async fn record(&self, job: &Job) -> Result<()> {
        self.store
            .update_job(job.id, job.status, job.attempts, job.last_error.as_deref())
            .await
            .map_err(|e| {
                error!(job_id = %job.id, status = %job.status, error = %e, "Failed to record job state");
                SyncError::Store(e)
            })
    }
}
