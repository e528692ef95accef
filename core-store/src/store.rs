//! # Durable Store
//!
//! Transactional persistence for file metadata, checkpoints and jobs.
//!
//! Every operation opens its own transaction and commits it before returning.
//! Any error on the way drops the [`sqlx::Transaction`], which rolls back, so
//! callers never observe a partial upsert or a half-applied job update.

use crate::{
    db::{create_pool, DatabaseConfig},
    FileRecord, Job, JobId, JobStatus, JobStatusCounts, RecoveryOutcome, Result, StoreError,
};
use async_trait::async_trait;
use bridge_traits::{Clock, SystemClock};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Error recorded on jobs reclaimed after a worker died mid-run.
pub const INTERRUPTED_ERROR: &str = "interrupted: worker stopped while job was running";

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert each record, or overwrite every non-id field if the id exists.
    /// An empty slice is a no-op.
    async fn upsert_files(&self, records: &[FileRecord]) -> Result<()>;

    /// Number of distinct file ids stored.
    async fn file_count(&self) -> Result<u64>;

    async fn get_file(&self, id: &str) -> Result<Option<FileRecord>>;

    /// `None` both for an absent key and a key stored with no value.
    async fn get_checkpoint(&self, key: &str) -> Result<Option<String>>;

    async fn set_checkpoint(&self, key: &str, value: Option<&str>) -> Result<()>;

    /// Remove the key entirely.
    async fn clear_checkpoint(&self, key: &str) -> Result<()>;

    /// Insert a PENDING job with zero attempts.
    async fn create_job(&self, job_type: &str, max_attempts: u32) -> Result<JobId>;

    /// Up to `limit` runnable jobs, oldest first: PENDING jobs and FAILED
    /// jobs that still have attempts left.
    async fn fetch_pending_jobs(&self, limit: u32) -> Result<Vec<Job>>;

    /// Overwrite status, attempts and last error. Unknown ids are ignored.
    async fn update_job(
        &self,
        id: JobId,
        status: JobStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Most recently created jobs first, any status.
    async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>>;

    async fn count_jobs_by_status(&self) -> Result<JobStatusCounts>;

    /// Reclaim RUNNING jobs left behind by a dead worker. Jobs with attempts
    /// left become FAILED; jobs without become DEAD.
    async fn recover_stuck_jobs(&self) -> Result<RecoveryOutcome>;

    /// Reset every FAILED or DEAD job to PENDING with zero attempts.
    async fn retry_jobs(&self) -> Result<u64>;

    /// Delete PENDING, RUNNING and FAILED jobs of one type. DONE and DEAD
    /// rows are kept as history.
    async fn delete_jobs_of_type(&self, job_type: &str) -> Result<u64>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// [`DurableStore`] backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Open (and migrate) the database described by `config`.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    /// Timestamps written by this store come from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn now(&self) -> String {
        self.clock.now_rfc3339()
    }
}

#[derive(FromRow)]
struct FileRow {
    id: String,
    name: String,
    mime_type: String,
    modified_time: String,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        FileRecord {
            id: row.id,
            name: row.name,
            mime_type: row.mime_type,
            modified_time: row.modified_time,
        }
    }
}

#[derive(FromRow)]
struct JobRow {
    id: i64,
    #[sqlx(rename = "type")]
    job_type: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: JobId(row.id),
            job_type: row.job_type,
            status: row.status.parse()?,
            attempts: to_u32("attempts", row.attempts)?,
            max_attempts: to_u32("max_attempts", row.max_attempts)?,
            last_error: row.last_error,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn to_u32(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{} out of range: {}", field, value)))
}

/// Format of SQLite's `CURRENT_TIMESTAMP`, used by the column defaults.
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, SQLITE_TIMESTAMP_FORMAT).map(|dt| dt.and_utc())
        })
        .map_err(|e| StoreError::InvalidData(format!("invalid timestamp {:?}: {}", value, e)))
}

fn rows_to_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

const JOB_COLUMNS: &str =
    "id, type, status, attempts, max_attempts, last_error, created_at, updated_at";

#[async_trait]
impl DurableStore for SqliteStore {
    async fn upsert_files(&self, records: &[FileRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO files (id, name, mime_type, modified_time)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    mime_type = excluded.mime_type,
                    modified_time = excluded.modified_time
                "#,
            )
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.mime_type)
            .bind(&record.modified_time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(records = records.len(), "Upserted file records");
        Ok(())
    }

    async fn file_count(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(count as u64)
    }

    async fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT id, name, mime_type, modified_time FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.map(FileRecord::from))
    }

    async fn get_checkpoint(&self, key: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(value.flatten())
    }

    async fn set_checkpoint(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_checkpoint(&self, key: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sync_state WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_job(&self, job_type: &str, max_attempts: u32) -> Result<JobId> {
        if job_type.trim().is_empty() {
            return Err(StoreError::InvalidData("job type must not be empty".into()));
        }
        if max_attempts < 1 {
            return Err(StoreError::InvalidData(
                "max_attempts must be at least 1".into(),
            ));
        }

        let now = self.now();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (type, status, attempts, max_attempts, last_error, created_at, updated_at)
            VALUES (?, 'PENDING', 0, ?, NULL, ?, ?)
            "#,
        )
        .bind(job_type)
        .bind(max_attempts as i64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let id = JobId(result.last_insert_rowid());
        info!(job_id = %id, job_type, max_attempts, "Created job");
        Ok(id)
    }

    async fn fetch_pending_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'PENDING'
               OR (status = 'FAILED' AND attempts < max_attempts)
            ORDER BY julianday(created_at) ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        rows_to_jobs(rows)
    }

    async fn update_job(
        &self,
        id: JobId,
        status: JobStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, attempts = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(attempts as i64)
        .bind(last_error)
        .bind(self.now())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            debug!(job_id = %id, "update_job: no such job");
        }
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY julianday(created_at) DESC, id DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        rows_to_jobs(rows)
    }

    async fn count_jobs_by_status(&self) -> Result<JobStatusCounts> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        let mut counts = JobStatusCounts::default();
        for (status, count) in rows {
            counts.set(status.parse()?, count as u64);
        }
        Ok(counts)
    }

    async fn recover_stuck_jobs(&self) -> Result<RecoveryOutcome> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let recovered = sqlx::query(
            r#"
            UPDATE jobs SET status = 'FAILED', last_error = ?, updated_at = ?
            WHERE status = 'RUNNING' AND attempts < max_attempts
            "#,
        )
        .bind(INTERRUPTED_ERROR)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let exhausted = sqlx::query(
            r#"
            UPDATE jobs SET status = 'DEAD', last_error = ?, updated_at = ?
            WHERE status = 'RUNNING' AND attempts >= max_attempts
            "#,
        )
        .bind(INTERRUPTED_ERROR)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        let outcome = RecoveryOutcome {
            recovered,
            exhausted,
        };
        if exhausted > 0 {
            warn!(
                recovered,
                exhausted, "Recovered stuck jobs; some had no attempts left and are now DEAD"
            );
        } else {
            info!(recovered, "Recovered stuck jobs");
        }
        Ok(outcome)
    }

    async fn retry_jobs(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let reset = sqlx::query(
            r#"
            UPDATE jobs SET status = 'PENDING', attempts = 0, updated_at = ?
            WHERE status IN ('FAILED', 'DEAD')
            "#,
        )
        .bind(self.now())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        info!(reset, "Reset failed jobs to PENDING");
        Ok(reset)
    }

    async fn delete_jobs_of_type(&self, job_type: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE type = ? AND status IN ('PENDING', 'RUNNING', 'FAILED')
            "#,
        )
        .bind(job_type)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        info!(job_type, deleted, "Deleted jobs");
        Ok(deleted)
    }
}
