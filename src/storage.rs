//! SQLite-backed persistence for jobs and configuration.
//!
//! The store owns the authoritative copy of every job. All mutations go
//! through it; workers only ever hold transient snapshots between
//! acquisition and the subsequent write-back.

use crate::errors::{QueueError, Result};
use crate::job::{DEFAULT_MAX_RETRIES, Job, JobState};
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The configuration keys the store recognizes. `set_config` rejects
/// everything else.
pub const CONFIG_KEYS: [&str; 3] = ["max-retries", "backoff-base", "job-timeout"];

/// Fallback for `backoff-base` when the key is missing or unparseable.
const DEFAULT_BACKOFF_BASE: i64 = 2;
/// Fallback for `job-timeout` when the key is missing or unparseable.
const DEFAULT_JOB_TIMEOUT_SECS: i64 = 300;

/// Row cap for state listings.
const LIST_LIMIT: i64 = 100;

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, \
     created_at, updated_at, scheduled_at, error_message, exit_code, output";

/// Handle to the queue database. Cheap to clone; every clone shares the
/// same connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date. Migration failures are fatal to the caller.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("Database schema is up to date");

        Ok(Self { pool })
    }

    /// Insert or update a job, writing all fields.
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO jobs
            (id, command, state, attempts, max_retries,
             created_at, updated_at, scheduled_at,
             error_message, exit_code, output)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.scheduled_at)
        .bind(&job.error_message)
        .bind(job.exit_code)
        .bind(&job.output)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Up to 100 jobs in the given state, oldest first.
    pub async fn find_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at LIMIT ?"
        ))
        .bind(state)
        .bind(LIST_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Look up a single job by id.
    pub async fn find_job_by_id(&self, id: &str) -> Result<Option<Job>> {
        let job =
            sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(job)
    }

    /// Job counts per state, with every state present (zero-initialized).
    pub async fn status_summary(&self) -> Result<HashMap<JobState, i64>> {
        let mut summary: HashMap<JobState, i64> =
            JobState::ALL.into_iter().map(|state| (state, 0)).collect();

        let counts =
            sqlx::query_as::<_, (JobState, i64)>("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        for (state, count) in counts {
            summary.insert(state, count);
        }

        Ok(summary)
    }

    /// Atomically claim the oldest runnable PENDING job, flipping it to
    /// PROCESSING, or return `None` when nothing is eligible.
    ///
    /// Claiming is a single statement, so no two pollers can observe the
    /// same row as eligible: SQLite serializes writers, and the row is
    /// already PROCESSING by the time the next claimant runs the inner
    /// select. Busy/locked errors are recoverable; callers retry after a
    /// short delay.
    pub async fn acquire_next_pending(&self) -> Result<Option<Job>> {
        let now = Utc::now();

        let job = sqlx::query_as::<_, Job>(&format!(
            r"
            UPDATE jobs SET state = ?2, updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = ?3
                  AND (scheduled_at IS NULL OR scheduled_at <= ?1)
                ORDER BY created_at
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            ",
        ))
        .bind(now)
        .bind(JobState::Processing)
        .bind(JobState::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Return every orphaned PROCESSING row to PENDING, leaving
    /// `scheduled_at` untouched. Run once at startup, before any worker.
    pub async fn recover_stuck(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE jobs SET state = ?, updated_at = ? WHERE state = ?")
            .bind(JobState::Pending)
            .bind(Utc::now())
            .bind(JobState::Processing)
            .execute(&self.pool)
            .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(recovered, "Returned orphaned in-flight jobs to the queue");
        }

        Ok(recovered)
    }

    /// Read a raw configuration value.
    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Write a configuration value. Only the keys in [`CONFIG_KEYS`] are
    /// accepted.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        if !CONFIG_KEYS.contains(&key) {
            return Err(QueueError::InvalidConfigKey(key.to_owned()));
        }

        sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// The `max-retries` fallback cap, used for jobs without their own.
    pub async fn max_retries(&self) -> i64 {
        self.config_i64("max-retries", DEFAULT_MAX_RETRIES).await
    }

    /// The exponential backoff base.
    pub async fn backoff_base(&self) -> i64 {
        self.config_i64("backoff-base", DEFAULT_BACKOFF_BASE).await
    }

    /// The per-job execution deadline in seconds.
    pub async fn job_timeout_secs(&self) -> i64 {
        self.config_i64("job-timeout", DEFAULT_JOB_TIMEOUT_SECS).await
    }

    /// Reset a DEAD job so workers will pick it up again: PENDING,
    /// `attempts = 0`, error and exit code cleared, eligible immediately.
    pub async fn retry_dead_job(&self, id: &str) -> Result<Job> {
        let Some(mut job) = self.find_job_by_id(id).await? else {
            return Err(QueueError::JobNotFound(id.to_owned()));
        };

        if job.state != JobState::Dead {
            return Err(QueueError::NotInDeadLetterQueue {
                id: job.id,
                state: job.state,
            });
        }

        let now = Utc::now();
        job.state = JobState::Pending;
        job.attempts = 0;
        job.error_message.clear();
        job.exit_code = None;
        job.scheduled_at = Some(now);
        job.updated_at = now;

        self.save_job(&job).await?;
        info!(job.id = %job.id, "Job requeued from the dead-letter queue");

        Ok(job)
    }

    async fn config_i64(&self, key: &str, fallback: i64) -> i64 {
        match self.get_config(key).await {
            Ok(Some(value)) => value.parse().unwrap_or(fallback),
            Ok(None) => fallback,
            Err(error) => {
                warn!(%error, key, "Failed to read config, using fallback");
                fallback
            }
        }
    }
}
