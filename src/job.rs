//! Job records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Attempt cap applied when an enqueue request does not carry its own.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Upper bound on a single backoff delay. Unbounded exponential growth
/// overflows 64-bit seconds after a few dozen doublings.
const MAX_BACKOFF_SECS: i64 = 30 * 24 * 60 * 60;

/// Lifecycle state of a job.
///
/// Stored as the literal uppercase string in the database. `Failed` is
/// reserved for forward compatibility and is never written by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Waiting to be picked up by a worker (possibly not before `scheduled_at`).
    Pending,
    /// Claimed by exactly one worker and currently executing.
    Processing,
    /// Finished with exit code zero. Terminal.
    Completed,
    /// Reserved; not used as a resting state.
    Failed,
    /// Exhausted its retry budget. Terminal except for an explicit DLQ retry.
    Dead,
}

impl JobState {
    /// All states, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// The persisted representation of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Processing => "PROCESSING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Dead => "DEAD",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a job state.
#[derive(Debug, Error)]
#[error("invalid job state: {0}")]
pub struct InvalidJobState(String);

impl std::str::FromStr for JobState {
    type Err = InvalidJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "PROCESSING" => Ok(JobState::Processing),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "DEAD" => Ok(JobState::Dead),
            _ => Err(InvalidJobState(s.to_owned())),
        }
    }
}

// States live in a TEXT column, so encode/decode through &str.
impl sqlx::Type<sqlx::Sqlite> for JobState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <&str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobState {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<'r, sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<'q, sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A persisted job record.
///
/// The store owns the authoritative copy; instances held by workers are
/// transient snapshots, valid between acquisition and the write-back.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    /// Globally unique identifier, assigned at enqueue.
    pub id: String,
    /// Shell command passed to `sh -c`.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of completed execution attempts that failed.
    pub attempts: i64,
    /// Per-job attempt cap.
    pub max_retries: i64,
    /// Set once at enqueue.
    pub created_at: DateTime<Utc>,
    /// Stamped on every state write.
    pub updated_at: DateTime<Utc>,
    /// Earliest moment the job is eligible; `None` means immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Last failure cause; empty on success.
    pub error_message: String,
    /// Exit code of the last attempt; `None` before the first.
    pub exit_code: Option<i64>,
    /// Combined stdout and stderr of the most recent attempt.
    pub output: String,
}

impl Job {
    /// Create a fresh PENDING job with a random UUID.
    pub fn new(command: impl Into<String>, max_retries: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            error_message: String::new(),
            exit_code: None,
            output: String::new(),
        }
    }

    /// The delay in seconds before the next attempt: `base^attempts`,
    /// clamped so the schedule can never overflow a timestamp.
    pub fn backoff_delay_secs(&self, base: i64) -> i64 {
        let base = base.max(1);
        let Ok(exponent) = u32::try_from(self.attempts) else {
            return MAX_BACKOFF_SECS;
        };
        match base.checked_pow(exponent) {
            Some(delay) if delay <= MAX_BACKOFF_SECS => delay,
            _ => MAX_BACKOFF_SECS,
        }
    }
}

/// Payload accepted by `enqueue`: either a raw shell command, or a JSON
/// object `{"id": …, "command": …, "max_retries": …}` with the id and the
/// retry cap optional.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// Caller-supplied id; a fresh UUID is used when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// The command to execute.
    pub command: String,
    /// Per-job attempt cap; defaults to [`DEFAULT_MAX_RETRIES`].
    #[serde(default)]
    pub max_retries: Option<i64>,
}

impl EnqueueRequest {
    /// Interpret raw CLI input. Anything that is not a valid JSON request
    /// object is taken verbatim as the shell command.
    pub fn parse(input: &str) -> Self {
        serde_json::from_str(input).unwrap_or_else(|_| Self {
            id: None,
            command: input.to_owned(),
            max_retries: None,
        })
    }

    /// Build the job record, filling in defaults.
    pub fn into_job(self) -> crate::errors::Result<Job> {
        if self.command.is_empty() {
            return Err(crate::errors::QueueError::EmptyCommand);
        }
        let mut job = Job::new(self.command, self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES));
        if let Some(id) = self.id {
            job.id = id;
        }
        Ok(job)
    }
}
