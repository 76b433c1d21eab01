//! Error types shared by the queue core.

use crate::job::JobState;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

/// Errors surfaced by the queue core.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The underlying storage engine failed. Workers treat these as
    /// transient and retry after their poll sleep.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Applying the schema migrations failed. Fatal to the process.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// No job exists with the given id.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A DLQ retry was requested for a job that is not DEAD.
    #[error("job {id} is not in the dead-letter queue (current state: {state})")]
    NotInDeadLetterQueue {
        /// Id of the job the retry was requested for.
        id: String,
        /// The state the job was actually in.
        state: JobState,
    },

    /// An unrecognized configuration key was passed to `config set`.
    #[error("invalid config key `{0}` (valid keys: max-retries, backoff-base, job-timeout)")]
    InvalidConfigKey(String),

    /// An enqueue request carried an empty command string.
    #[error("job command must not be empty")]
    EmptyCommand,
}
