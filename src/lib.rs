#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod errors;
pub mod executor;
/// Job records and lifecycle states.
pub mod job;
pub mod retry;
pub mod runner;
pub mod signal;
/// Durable persistence for jobs and configuration.
pub mod storage;
mod worker;

/// Error type shared by the queue core.
pub use self::errors::QueueError;
/// The job entity and its state machine.
pub use self::job::{Job, JobState};
/// The pool of concurrent workers.
pub use self::runner::WorkerPool;
/// Handle to the queue database.
pub use self::storage::Store;
