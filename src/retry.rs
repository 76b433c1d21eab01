//! Retry accounting and dead-letter transitions.

use crate::executor::ExecutionResult;
use crate::job::{Job, JobState};
use chrono::Utc;
use tracing::{info, warn};

/// Decides what happens to a job after a failed attempt: another run with
/// exponential backoff, or exile to the dead-letter queue.
///
/// The per-job `max_retries` is the effective cap; `max_retries` here is
/// the configured fallback for jobs that carry no usable cap of their own.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Fallback attempt cap (the `max-retries` config value).
    pub max_retries: i64,
    /// Exponential backoff base (the `backoff-base` config value).
    pub backoff_base: i64,
}

impl RetryPolicy {
    /// Record a failed attempt on `job` and move it to its next state.
    pub fn apply(&self, job: &mut Job, result: &ExecutionResult) {
        job.attempts += 1;
        job.error_message = result.error.clone();
        job.exit_code = Some(result.exit_code);
        job.output = result.output.clone();

        let cap = if job.max_retries > 0 {
            job.max_retries
        } else {
            self.max_retries
        };

        if job.attempts >= cap {
            job.state = JobState::Dead;
            job.scheduled_at = None;
            warn!(
                job.id = %job.id,
                attempts = job.attempts,
                "Job exhausted its retries, moving to the dead-letter queue"
            );
        } else {
            let delay = job.backoff_delay_secs(self.backoff_base);
            job.scheduled_at = Some(Utc::now() + chrono::Duration::seconds(delay));
            job.state = JobState::Pending;
            info!(job.id = %job.id, attempts = job.attempts, delay, "Job scheduled for retry");
        }
    }
}
