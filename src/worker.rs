use crate::executor::{self, ExecutionResult};
use crate::job::{Job, JobState};
use crate::retry::RetryPolicy;
use crate::storage::Store;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

pub(crate) struct Worker {
    pub(crate) store: Store,
    pub(crate) shutdown: CancellationToken,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
}

impl Worker {
    /// Poll for runnable jobs until the stop signal arrives. The signal is
    /// only observed at poll boundaries; an in-flight job always finishes,
    /// bounded by its own execution timeout.
    pub(crate) async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                debug!("Stop signal received, shutting down the worker…");
                break;
            }

            match self.store.acquire_next_pending().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    trace!("No runnable jobs found, polling again…");
                    self.idle_sleep().await;
                }
                Err(error) => {
                    error!(%error, "Failed to acquire a job");
                    self.idle_sleep().await;
                }
            }
        }
    }

    /// Sleep until the next poll, waking early when the stop signal
    /// arrives. The top of the loop observes the cancellation.
    ///
    /// The pause is stretched by a random share of the configured jitter
    /// so idle workers drift apart instead of polling in lockstep.
    async fn idle_sleep(&self) {
        let stretch = self.jitter.mul_f64(rand::thread_rng().gen_range(0.0..=1.0));
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = sleep(self.poll_interval + stretch) => {}
        }
    }

    /// Run one acquired job to its next state and persist the outcome.
    async fn process(&self, mut job: Job) {
        let span = info_span!("job", job.id = %job.id);

        async {
            debug!(command = %job.command, "Running job…");

            let timeout = executor::timeout_from_secs(self.store.job_timeout_secs().await);
            let result = executor::execute(&job.command, timeout).await;

            if result.success {
                complete(&mut job, &result);
            } else {
                let policy = RetryPolicy {
                    max_retries: self.store.max_retries().await,
                    backoff_base: self.store.backoff_base().await,
                };
                policy.apply(&mut job, &result);
            }

            job.updated_at = Utc::now();
            if let Err(error) = self.store.save_job(&job).await {
                // Startup recovery re-pends the row if this write is lost.
                warn!(%error, "Failed to persist job outcome");
            }
        }
        .instrument(span)
        .await;
    }
}

fn complete(job: &mut Job, result: &ExecutionResult) {
    job.state = JobState::Completed;
    job.exit_code = Some(result.exit_code);
    job.output = result.output.clone();
    job.error_message.clear();
    info!("Job completed");
}
