//! The worker pool: spawning, counting, and gracefully stopping workers.

use crate::storage::Store;
use crate::worker::Worker;
use futures_util::future::join_all;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// A pool of concurrent worker tasks polling the store for runnable jobs.
///
/// The stop signal is a one-way street: once [`stop`](Self::stop) has been
/// called, build a fresh pool to start workers again.
#[derive(Debug)]
pub struct WorkerPool {
    store: Store,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    active_workers: usize,
    poll_interval: Duration,
    jitter: Duration,
}

impl WorkerPool {
    /// Create a pool over the given store with default polling settings.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
            active_workers: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
        }
    }

    /// Set how often idle workers poll for new jobs.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum random jitter added to idle polls.
    ///
    /// Jitter spreads out the wakeups of workers that went idle at the
    /// same moment, so they do not hammer the store in lockstep.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Launch `count` worker tasks.
    pub fn start(&mut self, count: usize) {
        self.active_workers = count;

        for i in 1..=count {
            let name = format!("worker-{i}");
            info!(worker.name = %name, "Starting worker…");

            let worker = Worker {
                store: self.store.clone(),
                shutdown: self.shutdown.clone(),
                poll_interval: self.poll_interval,
                jitter: self.jitter,
            };

            let span = info_span!("worker", worker.name = %name);
            let handle = tokio::spawn(async move { worker.run().instrument(span).await });

            self.handles.push(handle);
        }
    }

    /// Signal every worker to exit at its next poll boundary and wait for
    /// all of them to finish. Workers in the middle of a job complete it,
    /// including the write-back, before exiting.
    pub async fn stop(&mut self) {
        info!("Stopping workers…");
        self.shutdown.cancel();

        join_all(self.handles.drain(..))
            .await
            .into_iter()
            .for_each(|result| {
                if let Err(error) = result {
                    warn!(%error, "Worker task panicked");
                }
            });

        info!("All workers stopped");
    }

    /// The most recently requested worker count.
    pub fn active_worker_count(&self) -> usize {
        self.active_workers
    }
}
