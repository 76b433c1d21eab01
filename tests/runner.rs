#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]

use chrono::{Duration as TimeDelta, Utc};
use claims::assert_ok;
use queuectl::{Job, JobState, Store, WorkerPool};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

async fn open_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Store::open(dir.path().join("queue.db"))
        .await
        .expect("open store");
    (store, dir)
}

/// A pool tuned for fast polling so tests stay quick.
fn test_pool(store: &Store) -> WorkerPool {
    WorkerPool::new(store.clone())
        .poll_interval(Duration::from_millis(50))
        .jitter(Duration::from_millis(10))
}

async fn wait_for_state(store: &Store, id: &str, state: JobState, deadline: Duration) -> Job {
    let started = tokio::time::Instant::now();
    loop {
        if let Some(job) = store.find_job_by_id(id).await.expect("find job") {
            if job.state == state {
                return job;
            }
        }
        assert!(
            started.elapsed() < deadline,
            "job {id} did not reach {state} within {deadline:?}"
        );
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn enqueued_command_runs_to_completion() {
    let (store, _dir) = open_store().await;

    let job = Job::new("echo hi", 3);
    assert_ok!(store.save_job(&job).await);

    let mut pool = test_pool(&store);
    pool.start(1);

    let done = wait_for_state(&store, &job.id, JobState::Completed, Duration::from_secs(15)).await;
    assert_eq!(done.exit_code, Some(0));
    assert_eq!(done.error_message, "");
    assert!(done.output.contains("hi"));

    pool.stop().await;
}

#[tokio::test]
async fn failing_job_retries_until_it_succeeds() {
    let (store, dir) = open_store().await;
    assert_ok!(store.set_config("backoff-base", "1").await);

    // Fails on the first two runs, succeeds on the third.
    let counter = dir.path().join("count");
    let command = format!(
        "N=$(cat {path} 2>/dev/null || echo 0); N=$((N+1)); echo $N > {path}; [ \"$N\" -ge 3 ]",
        path = counter.display()
    );

    let job = Job::new(command, 5);
    assert_ok!(store.save_job(&job).await);

    let mut pool = test_pool(&store);
    pool.start(1);

    let done = wait_for_state(&store, &job.id, JobState::Completed, Duration::from_secs(30)).await;
    assert_eq!(done.attempts, 2);
    assert_eq!(done.exit_code, Some(0));
    assert_eq!(done.error_message, "");

    pool.stop().await;
}

#[tokio::test]
async fn exhausted_job_lands_in_the_dead_letter_queue() {
    let (store, _dir) = open_store().await;
    assert_ok!(store.set_config("backoff-base", "1").await);

    let job = Job::new("false", 2);
    assert_ok!(store.save_job(&job).await);

    let mut pool = test_pool(&store);
    pool.start(1);

    let dead = wait_for_state(&store, &job.id, JobState::Dead, Duration::from_secs(30)).await;
    assert_eq!(dead.attempts, 2);
    assert_eq!(dead.exit_code, Some(1));
    assert_eq!(dead.error_message, "");

    let dlq = assert_ok!(store.find_jobs_by_state(JobState::Dead).await);
    assert_eq!(dlq.len(), 1);

    pool.stop().await;
}

#[tokio::test]
async fn timed_out_job_is_killed_and_exiled() {
    let (store, _dir) = open_store().await;
    assert_ok!(store.set_config("job-timeout", "1").await);

    let job = Job::new("sleep 30", 1);
    assert_ok!(store.save_job(&job).await);

    let mut pool = test_pool(&store);
    pool.start(1);

    let dead = wait_for_state(&store, &job.id, JobState::Dead, Duration::from_secs(15)).await;
    assert_eq!(dead.attempts, 1);
    assert_eq!(dead.exit_code, Some(-1));
    assert_eq!(dead.error_message, "Timeout");

    pool.stop().await;
}

#[tokio::test]
async fn recovered_jobs_are_picked_up_and_finished() {
    let (store, _dir) = open_store().await;

    // A previous process died mid-flight, leaving the row in PROCESSING.
    let mut job = Job::new("echo recovered", 3);
    job.state = JobState::Processing;
    assert_ok!(store.save_job(&job).await);

    let recovered = assert_ok!(store.recover_stuck().await);
    assert_eq!(recovered, 1);

    let mut pool = test_pool(&store);
    pool.start(1);

    let done = wait_for_state(&store, &job.id, JobState::Completed, Duration::from_secs(15)).await;
    assert!(done.output.contains("recovered"));

    pool.stop().await;
}

#[tokio::test]
async fn dlq_retry_makes_the_job_runnable_again() {
    let (store, _dir) = open_store().await;

    let mut job = Job::new("echo second-chance", 3);
    job.state = JobState::Dead;
    job.attempts = 3;
    job.error_message = "Timeout".to_owned();
    job.exit_code = Some(-1);
    assert_ok!(store.save_job(&job).await);

    let retried = assert_ok!(store.retry_dead_job(&job.id).await);
    assert_eq!(retried.state, JobState::Pending);
    assert_eq!(retried.attempts, 0);

    let mut pool = test_pool(&store);
    pool.start(1);

    let done = wait_for_state(&store, &job.id, JobState::Completed, Duration::from_secs(15)).await;
    assert_eq!(done.attempts, 0);
    assert_eq!(done.exit_code, Some(0));
    assert!(done.output.contains("second-chance"));

    pool.stop().await;
}

#[tokio::test]
async fn future_scheduled_jobs_wait_their_turn() {
    let (store, _dir) = open_store().await;

    let mut job = Job::new("echo eventually", 3);
    job.scheduled_at = Some(Utc::now() + TimeDelta::seconds(2));
    assert_ok!(store.save_job(&job).await);

    let mut pool = test_pool(&store);
    pool.start(1);

    // Well before the schedule, the job must still be untouched.
    sleep(Duration::from_millis(500)).await;
    let early = store
        .find_job_by_id(&job.id)
        .await
        .expect("find job")
        .expect("job exists");
    assert_eq!(early.state, JobState::Pending);

    wait_for_state(&store, &job.id, JobState::Completed, Duration::from_secs(15)).await;

    pool.stop().await;
}

#[tokio::test]
async fn stop_finishes_the_in_flight_job_first() {
    let (store, _dir) = open_store().await;

    let job = Job::new("sleep 1", 3);
    assert_ok!(store.save_job(&job).await);

    let mut pool = test_pool(&store);
    pool.start(1);

    wait_for_state(&store, &job.id, JobState::Processing, Duration::from_secs(10)).await;
    pool.stop().await;

    // The worker completed the job (including the write-back) before
    // honoring the stop signal.
    let done = store
        .find_job_by_id(&job.id)
        .await
        .expect("find job")
        .expect("job exists");
    assert_eq!(done.state, JobState::Completed);
}

#[tokio::test]
async fn pool_reports_the_requested_worker_count() {
    let (store, _dir) = open_store().await;

    let mut pool = test_pool(&store);
    assert_eq!(pool.active_worker_count(), 0);

    pool.start(3);
    assert_eq!(pool.active_worker_count(), 3);

    pool.stop().await;
    assert_eq!(pool.active_worker_count(), 3);
}

#[tokio::test]
async fn two_workers_never_run_the_same_job_twice() {
    let (store, dir) = open_store().await;

    // Every executed job appends its id to the log; concurrent claiming
    // must not produce duplicate lines.
    let log = dir.path().join("runs.log");
    let mut ids = Vec::new();
    for i in 0..5 {
        let job = Job::new(format!("echo job-{i} >> {}", log.display()), 3);
        ids.push(job.id.clone());
        assert_ok!(store.save_job(&job).await);
    }

    let mut pool = test_pool(&store);
    pool.start(4);

    for id in &ids {
        wait_for_state(&store, id, JobState::Completed, Duration::from_secs(30)).await;
    }
    pool.stop().await;

    let runs = std::fs::read_to_string(&log).expect("read run log");
    let mut lines: Vec<&str> = runs.lines().collect();
    assert_eq!(lines.len(), 5);
    lines.sort_unstable();
    lines.dedup();
    assert_eq!(lines.len(), 5, "a job was executed more than once");
}
