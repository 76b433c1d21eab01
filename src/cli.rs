//! Command-line surface: argument parsing, table rendering, handlers.

use crate::job::{EnqueueRequest, Job, JobState};
use crate::runner::WorkerPool;
use crate::signal;
use crate::storage::Store;
use anyhow::bail;
use clap::{Parser, Subcommand};
use std::fmt::Write;
use std::path::PathBuf;

const DEFAULT_DATABASE_PATH: &str = "./data/queuectl.db";

/// Background job queue with retries and a dead-letter queue.
#[derive(Debug, Parser)]
#[command(name = "queuectl", version, about)]
pub struct Cli {
    /// Path to the queue database.
    #[arg(long, default_value = DEFAULT_DATABASE_PATH)]
    pub database: PathBuf,

    /// The operation to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Enqueue a new job.
    Enqueue {
        /// A raw shell command, or a JSON object
        /// `{"id": …, "command": …, "max_retries": …}`.
        job: String,
    },
    /// List jobs by state.
    List {
        /// Job state to filter by.
        #[arg(long, short, default_value = "pending")]
        state: JobState,
    },
    /// Show queue status.
    Status,
    /// Manage worker processes.
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Manage the dead-letter queue.
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Get or set configuration values.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Worker management subcommands.
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Start workers and run until interrupted.
    Start {
        /// Number of workers to start.
        #[arg(long, short, default_value_t = 1)]
        count: usize,
    },
}

/// Dead-letter queue subcommands.
#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// List dead jobs.
    List,
    /// Reset a dead job back to PENDING for another round of attempts.
    Retry {
        /// Id of the dead job.
        id: String,
    },
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print a configuration value.
    Get {
        /// Configuration key.
        key: String,
    },
    /// Update a configuration value.
    Set {
        /// Configuration key; one of max-retries, backoff-base, job-timeout.
        key: String,
        /// New value.
        value: String,
    },
}

/// Open the store and dispatch the parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(parent) = cli.database.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store = Store::open(&cli.database).await?;
    let mut pool = WorkerPool::new(store.clone());

    match cli.command {
        Command::Enqueue { job } => enqueue(&store, &job).await,
        Command::List { state } => list(&store, state).await,
        Command::Status => status(&store, &pool).await,
        Command::Worker {
            command: WorkerCommand::Start { count },
        } => worker_start(&store, &mut pool, count).await,
        Command::Dlq { command } => match command {
            DlqCommand::List => dlq_list(&store).await,
            DlqCommand::Retry { id } => dlq_retry(&store, &id).await,
        },
        Command::Config { command } => match command {
            ConfigCommand::Get { key } => config_get(&store, &key).await,
            ConfigCommand::Set { key, value } => config_set(&store, &key, &value).await,
        },
    }
}

async fn enqueue(store: &Store, input: &str) -> anyhow::Result<()> {
    let job = EnqueueRequest::parse(input).into_job()?;
    store.save_job(&job).await?;
    println!("Job enqueued: {}", job.id);
    Ok(())
}

async fn list(store: &Store, state: JobState) -> anyhow::Result<()> {
    let jobs = store.find_jobs_by_state(state).await?;
    println!("{}", render_job_table(&jobs));
    Ok(())
}

// Worker counts are per-process; a standalone status invocation reports
// its own (idle) pool.
async fn status(store: &Store, pool: &WorkerPool) -> anyhow::Result<()> {
    let summary = store.status_summary().await?;

    println!("{}", "═".repeat(38));
    println!("           Queue Status");
    println!("{}", "─".repeat(38));
    for state in JobState::ALL {
        let count = summary.get(&state).copied().unwrap_or(0);
        println!("  {:<12} {count:>6} jobs", state.to_string());
    }
    println!("{}", "─".repeat(38));
    println!("  Active workers: {}", pool.active_worker_count());
    println!("{}", "═".repeat(38));

    Ok(())
}

async fn worker_start(store: &Store, pool: &mut WorkerPool, count: usize) -> anyhow::Result<()> {
    if count == 0 {
        bail!("count must be greater than 0");
    }

    // Jobs orphaned in PROCESSING by a previous crash become runnable
    // again before any worker starts polling.
    store.recover_stuck().await?;

    pool.start(count);
    println!("Started {count} worker(s), press Ctrl+C to stop…");

    let shutdown = signal::shutdown();
    shutdown.cancelled().await;

    println!("Shutting down workers gracefully…");
    pool.stop().await;

    Ok(())
}

async fn dlq_list(store: &Store) -> anyhow::Result<()> {
    let jobs = store.find_jobs_by_state(JobState::Dead).await?;
    println!("{}", render_dlq_table(&jobs));
    Ok(())
}

async fn dlq_retry(store: &Store, id: &str) -> anyhow::Result<()> {
    let job = store.retry_dead_job(id).await?;
    println!("Job requeued: {}", job.id);
    Ok(())
}

async fn config_get(store: &Store, key: &str) -> anyhow::Result<()> {
    match store.get_config(key).await? {
        Some(value) => {
            println!("{key} = {value}");
            Ok(())
        }
        None => bail!("config key not found: {key}"),
    }
}

async fn config_set(store: &Store, key: &str, value: &str) -> anyhow::Result<()> {
    store.set_config(key, value).await?;
    println!("Config updated: {key} = {value}");
    Ok(())
}

fn render_job_table(jobs: &[Job]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "═".repeat(106));
    let _ = writeln!(
        out,
        "{:<36} | {:<40} | {:<12} | {:<8}",
        "ID", "Command", "State", "Attempts"
    );
    let _ = writeln!(out, "{}", "─".repeat(106));

    for job in jobs {
        let _ = writeln!(
            out,
            "{:<36} | {:<40} | {:<12} | {:<8}",
            job.id,
            truncate(&job.command, 40),
            job.state.to_string(),
            job.attempts
        );
    }

    let _ = writeln!(out, "{}", "═".repeat(106));
    let _ = write!(out, "Total: {} jobs", jobs.len());
    out
}

fn render_dlq_table(jobs: &[Job]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "═".repeat(106));
    let _ = writeln!(out, "Dead Letter Queue");
    let _ = writeln!(out, "{}", "─".repeat(106));
    let _ = writeln!(
        out,
        "{:<36} | {:<35} | {:<8} | {:<18}",
        "ID", "Command", "Attempts", "Error"
    );
    let _ = writeln!(out, "{}", "─".repeat(106));

    for job in jobs {
        let _ = writeln!(
            out,
            "{:<36} | {:<35} | {:<8} | {:<18}",
            job.id,
            truncate(&job.command, 35),
            job.attempts,
            truncate(&job.error_message, 18)
        );
    }

    let _ = writeln!(out, "{}", "═".repeat(106));
    let _ = write!(out, "Total dead jobs: {}", jobs.len());
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let prefix: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{prefix}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_parses_state_case_insensitively() {
        let cli = Cli::try_parse_from(["queuectl", "list", "--state", "DEAD"])
            .expect("parse should succeed");
        match cli.command {
            Command::List { state } => assert_eq!(state, JobState::Dead),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn worker_start_defaults_to_one_worker() {
        let cli = Cli::try_parse_from(["queuectl", "worker", "start"]).expect("parse");
        match cli.command {
            Command::Worker {
                command: WorkerCommand::Start { count },
            } => assert_eq!(count, 1),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn job_table_lists_every_row() {
        let mut job = Job::new("echo hello", 3);
        job.id = "0b5c9d2e-0000-0000-0000-000000000000".to_owned();
        let table = render_job_table(&[job]);

        assert!(table.contains("0b5c9d2e-0000-0000-0000-000000000000"));
        assert!(table.contains("echo hello"));
        assert!(table.contains("PENDING"));
        assert!(table.contains("Total: 1 jobs"));
    }

    #[test]
    fn long_commands_are_truncated_for_display() {
        let long = "x".repeat(60);
        let truncated = truncate(&long, 40);
        assert_eq!(truncated.chars().count(), 40);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate("short", 40), "short");
    }
}
