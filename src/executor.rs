//! Deadline-bounded execution of shell commands.
//!
//! Spawns `sh -c <command>` with piped output, waits for it under a
//! timeout, and maps the outcome onto a flat [`ExecutionResult`]. On
//! deadline expiry the child (and, where supported, its whole process
//! group) is killed and whatever output was captured up to that point is
//! preserved.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// The outcome of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// True iff the child exited with code zero.
    pub success: bool,
    /// The child's exit code; `-1` for timeouts, spawn failures, and
    /// signal-terminated children.
    pub exit_code: i64,
    /// `"Timeout"` on deadline expiry, the I/O error text on spawn
    /// failure, empty otherwise.
    pub error: String,
    /// Combined stdout and stderr, as captured.
    pub output: String,
}

/// Convert a configured timeout in seconds to a deadline. Zero and
/// negative values become an immediate deadline, which the executor
/// reports as a timeout.
pub fn timeout_from_secs(secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}

/// Run `command` under a shell interpreter, bounded by `timeout`.
pub async fn execute(command: &str, timeout: Duration) -> ExecutionResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // The shell leads its own process group, so a timeout can take down
    // everything the command spawned, not just the shell itself.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(error) => {
            return ExecutionResult {
                success: false,
                exit_code: -1,
                error: error.to_string(),
                output: String::new(),
            };
        }
    };

    // Read the pipes in their own tasks so `child.wait()` (which borrows
    // the child mutably) can run concurrently.
    let stdout_task = spawn_reader(child.stdout.take());
    let stderr_task = spawn_reader(child.stderr.take());

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let output = collect_output(stdout_task, stderr_task).await;
            let exit_code = i64::from(status.code().unwrap_or(-1));
            ExecutionResult {
                success: exit_code == 0,
                exit_code,
                error: String::new(),
                output,
            }
        }
        Ok(Err(error)) => {
            let output = collect_output(stdout_task, stderr_task).await;
            ExecutionResult {
                success: false,
                exit_code: -1,
                error: error.to_string(),
                output,
            }
        }
        Err(_elapsed) => {
            // Deadline expired. Kill the child, then reap it so the pipes
            // close and the reader tasks can finish.
            kill(&mut child).await;
            let output = collect_output(stdout_task, stderr_task).await;
            ExecutionResult {
                success: false,
                exit_code: -1,
                error: "Timeout".to_owned(),
                output,
            }
        }
    }
}

/// Forcibly terminate the child. On Unix the kill goes to the whole
/// process group, so grandchildren of compound commands do not outlive
/// the deadline.
async fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if let Ok(pid) = i32::try_from(pid) {
            let _ = nix::sys::signal::killpg(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn spawn_reader<R>(handle: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut handle) = handle {
            let _ = handle.read_to_end(&mut buf).await;
        }
        buf
    })
}

async fn collect_output(stdout: JoinHandle<Vec<u8>>, stderr: JoinHandle<Vec<u8>>) -> String {
    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();

    let mut output = String::from_utf8_lossy(&stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&stderr));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reports_exit_zero() {
        let result = execute("echo hello", Duration::from_secs(5)).await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.error, "");
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_empty_error() {
        let result = execute("exit 42", Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.error, "");
    }

    #[tokio::test]
    async fn stderr_is_captured_alongside_stdout() {
        let result = execute("echo out; echo err 1>&2", Duration::from_secs(5)).await;
        assert!(result.success);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn missing_binary_surfaces_the_shell_exit_code() {
        let result = execute("definitely-not-a-real-binary-xyz", Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 127);
        assert_eq!(result.error, "");
    }

    #[tokio::test]
    async fn deadline_expiry_kills_the_child() {
        let result = execute("sleep 60", Duration::from_millis(200)).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error, "Timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_expiry_kills_the_whole_process_group() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let marker = dir.path().join("survived");

        // The backgrounded subshell is a grandchild of the executor's
        // `sh`; if only the shell were killed, it would live on and drop
        // the marker file after a second.
        let command = format!(
            "(sleep 1; echo alive > {path}) & sleep 30",
            path = marker.display()
        );
        let result = execute(&command, Duration::from_millis(200)).await;
        assert_eq!(result.error, "Timeout");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(
            !marker.exists(),
            "a grandchild process survived the deadline"
        );
    }

    #[tokio::test]
    async fn output_before_the_deadline_is_preserved() {
        let result = execute("echo started; sleep 60", Duration::from_millis(500)).await;
        assert_eq!(result.error, "Timeout");
        assert!(result.output.contains("started"));
    }

    #[tokio::test]
    async fn zero_timeout_is_an_immediate_deadline() {
        let result = execute("echo never", Duration::ZERO).await;
        assert!(!result.success);
        assert_eq!(result.error, "Timeout");
    }

    #[test]
    fn negative_config_timeouts_collapse_to_zero() {
        assert_eq!(timeout_from_secs(-5), Duration::ZERO);
        assert_eq!(timeout_from_secs(0), Duration::ZERO);
        assert_eq!(timeout_from_secs(7), Duration::from_secs(7));
    }
}
