//! Cancellable external tool execution
//!
//! Every adapter that shells out goes through [`ToolCommand`]. A run races
//! three things: the child exiting, the cancellation token firing, and the
//! deadline passing. On cancellation or deadline the child receives SIGTERM,
//! gets `termination_grace` to exit, and is then killed.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use vigil_core::config::AdapterSettings;
use vigil_core::domain::AdapterError;

/// Default time between SIGTERM and SIGKILL
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// How much of stderr to keep in failure messages
const STDERR_TAIL_BYTES: usize = 2_000;

/// Captured output of a finished tool
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

/// Builder for one external tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    tool: String,
    program: String,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    success_codes: Vec<i32>,
    termination_grace: Duration,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            success_codes: vec![0],
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Exit codes treated as success. Several scanners exit non-zero when
    /// they find something.
    pub fn success_codes(mut self, codes: &[i32]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    pub fn termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    /// Spawn the tool and wait for it, honoring cancellation and the deadline.
    #[instrument(skip_all, fields(tool = %self.tool, program = %self.program))]
    pub async fn run(
        self,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<ToolOutput, AdapterError> {
        if cancel.is_cancelled() {
            return Err(AdapterError::cancelled(&self.tool));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        debug!(args = ?self.args, "Spawning tool");
        let started = Instant::now();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AdapterError::unavailable(
                    &self.tool,
                    format!("{} not found", self.program),
                ));
            }
            Err(e) => {
                return Err(AdapterError::failure(
                    &self.tool,
                    format!("failed to spawn {}: {}", self.program, e),
                ));
            }
        };

        let stdout = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let status = tokio::select! {
            biased;
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                terminate(&mut child, self.termination_grace).await;
                debug!("Tool terminated after cancellation");
                return Err(AdapterError::cancelled(&self.tool));
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                terminate(&mut child, self.termination_grace).await;
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, "Tool exceeded deadline");
                return Err(AdapterError::timed_out(&self.tool, started.elapsed()));
            }
        };

        let status = status.map_err(|e| {
            AdapterError::failure(&self.tool, format!("failed to wait for process: {}", e))
        })?;

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let elapsed = started.elapsed();

        let Some(code) = status.code() else {
            // Killed by a signal we did not send: the tool crashed.
            return Err(AdapterError::unavailable(
                &self.tool,
                format!("process terminated abnormally ({})", status),
            ));
        };

        if !self.success_codes.contains(&code) {
            return Err(AdapterError::ExecutionFailure {
                tool: self.tool,
                exit_code: Some(code),
                message: stderr_tail(&stderr),
            });
        }

        debug!(
            exit_code = code,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_bytes = stdout.len(),
            "Tool finished"
        );

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code: Some(code),
            elapsed,
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Failed to read tool output stream");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(handle: Option<tokio::task::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// Ask the child to stop, then force it.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(grace, child.wait()).await.is_ok()
        {
            return;
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill tool process");
    }
}

/// Shared per-adapter tool state: which binary to run and its cached version.
#[derive(Debug)]
pub struct ToolRuntime {
    tool: &'static str,
    binary: String,
    termination_grace: Duration,
    version: OnceCell<Option<String>>,
}

impl ToolRuntime {
    pub fn new(tool: &'static str, default_binary: &str) -> Self {
        Self {
            tool,
            binary: default_binary.to_string(),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            version: OnceCell::new(),
        }
    }

    pub fn from_settings(
        tool: &'static str,
        default_binary: &str,
        settings: &AdapterSettings,
        termination_grace: Duration,
    ) -> Self {
        Self {
            binary: settings
                .binary
                .clone()
                .unwrap_or_else(|| default_binary.to_string()),
            termination_grace,
            ..Self::new(tool, default_binary)
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Presence check on `PATH` (or the configured absolute path).
    pub fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(self.tool, &self.binary).termination_grace(self.termination_grace)
    }

    /// First non-empty line printed by `<binary> <args>`, cached after the first call.
    pub async fn version(&self, args: &[&str]) -> Option<String> {
        self.version
            .get_or_init(|| async {
                let output = Command::new(&self.binary)
                    .args(args)
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .output();
                match tokio::time::timeout(Duration::from_secs(10), output).await {
                    Ok(Ok(out)) => {
                        let text = if out.stdout.is_empty() {
                            String::from_utf8_lossy(&out.stderr).into_owned()
                        } else {
                            String::from_utf8_lossy(&out.stdout).into_owned()
                        };
                        text.lines()
                            .map(str::trim)
                            .find(|l| !l.is_empty())
                            .map(str::to_string)
                    }
                    _ => None,
                }
            })
            .await
            .clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = ToolCommand::new("echo", "sh")
            .args(["-c", "echo hello"])
            .run(&CancellationToken::new(), far_deadline())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_unavailable() {
        let err = ToolCommand::new("ghost", "definitely-not-a-real-binary-vigil")
            .run(&CancellationToken::new(), far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unexpected_exit_code_is_execution_failure() {
        let err = ToolCommand::new("sh", "sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run(&CancellationToken::new(), far_deadline())
            .await
            .unwrap_err();
        match err {
            AdapterError::ExecutionFailure {
                exit_code, message, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accepted_nonzero_exit_code() {
        let out = ToolCommand::new("sh", "sh")
            .args(["-c", "exit 1"])
            .success_codes(&[0, 1])
            .run(&CancellationToken::new(), far_deadline())
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_deadline_produces_timed_out() {
        let started = Instant::now();
        let err = ToolCommand::new("sleep", "sleep")
            .arg("30")
            .termination_grace(Duration::from_millis(200))
            .run(
                &CancellationToken::new(),
                Instant::now() + Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_stops_process_within_grace() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ToolCommand::new("sleep", "sleep")
            .arg("30")
            .termination_grace(Duration::from_millis(500))
            .run(&cancel, far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ToolCommand::new("sh", "sh")
            .args(["-c", "exit 0"])
            .run(&cancel, far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled { .. }));
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = "x".repeat(STDERR_TAIL_BYTES + 100);
        let tail = stderr_tail(&long);
        assert!(tail.starts_with("..."));
        assert_eq!(tail.len(), STDERR_TAIL_BYTES + 3);
    }
}
