//! External process execution with captured output and a hard timeout.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use devtunnels_core::{DevTunnelsConfig, Error, ErrorCode, Logger, Result};

const COMPONENT: &str = "CommandRunner";

/// Outcome of a single external process execution.
///
/// An exit code of 0 does not by itself mean the command did what was
/// asked; callers inspect `stdout`/`stderr` as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns external commands.
///
/// `execute` spawns exactly one process per call. It fails with
/// `CLI_NOT_FOUND` when the program does not exist, `CLI_COMMAND_FAILED` when
/// it cannot be spawned or awaited, and `PROCESS_TIMEOUT` when it outlives
/// `timeout` (the child is terminated first). A zero `timeout` waits forever.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, program: &Path, args: &[&str], timeout: Duration)
    -> Result<CommandResult>;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    logger: Arc<Logger>,
    /// Grace period between SIGTERM and SIGKILL on timeout.
    cleanup_timeout: Duration,
}

impl ProcessRunner {
    pub const fn new(logger: Arc<Logger>, cleanup_timeout: Duration) -> Self {
        Self {
            logger,
            cleanup_timeout,
        }
    }

    /// Runner with the configured termination grace period.
    pub const fn from_config(config: &DevTunnelsConfig, logger: Arc<Logger>) -> Self {
        Self::new(logger, config.cleanup_timeout())
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::from_config(&DevTunnelsConfig::default(), Logger::global())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(
        &self,
        program: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandResult> {
        let cmd_line = format!("{} {}", program.display(), args.join(" "));
        self.logger
            .debug(COMPONENT, format!("Executing command: {}", cmd_line.trim_end()));

        let mut child = build_command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let code = if e.kind() == std::io::ErrorKind::NotFound {
                    ErrorCode::CliNotFound
                } else {
                    ErrorCode::CliCommandFailed
                };
                Error::cli(code, format!("Command execution failed: {cmd_line}")).with_source(e)
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        // Draining counts against the timeout: a grandchild can hold the pipes open.
        let completion = async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_stream(stdout), read_stream(stderr));
            status.map(|status| (status, stdout, stderr))
        };

        let finished = if timeout.is_zero() {
            Ok(completion.await)
        } else {
            tokio::time::timeout(timeout, completion).await
        };

        let (status, stdout, stderr) = match finished {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                return Err(Error::cli(
                    ErrorCode::CliCommandFailed,
                    format!("Failed to wait for command: {cmd_line}"),
                )
                .with_source(e));
            }
            Err(_) => {
                self.logger.warn(
                    COMPONENT,
                    format!("Command timed out after {}ms, terminating", timeout.as_millis()),
                );
                terminate(&mut child, self.cleanup_timeout).await;
                return Err(Error::process(
                    ErrorCode::ProcessTimeout,
                    format!("Command timed out after {}ms: {cmd_line}", timeout.as_millis()),
                ));
            }
        };

        let result = CommandResult {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            // Signal-terminated processes have no code.
            exit_code: status.code().unwrap_or(0),
        };

        self.logger.debug_with(
            COMPONENT,
            format!("Command completed with exit code: {}", result.exit_code),
            json!({ "stdout": result.stdout, "stderr": result.stderr }),
        );
        Ok(result)
    }
}

#[cfg(windows)]
fn build_command(program: &Path, args: &[&str]) -> Command {
    // npm and friends are .cmd shims that only resolve through the shell.
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(program).args(args);
    cmd
}

#[cfg(not(windows))]
fn build_command(program: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGTERM, then SIGKILL once `grace` expires.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                tracing::warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::warn!("Grace period expired, sending SIGKILL");
        let _ = child.kill().await;
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Instant;

    use devtunnels_core::LogLevel;

    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(
            Arc::new(Logger::with_level(100, LogLevel::Debug)),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn captures_trimmed_stdout_and_stderr() {
        let result = runner()
            .execute(
                Path::new("sh"),
                &["-c", "echo '  hello  '; echo oops >&2"],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "oops");
        assert!(result.success());
    }

    #[tokio::test]
    async fn reports_non_zero_exit_without_error() {
        let result = runner()
            .execute(Path::new("sh"), &["-c", "echo nope >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "nope");
        assert!(!result.success());
    }

    #[tokio::test]
    async fn missing_program_is_cli_not_found() {
        let err = runner()
            .execute(
                Path::new("definitely-not-a-real-binary-xyz"),
                &["--version"],
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CliNotFound);
        assert_eq!(err.component(), "CLI");
    }

    #[tokio::test]
    async fn timeout_kills_child_and_returns_timeout_error() {
        let started = Instant::now();
        let err = runner()
            .execute(Path::new("sleep"), &["10"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.code(), ErrorCode::ProcessTimeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_covers_output_held_open_by_grandchild() {
        let started = Instant::now();
        let err = runner()
            .execute(
                Path::new("sh"),
                &["-c", "sleep 4 & echo hi"],
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProcessTimeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn zero_timeout_waits_for_completion() {
        let result = runner()
            .execute(Path::new("sh"), &["-c", "sleep 0.1; echo done"], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(result.stdout, "done");
    }

    #[test]
    fn grace_period_comes_from_config() {
        let config = DevTunnelsConfig {
            cleanup_timeout_ms: 250,
            ..DevTunnelsConfig::default()
        };
        let runner = ProcessRunner::from_config(&config, Arc::new(Logger::new(10)));
        assert_eq!(runner.cleanup_timeout, Duration::from_millis(250));
        assert_eq!(ProcessRunner::default().cleanup_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn logs_invocation_at_debug() {
        let logger = Arc::new(Logger::with_level(100, LogLevel::Debug));
        let runner = ProcessRunner::new(Arc::clone(&logger), Duration::from_millis(200));
        runner
            .execute(Path::new("echo"), &["hi"], Duration::from_secs(5))
            .await
            .unwrap();
        let entries = logger.entries(Some(COMPONENT), None);
        assert!(entries[0].message.contains("Executing command: echo hi"));
        assert!(entries[1].message.contains("exit code: 0"));
    }
}
