//! Shell command execution

use crate::error::ProcessError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a shell command line in a working directory.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command_line: &str, cwd: Option<&Path>)
        -> Result<CommandOutput, ProcessError>;
}

/// Runs commands through `sh -c`, capturing stdout and stderr.
#[derive(Debug, Clone, Default)]
pub struct ShellProcessRunner {
    timeout: Option<Duration>,
}

impl ShellProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn build_command(command_line: &str, cwd: Option<&Path>) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(
        &self,
        command_line: &str,
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, ProcessError> {
        debug!(command = %command_line, cwd = ?cwd, "running command");

        let child = Self::build_command(command_line, cwd)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command_line.to_string(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command = %command_line, secs = limit.as_secs(), "command timed out");
                    return Err(ProcessError::TimedOut {
                        command: command_line.to_string(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| ProcessError::Spawn {
            command: command_line.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                command: command_line.to_string(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}
