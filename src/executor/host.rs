//! Native host command execution.
//!
//! Executes commands directly on the host system using `tokio::process::Command`.

use super::{CommandExecutor, ExecutionCommand, ExecutionResult, ExecutorError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Executes commands directly on the host system
#[derive(Debug, Clone)]
pub struct HostExecutor;

impl HostExecutor {
    /// Create a new host executor
    pub fn new() -> Self {
        Self
    }

    fn build(cmd: &ExecutionCommand) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);

        if let Some(ref dir) = cmd.working_dir {
            command.current_dir(dir);
        }

        command
    }
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for HostExecutor {
    async fn execute(&self, cmd: ExecutionCommand) -> Result<ExecutionResult, ExecutorError> {
        debug!("Executing command on host: {}", cmd);

        let start = Instant::now();

        let mut command = Self::build(&cmd);
        command.stdin(Stdio::null()).kill_on_drop(true);

        let output_future = command.output();

        // Execute command with optional timeout
        let output = if let Some(timeout) = cmd.timeout {
            match tokio::time::timeout(timeout, output_future).await {
                Ok(result) => result.map_err(|source| ExecutorError::Spawn {
                    program: cmd.program.clone(),
                    source,
                })?,
                Err(_) => {
                    return Err(ExecutorError::Timeout(timeout));
                }
            }
        } else {
            output_future.await.map_err(|source| ExecutorError::Spawn {
                program: cmd.program.clone(),
                source,
            })?
        };

        let duration = start.elapsed();

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration,
        })
    }

    async fn spawn(&self, cmd: ExecutionCommand) -> Result<u32, ExecutorError> {
        debug!("Spawning background command on host: {}", cmd);

        let mut command = Self::build(&cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
            program: cmd.program.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| {
            ExecutorError::IoError(std::io::Error::other(format!(
                "{} exited before its pid could be read",
                cmd.program
            )))
        })?;

        let program = cmd.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("{} (pid {}) exited: {}", program, pid, status),
                Err(e) => warn!("Failed to wait on {} (pid {}): {}", program, pid, e),
            }
        });

        Ok(pid)
    }

    fn executor_type(&self) -> &'static str {
        "host"
    }
}
