//! # Host Command Execution
//!
//! Every external collaborator this crate drives (LXC tools, the network
//! script, `mount`, `chmod`, `modprobe`) is reached by running a host
//! program. This module is the single seam for doing that, so adapters can
//! be exercised in tests with a recording executor instead of a real host.
//!
//! ## Core Components
//!
//! - **[`CommandExecutor`]**: async trait implemented by anything that runs commands
//! - **[`HostExecutor`]**: runs programs with `tokio::process::Command`
//! - **[`ExecutionCommand`]**: program, arguments, working directory and timeout
//! - **[`ExecutionResult`]**: captured stdout, stderr, exit code and duration
//!
//! ## Execution Flow
//!
//! ```text
//! ExecutionCommand
//!        ↓
//!   CommandExecutor::execute()   (waits, captures output)
//!   CommandExecutor::spawn()     (detaches, returns pid)
//!        ↓
//!  ExecutionResult / pid
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use waydroid_manager::executor::{CommandExecutor, ExecutionCommand, HostExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = HostExecutor::new();
//!
//!     let command = ExecutionCommand::new("lxc-info", vec!["-n".into(), "waydroid".into(), "-sH".into()])
//!         .with_timeout(Duration::from_secs(5));
//!
//!     let result = executor.execute(command).await?;
//!     println!("state: {}", result.stdout.trim());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Host-based command execution.
///
/// Implements [`HostExecutor`] for direct process execution on the
/// host system using `tokio::process::Command`.
pub mod host;

#[cfg(test)]
pub(crate) mod recording;

pub use host::HostExecutor;

/// Result of command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 = success, non-zero = failure)
    pub exit_code: i32,
    /// Duration of command execution
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command executed successfully (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`ExecutorError::NonZeroExit`].
    pub fn check(self, command: &ExecutionCommand) -> Result<Self, ExecutorError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecutorError::NonZeroExit {
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Command to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCommand {
    /// Program name or path to execute
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Working directory for command execution
    pub working_dir: Option<PathBuf>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
}

impl ExecutionCommand {
    /// Create a new command with just program and args
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout: None,
        }
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Set execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for ExecutionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Errors during command execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Program could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program ran but reported failure
    #[error("`{command}` exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Command execution timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Runs host programs on behalf of the adapters.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit status is *not* an error here; callers that care use
    /// [`ExecutionResult::check`].
    async fn execute(&self, command: ExecutionCommand) -> Result<ExecutionResult, ExecutorError>;

    /// Launch a long-lived program in the background and return its pid.
    ///
    /// The child is reaped by the executor once it exits.
    async fn spawn(&self, command: ExecutionCommand) -> Result<u32, ExecutorError>;

    /// Get executor type name for logging
    fn executor_type(&self) -> &'static str;
}
