//! Test executor that records commands instead of running them.

use super::{CommandExecutor, ExecutionCommand, ExecutionResult, ExecutorError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct RecordingExecutor {
    commands: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, (i32, String)>>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply to every command whose rendered form starts with `prefix`.
    pub(crate) fn respond(&self, prefix: &str, exit_code: i32, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(prefix.to_string(), (exit_code, stdout.to_string()));
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: ExecutionCommand) -> Result<ExecutionResult, ExecutorError> {
        let rendered = command.to_string();
        self.commands.lock().unwrap().push(rendered.clone());

        let responses = self.responses.lock().unwrap();
        let (exit_code, stdout) = responses
            .iter()
            .filter(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, reply)| reply.clone())
            .unwrap_or((0, String::new()));

        Ok(ExecutionResult {
            stdout,
            stderr: if exit_code == 0 { String::new() } else { "failed".to_string() },
            exit_code,
            duration: Duration::from_millis(1),
        })
    }

    async fn spawn(&self, command: ExecutionCommand) -> Result<u32, ExecutorError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(4242)
    }

    fn executor_type(&self) -> &'static str {
        "recording"
    }
}
