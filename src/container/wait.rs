//! Bounded status-convergence waits.
//!
//! Runtime transitions (stop, freeze, unfreeze) are asynchronous on the LXC
//! side: the command returns before the container reaches the new state.
//! Callers poll the runtime status with exponential backoff until the target
//! state is observed or the policy's deadline passes.

use super::runtime::RuntimeAdapter;
use super::{ContainerError, ContainerState, Result};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How long and how often to poll for a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Give up after this many milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// First delay between polls
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    500
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl WaitPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before poll number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms.max(self.initial_backoff_ms)),
        )
    }
}

/// Poll `runtime` until `session_id` reports `target`.
///
/// # Errors
///
/// Returns [`ContainerError::RuntimeTransitionTimeout`] once the policy's
/// timeout elapses, or the status query's own error.
pub async fn wait_for_state(
    runtime: &dyn RuntimeAdapter,
    session_id: SessionId,
    target: ContainerState,
    policy: &WaitPolicy,
) -> Result<()> {
    let started = Instant::now();
    let deadline = started + policy.timeout();
    let mut attempt = 0;

    loop {
        let state = runtime.status(session_id).await?;
        if state == target {
            debug!(
                session_id,
                %target,
                attempts = attempt + 1,
                "Runtime reached target state"
            );
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ContainerError::RuntimeTransitionTimeout {
                session_id,
                target,
                waited: now - started,
            });
        }

        let delay = policy.backoff(attempt).min(deadline - now);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
