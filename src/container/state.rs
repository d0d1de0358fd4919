//! Runtime-reported container state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of one container instance as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    /// No container process exists
    Stopped,
    /// Container is running (or transitioning while alive)
    Running,
    /// Container processes are frozen
    Frozen,
}

impl ContainerState {
    /// Wire/status spelling, e.g. `"RUNNING"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Stopped => "STOPPED",
            ContainerState::Running => "RUNNING",
            ContainerState::Frozen => "FROZEN",
        }
    }

    /// Interpret `lxc-info -sH` output.
    ///
    /// Transitional LXC states (`STARTING`, `STOPPING`, `FREEZING`, `THAWED`,
    /// `ABORTING`) all mean a live container that has not reached a resting
    /// state, so they fold into [`ContainerState::Running`].
    pub fn from_runtime_output(output: &str) -> Option<Self> {
        match output.trim() {
            "STOPPED" => Some(ContainerState::Stopped),
            "FROZEN" => Some(ContainerState::Frozen),
            "RUNNING" | "STARTING" | "STOPPING" | "FREEZING" | "THAWED" | "ABORTING" => {
                Some(ContainerState::Running)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(ContainerState::Stopped),
            "RUNNING" => Ok(ContainerState::Running),
            "FROZEN" => Ok(ContainerState::Frozen),
            other => Err(format!("unknown container state '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_output_parsing() {
        assert_eq!(
            ContainerState::from_runtime_output("RUNNING\n"),
            Some(ContainerState::Running)
        );
        assert_eq!(
            ContainerState::from_runtime_output("FROZEN"),
            Some(ContainerState::Frozen)
        );
        assert_eq!(
            ContainerState::from_runtime_output("  STOPPED  "),
            Some(ContainerState::Stopped)
        );
        assert_eq!(
            ContainerState::from_runtime_output("FREEZING"),
            Some(ContainerState::Running)
        );
        assert_eq!(ContainerState::from_runtime_output("garbage"), None);
    }

    #[test]
    fn test_wire_spelling() {
        assert_eq!(ContainerState::Frozen.to_string(), "FROZEN");
        assert_eq!("RUNNING".parse::<ContainerState>(), Ok(ContainerState::Running));
        assert!("running".parse::<ContainerState>().is_err());
        assert_eq!(
            serde_json::to_string(&ContainerState::Stopped).unwrap(),
            "\"STOPPED\""
        );
    }
}
