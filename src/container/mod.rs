//! Container lifecycle orchestration.
//!
//! This module owns everything the privileged container service does to a
//! host: it tracks sessions, checks who is asking, and drives the external
//! collaborators (LXC, the network script, mounts, device permissions) in a
//! fixed order to bring a session's container up or tear it down.
//!
//! ## Architecture
//!
//! - [`state`]: runtime-reported container state
//! - [`runtime`]: container runtime adapter (LXC tools)
//! - [`host`]: driver, permission, network, filesystem, protocol and hardware adapters
//! - [`wait`]: bounded polling until a runtime transition completes
//! - [`manager`]: the Container Manager itself
//!
//! ## Usage
//!
//! ```rust,no_run
//! use waydroid_manager::cli::ManagerConfig;
//! use waydroid_manager::container::{ContainerManager, HostAdapters};
//! use waydroid_manager::executor::HostExecutor;
//! use waydroid_manager::ipc::PeerCredentials;
//! use waydroid_manager::session::SessionFields;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ManagerConfig::default();
//!     let adapters = HostAdapters::from_config(&config, Arc::new(HostExecutor::new()));
//!     let manager = ContainerManager::new(config, adapters);
//!
//!     let mut fields = SessionFields::new();
//!     fields.insert("user_id".into(), "1000".into());
//!     fields.insert("pid".into(), "555".into());
//!
//!     let caller = PeerCredentials { uid: 1000, gid: 1000, pid: Some(555) };
//!     let pid = manager.start(&caller, 0, fields).await?;
//!     println!("container init pid {}", pid);
//!
//!     manager.stop(0, false).await?;
//!     Ok(())
//! }
//! ```

pub mod host;
pub mod manager;
pub mod runtime;
pub mod state;
pub mod wait;

pub use host::{
    BinderProtocol, ChmodPermissions, DriverAdapter, FilesystemAdapter, HardwareAdapter,
    HostAdapters, KernelDrivers, MountFilesystem, NetworkAdapter, NetworkScript, NullHardware,
    OwnerSignal, PermissionAdapter, ProtocolAdapter, SigtermOwner,
};
pub use manager::{ContainerManager, TeardownFailure, TeardownReport, TeardownStep};
pub use runtime::{LxcRuntime, RuntimeAdapter};
pub use state::ContainerState;
pub use wait::{WaitPolicy, wait_for_state};

use crate::executor::ExecutorError;
use crate::session::SessionId;
use std::time::Duration;

/// Container lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Caller identity does not match the session it asked to start
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A session with this id is already running
    #[error("Already tracking a session {0}")]
    AlreadyTracked(SessionId),

    /// No tracked session with this id
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// The peer service could not be reached
    #[error("Service unavailable: {0}")]
    TransportUnavailable(String),

    /// Another instance already answers on the service socket
    #[error("Service already running on {0}")]
    AlreadyRunning(std::path::PathBuf),

    /// A runtime transition did not complete in time
    #[error("Session {session_id} did not reach {target} within {waited:?}")]
    RuntimeTransitionTimeout {
        session_id: SessionId,
        target: ContainerState,
        waited: Duration,
    },

    /// Session fields could not be interpreted
    #[error("Invalid session fields: {0}")]
    InvalidSession(String),

    /// An adapter step failed
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Malformed request or response on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Host command failed
    #[error("Command error: {0}")]
    Executor(#[from] ExecutorError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
