//! Sessions: the record, the registry that tracks them and the per-user
//! Session Manager that brings them up.

pub mod environment;
pub mod manager;
pub mod record;
pub mod registry;

pub use environment::{SessionEnvironment, density_from, host_density};
pub use manager::{AuxiliaryService, SessionManager, request_stop};
pub use record::{Session, SessionFields, SessionId, keys};
pub use registry::{Registry, TrackedSession};

use crate::container::ContainerError;
use std::path::PathBuf;

/// Session bring-up errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Running without a user environment, typically under sudo
    #[error("XDG_RUNTIME_DIR is not set; please don't start a session with 'sudo'")]
    MissingRuntimeDir,

    #[error("Wayland socket '{}' doesn't exist; are you running a Wayland compositor?", .0.display())]
    MissingWaylandSocket(PathBuf),

    /// The container service refused or could not be reached
    #[error("Failed to start session {session_id}: {source}")]
    StartRejected {
        session_id: SessionId,
        #[source]
        source: ContainerError,
    },

    /// Reported by an [`AuxiliaryService`] that failed to stop
    #[error("Auxiliary service {name} failed: {reason}")]
    Auxiliary { name: String, reason: String },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
