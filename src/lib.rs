//! # Waydroid Manager
//!
//! Lifecycle services for isolated Android runtime containers on a Linux
//! host. A privileged, system-wide container service tracks one container
//! per session, checks who is asking, and drives LXC, the network script,
//! image mounts and device permissions in a fixed order. A per-user session
//! service brings that user's sessions up on login and makes sure none of
//! them outlive it.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: the Container Manager, its runtime and host adapters,
//!   and bounded state waits
//! - **[`session`]**: session records, the registry, environment discovery and
//!   the Session Manager
//! - **[`ipc`]**: the shared lifecycle interface, wire protocol and Unix-socket
//!   transport with peer credentials
//! - **[`prop`]**: property access that is transparent to freezing
//! - **[`executor`]**: host command execution used by every adapter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waydroid_manager::cli::ManagerConfig;
//! use waydroid_manager::ipc::{LifecycleService, RemoteService, ServiceScope};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ManagerConfig::default();
//!     let container = RemoteService::new(&config.container_socket, ServiceScope::System);
//!
//!     let session = container.get_session(0).await?;
//!     println!("session 0 is {:?}", session.get("state"));
//!     Ok(())
//! }
//! ```

/// Container lifecycle orchestration.
///
/// The Container Manager and the adapters it drives during bring-up and
/// teardown.
pub mod container;

/// Session records and the per-user Session Manager.
pub mod session;

/// Lifecycle service interface and Unix-socket transport.
pub mod ipc;

/// Freeze-transparent property access.
pub mod prop;

/// Host command execution.
pub mod executor;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and derives the per-session host paths
/// used throughout the application.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use container::{ContainerError, ContainerManager, ContainerState, HostAdapters};
pub use ipc::{LifecycleService, PeerCredentials, RemoteService, ServiceScope};
pub use session::{Session, SessionError, SessionFields, SessionId, SessionManager};
