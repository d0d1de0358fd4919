//! Lifecycle service interface and its Unix-socket transport.
//!
//! The system-wide Container Manager and the per-user Session Manager expose
//! the same verbs, so both implement one [`LifecycleService`] trait. The
//! transport carries newline-delimited JSON requests over a Unix socket and
//! reads the caller's uid and pid from the socket's peer credentials.
//!
//! ## Architecture
//!
//! - [`protocol`]: request/response wire types and error kinds
//! - [`credentials`]: caller identity from `SO_PEERCRED`
//! - [`server`]: accept loop dispatching into any `LifecycleService`
//! - [`client`]: [`RemoteService`], a `LifecycleService` backed by a socket

pub mod client;
pub mod credentials;
pub mod protocol;
pub mod server;

pub use client::RemoteService;
pub use credentials::PeerCredentials;
pub use protocol::{ErrorKind, Request, Response, WireError};
pub use server::{MAX_REQUEST_BYTES, SocketServer};

use crate::container::Result;
use crate::session::{SessionFields, SessionId};
use async_trait::async_trait;
use std::fmt;

/// Which deployment a service instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceScope {
    /// One privileged instance per host
    System,
    /// One instance per logged-in user
    User,
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceScope::System => write!(f, "container"),
            ServiceScope::User => write!(f, "session"),
        }
    }
}

/// What a state-changing verb acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTarget {
    One(SessionId),
    All,
}

/// Lifecycle verbs shared by both services.
///
/// `start` carries the caller's credentials. In-process callers pass their
/// own; the socket server substitutes the peer's, and [`RemoteService`]
/// ignores the argument because the server reads them itself.
#[async_trait]
pub trait LifecycleService: Send + Sync {
    fn scope(&self) -> ServiceScope;

    /// Succeeds while the service is up.
    async fn ping(&self) -> Result<()>;

    async fn start(
        &self,
        caller: &PeerCredentials,
        session_id: SessionId,
        fields: SessionFields,
    ) -> Result<u32>;

    async fn stop(&self, session_id: SessionId, quit_session: bool) -> Result<()>;

    async fn stop_all(&self, quit_session: bool) -> Result<()>;

    async fn freeze(&self, session_id: SessionId) -> Result<()>;

    async fn unfreeze(&self, session_id: SessionId) -> Result<()>;

    async fn get_session(&self, session_id: SessionId) -> Result<SessionFields>;

    async fn restart(&self, session_id: SessionId) -> Result<()>;

    /// Check that `caller` may stop, freeze, unfreeze or restart `target`.
    ///
    /// The socket server calls this before those verbs. Services only their
    /// own user can reach keep the default.
    async fn authorize_control(&self, _caller: &PeerCredentials, _target: ControlTarget) -> Result<()> {
        Ok(())
    }
}
