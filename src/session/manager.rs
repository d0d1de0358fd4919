//! The per-user Session Manager.
//!
//! It owns no authoritative session state. On login it builds one session
//! record per configured index and asks the container service to start each
//! of them; on the way out it asks for every one of them to be stopped. The
//! remaining lifecycle verbs are forwarded to the container service.

use super::environment::{SessionEnvironment, density_from, host_density};
use super::{Result, SessionError, SessionFields, SessionId};
use crate::cli::ManagerConfig;
use crate::container::ContainerError;
use crate::executor::CommandExecutor;
use crate::ipc::{LifecycleService, PeerCredentials, ServiceScope, SocketServer};
use async_trait::async_trait;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A user-scoped helper service the Session Manager stops alongside its
/// containers.
///
/// The binary registers none: hardware passthrough and clipboard helpers
/// run outside this crate. Embedders that host such helpers in-process
/// register them with [`SessionManager::with_auxiliary`] so a session stop
/// takes them down too.
#[async_trait]
pub trait AuxiliaryService: Send + Sync {
    fn name(&self) -> &str;
    async fn stop(&self) -> Result<()>;
}

pub struct SessionManager {
    config: ManagerConfig,
    container: Arc<dyn LifecycleService>,
    environment: SessionEnvironment,
    executor: Arc<dyn CommandExecutor>,
    auxiliary: Vec<Arc<dyn AuxiliaryService>>,
    background_start: bool,
    shutdown: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(
        config: ManagerConfig,
        container: Arc<dyn LifecycleService>,
        environment: SessionEnvironment,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            container,
            environment,
            executor,
            auxiliary: Vec::new(),
            background_start: true,
            shutdown,
        }
    }

    pub fn with_auxiliary(mut self, service: Arc<dyn AuxiliaryService>) -> Self {
        self.auxiliary.push(service);
        self
    }

    pub fn with_background_start(mut self, background_start: bool) -> Self {
        self.background_start = background_start;
        self
    }

    /// Configured session indices.
    pub fn session_ids(&self) -> Range<SessionId> {
        0..self.config.num_sessions
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once the manager has been told to stop its loop.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.shutdown.subscribe();
        async move {
            while !*receiver.borrow_and_update() {
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Start a container for every configured index.
    ///
    /// Stops at the first failure and stops the containers already started
    /// for earlier indices, so either every session comes up or none stays
    /// up. The caller is expected to exit.
    ///
    /// # Errors
    ///
    /// Environment errors from [`SessionEnvironment::build_session`] or
    /// [`SessionError::StartRejected`] when the container service refuses
    /// or cannot be reached.
    pub async fn start_all(&self) -> Result<Vec<(SessionId, u32)>> {
        info!("Starting sessions");

        let host_value = host_density(self.executor.as_ref()).await;
        let density = density_from(
            host_value.as_deref(),
            self.environment.grid_unit_px.as_deref(),
        );
        let caller = self.environment.credentials();

        let mut started = Vec::new();
        for session_id in self.session_ids() {
            match self.start_one(&caller, session_id, density).await {
                Ok(pid) => started.push((session_id, pid)),
                Err(e) => {
                    self.roll_back(&started).await;
                    return Err(e);
                }
            }
        }

        Ok(started)
    }

    async fn start_one(
        &self,
        caller: &PeerCredentials,
        session_id: SessionId,
        density: u32,
    ) -> Result<u32> {
        info!(session_id, "Starting session");
        let session = self
            .environment
            .build_session(session_id, density, self.background_start)
            .await?;

        let pid = self
            .container
            .start(caller, session_id, session.to_fields())
            .await
            .map_err(|source| SessionError::StartRejected { session_id, source })?;
        info!(session_id, pid, "Container started");
        Ok(pid)
    }

    async fn roll_back(&self, started: &[(SessionId, u32)]) {
        for (session_id, _) in started.iter().rev() {
            warn!(session_id, "Stopping session started before the failure");
            if let Err(e) = self.container.stop(*session_id, false).await {
                warn!(session_id, "Container stop failed: {}", e);
            }
        }
    }

    /// Stop one session's container, then the auxiliary services, then the loop.
    pub async fn stop(&self, session_id: SessionId) -> Result<()> {
        if let Err(e) = self.container.stop(session_id, false).await {
            warn!(session_id, "Container stop failed: {}", e);
        }
        self.stop_auxiliary().await;
        self.signal_shutdown();
        Ok(())
    }

    /// Termination handler: stop every configured session, then the loop.
    pub async fn terminate(&self) {
        info!("Stopping all sessions");
        for session_id in self.session_ids() {
            if let Err(e) = self.container.stop(session_id, false).await {
                debug!(session_id, "Container stop failed: {}", e);
            }
        }
        self.stop_auxiliary().await;
        self.signal_shutdown();
    }

    async fn stop_auxiliary(&self) {
        for service in &self.auxiliary {
            if let Err(e) = service.stop().await {
                warn!("Failed to stop {}: {}", service.name(), e);
            }
        }
    }

    fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Serve the session socket until stopped or `termination` fires.
    ///
    /// On termination the socket closes first, then every configured
    /// session is stopped.
    pub async fn serve<F>(self: Arc<Self>, server: SocketServer, termination: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let stopped = self.shutdown_signal();
        let terminated = server
            .serve(self.clone(), async move {
                tokio::select! {
                    _ = stopped => false,
                    _ = termination => true,
                }
            })
            .await?;

        if terminated {
            info!("Caught termination signal");
            self.terminate().await;
        }
        Ok(())
    }
}

/// Ask the session service to stop `session_id`, falling back to the
/// container service when no session service is running.
pub async fn request_stop(
    session_service: &dyn LifecycleService,
    container_service: &dyn LifecycleService,
    session_id: SessionId,
) -> Result<()> {
    match session_service.stop(session_id, false).await {
        Ok(()) => Ok(()),
        Err(ContainerError::TransportUnavailable(reason)) => {
            debug!("Session service unavailable ({}), stopping container directly", reason);
            container_service
                .stop(session_id, true)
                .await
                .map_err(SessionError::from)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LifecycleService for SessionManager {
    fn scope(&self) -> ServiceScope {
        ServiceScope::User
    }

    async fn ping(&self) -> crate::container::Result<()> {
        Ok(())
    }

    async fn start(
        &self,
        caller: &PeerCredentials,
        session_id: SessionId,
        fields: SessionFields,
    ) -> crate::container::Result<u32> {
        self.container.start(caller, session_id, fields).await
    }

    async fn stop(&self, session_id: SessionId, _quit_session: bool) -> crate::container::Result<()> {
        SessionManager::stop(self, session_id)
            .await
            .map_err(|e| ContainerError::Runtime(e.to_string()))
    }

    /// Only this user's configured sessions are stopped.
    async fn stop_all(&self, _quit_session: bool) -> crate::container::Result<()> {
        self.terminate().await;
        Ok(())
    }

    async fn freeze(&self, session_id: SessionId) -> crate::container::Result<()> {
        self.container.freeze(session_id).await
    }

    async fn unfreeze(&self, session_id: SessionId) -> crate::container::Result<()> {
        self.container.unfreeze(session_id).await
    }

    async fn get_session(&self, session_id: SessionId) -> crate::container::Result<SessionFields> {
        self.container.get_session(session_id).await
    }

    async fn restart(&self, session_id: SessionId) -> crate::container::Result<()> {
        self.container.restart(session_id).await
    }
}
