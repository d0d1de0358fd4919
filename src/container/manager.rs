//! The privileged Container Manager.
//!
//! Owns the session [`Registry`] and is the only thing that mutates it.
//! Every verb takes the registry lock for its whole duration, so calls are
//! handled one at a time exactly as a serialized dispatch loop would.

use super::host::HostAdapters;
use super::wait::wait_for_state;
use super::{ContainerError, ContainerState, Result};
use crate::cli::ManagerConfig;
use crate::env;
use crate::ipc::{ControlTarget, LifecycleService, PeerCredentials, ServiceScope};
use crate::session::{Registry, Session, SessionFields, SessionId};
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Check whether `caller` may start `session`.
///
/// Root may start any session. Anyone else must be the session's declared
/// user and must be calling from the session's declared owner process.
///
/// # Errors
///
/// Returns [`ContainerError::PermissionDenied`] on either mismatch.
pub fn authorize(caller: &PeerCredentials, session: &Session) -> Result<()> {
    if caller.is_privileged() {
        return Ok(());
    }

    if session.user_id != Some(caller.uid) {
        return Err(ContainerError::PermissionDenied(
            "Cannot start a session on behalf of another user".to_string(),
        ));
    }

    match caller.pid {
        Some(pid) if session.owner_pid == Some(pid) => Ok(()),
        _ => Err(ContainerError::PermissionDenied(
            "Invalid session pid".to_string(),
        )),
    }
}

/// Teardown step that can fail without failing `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    RuntimeStop,
    Hardware,
    Network,
    Rootfs,
    LegacyData,
    OwnerSignal,
}

impl TeardownStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::RuntimeStop => "runtime_stop",
            TeardownStep::Hardware => "hardware",
            TeardownStep::Network => "network",
            TeardownStep::Rootfs => "rootfs",
            TeardownStep::LegacyData => "legacy_data",
            TeardownStep::OwnerSignal => "owner_signal",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub error: String,
}

/// Failures suppressed while tearing one session down.
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub session_id: SessionId,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, step: TeardownStep) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }

    fn record(&mut self, step: TeardownStep, result: Result<()>) {
        if let Err(e) = result {
            // Legacy unbind fails whenever the bind was never made
            if step == TeardownStep::LegacyData {
                debug!(session_id = self.session_id, step = %step, "Suppressed teardown failure: {}", e);
            } else {
                warn!(session_id = self.session_id, step = %step, "Suppressed teardown failure: {}", e);
            }
            self.failures.push(TeardownFailure {
                step,
                error: e.to_string(),
            });
        }
    }
}

/// System-wide lifecycle service for every session on the host.
pub struct ContainerManager {
    config: ManagerConfig,
    adapters: HostAdapters,
    registry: Mutex<Registry>,
    /// Set once shutdown begins; later starts are refused
    closed: AtomicBool,
}

impl ContainerManager {
    pub fn new(config: ManagerConfig, adapters: HostAdapters) -> Self {
        Self {
            config,
            adapters,
            registry: Mutex::new(Registry::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Ids of all tracked sessions, ascending.
    pub async fn tracked_ids(&self) -> Vec<SessionId> {
        self.registry.lock().await.ids()
    }

    pub async fn is_tracked(&self, session_id: SessionId) -> bool {
        self.registry.lock().await.contains(session_id)
    }

    /// Outstanding freeze requests for a tracked session.
    pub async fn freeze_holds(&self, session_id: SessionId) -> Option<u32> {
        self.registry
            .lock()
            .await
            .get(session_id)
            .map(|tracked| tracked.freeze_holds)
    }

    /// Check that `caller` may change `target`.
    ///
    /// Root may change anything. Other callers may act only on sessions
    /// started for their own uid, and never on every session at once.
    /// Untracked ids pass so the verb itself reports them unknown.
    ///
    /// # Errors
    ///
    /// [`ContainerError::PermissionDenied`].
    pub async fn authorize_control(&self, caller: &PeerCredentials, target: ControlTarget) -> Result<()> {
        if caller.is_privileged() {
            return Ok(());
        }

        let session_id = match target {
            ControlTarget::One(session_id) => session_id,
            ControlTarget::All => {
                return Err(ContainerError::PermissionDenied(
                    "Only root may stop every session".to_string(),
                ));
            }
        };

        match self.registry.lock().await.get(session_id) {
            Some(tracked) if tracked.session.user_id != Some(caller.uid) => {
                Err(ContainerError::PermissionDenied(format!(
                    "Session {} belongs to another user",
                    session_id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Authorize the caller, bring the container up and start tracking it.
    ///
    /// A failing bring-up step aborts the rest and is returned as-is. Steps
    /// that already ran are not undone. Any `state` or `container_pid` in
    /// `fields` is ignored; both come from the runtime.
    ///
    /// # Errors
    ///
    /// [`ContainerError::PermissionDenied`] if the caller does not own the
    /// session, [`ContainerError::AlreadyTracked`] if the id is live,
    /// [`ContainerError::TransportUnavailable`] once shutdown has begun, or
    /// the first failing step's error.
    pub async fn start(
        &self,
        caller: &PeerCredentials,
        session_id: SessionId,
        fields: SessionFields,
    ) -> Result<u32> {
        let mut session = Session::from_fields(&fields)?;
        session.state = None;
        session.container_pid = None;
        authorize(caller, &session)?;

        let mut registry = self.registry.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContainerError::TransportUnavailable(
                "container service is shutting down".to_string(),
            ));
        }
        if registry.contains(session_id) {
            return Err(ContainerError::AlreadyTracked(session_id));
        }

        info!(session_id, uid = caller.uid, "Starting session");
        let pid = self.bring_up(session_id, &session).await?;

        session.container_pid = Some(pid);
        session.state = Some(ContainerState::Running);
        registry.insert(session_id, session)?;
        info!(session_id, pid, "Session started");
        Ok(pid)
    }

    async fn bring_up(&self, session_id: SessionId, session: &Session) -> Result<u32> {
        let adapters = &self.adapters;

        if adapters.runtime.status(session_id).await? == ContainerState::Stopped {
            self.load_drivers().await?;
        }

        let binder_nodes = adapters.drivers.binder_nodes();
        adapters
            .permissions
            .set_mode(&binder_nodes, env::devices::BINDER_MODE)
            .await?;
        let hardware_nodes = adapters.permissions.hardware_nodes().await;
        adapters
            .permissions
            .set_mode(&hardware_nodes, env::devices::HARDWARE_MODE)
            .await?;
        debug!(session_id, "Device permissions set");

        adapters.network.start(session_id).await?;
        debug!(session_id, "Network up");

        adapters
            .runtime
            .generate_session_config(session_id, session)
            .await?;

        if !adapters.runtime.supports_session_config(session_id).await? {
            let data_dir = session.data_dir.as_deref().ok_or_else(|| {
                ContainerError::InvalidSession(
                    "legacy container config requires a data directory".to_string(),
                )
            })?;
            info!(session_id, "Resident config predates sessions, binding legacy data path");
            adapters
                .filesystem
                .bind_legacy_data(session_id, data_dir)
                .await?;
        }

        adapters
            .filesystem
            .mount_rootfs(session_id, &self.config.images_path, session)
            .await?;
        debug!(session_id, "Rootfs mounted");

        adapters.protocol.set_default_version(session_id).await?;

        adapters.runtime.start(session_id).await
    }

    async fn load_drivers(&self) -> Result<()> {
        let drivers = &self.adapters.drivers;

        if self.config.is_mainline() {
            if let Err(e) = drivers.probe_binder().await {
                error!("Failed to load Binder driver: {}", e);
            }
            if let Err(e) = drivers.probe_ashmem().await {
                warn!("Failed to load ashmem driver: {}", e);
            }
        }
        drivers.load_binder_nodes().await
    }

    /// Stop tracking a session and tear its container down.
    ///
    /// Teardown is best-effort: each step runs regardless of earlier
    /// failures, and failures are logged and returned in the report.
    ///
    /// # Errors
    ///
    /// Only [`ContainerError::UnknownSession`] when the id is not tracked.
    pub async fn stop(&self, session_id: SessionId, quit_session: bool) -> Result<TeardownReport> {
        let mut registry = self.registry.lock().await;
        let tracked = registry
            .remove(session_id)
            .ok_or(ContainerError::UnknownSession(session_id))?;

        info!(
            session_id,
            quit_session,
            uptime_secs = (Utc::now() - tracked.started_at).num_seconds(),
            "Stopping session"
        );
        Ok(self.teardown(session_id, &tracked.session, quit_session).await)
    }

    /// Stop every tracked session. Never fails.
    pub async fn stop_all(&self, quit_session: bool) -> Vec<TeardownReport> {
        let mut registry = self.registry.lock().await;
        info!("Stopping all containers");

        let mut reports = Vec::new();
        for session_id in registry.ids() {
            if let Some(tracked) = registry.remove(session_id) {
                info!(session_id, "Stopping session");
                reports.push(self.teardown(session_id, &tracked.session, quit_session).await);
            }
        }
        registry.clear_placeholders();
        reports
    }

    /// Refuse further starts, then stop every tracked session.
    ///
    /// A start already holding the registry finishes first and is stopped
    /// with the rest.
    pub async fn shutdown(&self, quit_session: bool) -> Vec<TeardownReport> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Container service shutting down");
        self.stop_all(quit_session).await
    }

    async fn teardown(&self, session_id: SessionId, session: &Session, quit_session: bool) -> TeardownReport {
        let adapters = &self.adapters;
        let mut report = TeardownReport::new(session_id);

        report.record(TeardownStep::RuntimeStop, self.stop_runtime(session_id).await);
        report.record(TeardownStep::Hardware, adapters.hardware.stop(session_id).await);
        report.record(TeardownStep::Network, adapters.network.stop(session_id).await);
        report.record(
            TeardownStep::Rootfs,
            adapters.filesystem.umount_rootfs(session_id).await,
        );
        report.record(
            TeardownStep::LegacyData,
            adapters.filesystem.unbind_legacy_data(session_id).await,
        );

        if quit_session {
            match session.owner_pid {
                Some(pid) => report.record(TeardownStep::OwnerSignal, adapters.owner.terminate(pid)),
                None => debug!(session_id, "No owner pid to signal"),
            }
        }

        report
    }

    async fn stop_runtime(&self, session_id: SessionId) -> Result<()> {
        let runtime = self.adapters.runtime.as_ref();
        if runtime.status(session_id).await? == ContainerState::Stopped {
            return Ok(());
        }
        runtime.stop(session_id).await?;
        wait_for_state(runtime, session_id, ContainerState::Stopped, &self.config.wait).await
    }

    /// Freeze a running session, or add a hold to a frozen one.
    ///
    /// # Errors
    ///
    /// [`ContainerError::UnknownSession`], the runtime's error, or
    /// [`ContainerError::RuntimeTransitionTimeout`].
    pub async fn freeze(&self, session_id: SessionId) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let tracked = registry
            .get_mut(session_id)
            .ok_or(ContainerError::UnknownSession(session_id))?;
        let runtime = self.adapters.runtime.as_ref();

        let state = runtime.status(session_id).await?;
        tracked.session.state = Some(state);
        match state {
            ContainerState::Running => {
                runtime.freeze(session_id).await?;
                wait_for_state(runtime, session_id, ContainerState::Frozen, &self.config.wait).await?;
                tracked.freeze_holds = 1;
                tracked.session.state = Some(ContainerState::Frozen);
                info!(session_id, "Container frozen");
            }
            ContainerState::Frozen => {
                tracked.freeze_holds += 1;
                debug!(session_id, holds = tracked.freeze_holds, "Container already frozen");
            }
            ContainerState::Stopped => {
                error!(session_id, "Container is {}", state);
            }
        }
        Ok(())
    }

    /// Release one freeze hold; the container thaws when none remain.
    ///
    /// # Errors
    ///
    /// Same as [`ContainerManager::freeze`].
    pub async fn unfreeze(&self, session_id: SessionId) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let tracked = registry
            .get_mut(session_id)
            .ok_or(ContainerError::UnknownSession(session_id))?;
        let runtime = self.adapters.runtime.as_ref();

        let state = runtime.status(session_id).await?;
        tracked.session.state = Some(state);
        if state != ContainerState::Frozen {
            debug!(session_id, "Container is {}, nothing to unfreeze", state);
            return Ok(());
        }

        tracked.freeze_holds = tracked.freeze_holds.saturating_sub(1);
        if tracked.freeze_holds > 0 {
            debug!(session_id, holds = tracked.freeze_holds, "Container stays frozen");
            return Ok(());
        }

        runtime.unfreeze(session_id).await?;
        wait_for_state(runtime, session_id, ContainerState::Running, &self.config.wait).await?;
        tracked.session.state = Some(ContainerState::Running);
        info!(session_id, "Container unfrozen");
        Ok(())
    }

    /// Current record of a session with its state refreshed from the runtime.
    ///
    /// Unknown ids fall through to [`ContainerManager::touch_session`].
    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionFields> {
        let mut registry = self.registry.lock().await;

        if !registry.contains(session_id) {
            return Ok(touch(&mut registry, session_id));
        }

        let state = self.adapters.runtime.status(session_id).await?;
        let tracked = registry
            .get_mut(session_id)
            .ok_or(ContainerError::UnknownSession(session_id))?;
        tracked.session.state = Some(state);
        debug!(session_id, %state, "Retrieved session");
        Ok(tracked.session.to_fields())
    }

    /// Return the empty placeholder for an untracked id, creating it once.
    ///
    /// Placeholders never count as tracked sessions.
    pub async fn touch_session(&self, session_id: SessionId) -> SessionFields {
        let mut registry = self.registry.lock().await;
        if let Some(tracked) = registry.get(session_id) {
            return tracked.session.to_fields();
        }
        touch(&mut registry, session_id)
    }

    /// Relaunch a running session's container in place.
    ///
    /// # Errors
    ///
    /// [`ContainerError::UnknownSession`] or the runtime's error.
    pub async fn restart(&self, session_id: SessionId) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let tracked = registry
            .get_mut(session_id)
            .ok_or(ContainerError::UnknownSession(session_id))?;
        let runtime = self.adapters.runtime.as_ref();

        let state = runtime.status(session_id).await?;
        if state != ContainerState::Running {
            error!(session_id, "Container is {}", state);
            tracked.session.state = Some(state);
            return Ok(());
        }

        runtime.stop(session_id).await?;
        wait_for_state(runtime, session_id, ContainerState::Stopped, &self.config.wait).await?;
        let pid = runtime.start(session_id).await?;

        tracked.session.container_pid = Some(pid);
        tracked.session.state = Some(ContainerState::Running);
        tracked.freeze_holds = 0;
        info!(session_id, pid, "Container restarted");
        Ok(())
    }
}

fn touch(registry: &mut Registry, session_id: SessionId) -> SessionFields {
    let fresh = registry.placeholder(session_id).is_none();
    let fields = registry.touch(session_id).to_fields();
    if fresh {
        info!(session_id, "Created placeholder session");
    }
    fields
}

#[async_trait]
impl LifecycleService for ContainerManager {
    fn scope(&self) -> ServiceScope {
        ServiceScope::System
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn start(
        &self,
        caller: &PeerCredentials,
        session_id: SessionId,
        fields: SessionFields,
    ) -> Result<u32> {
        ContainerManager::start(self, caller, session_id, fields).await
    }

    async fn stop(&self, session_id: SessionId, quit_session: bool) -> Result<()> {
        ContainerManager::stop(self, session_id, quit_session)
            .await
            .map(|_| ())
    }

    async fn stop_all(&self, quit_session: bool) -> Result<()> {
        ContainerManager::stop_all(self, quit_session).await;
        Ok(())
    }

    async fn freeze(&self, session_id: SessionId) -> Result<()> {
        ContainerManager::freeze(self, session_id).await
    }

    async fn unfreeze(&self, session_id: SessionId) -> Result<()> {
        ContainerManager::unfreeze(self, session_id).await
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionFields> {
        ContainerManager::get_session(self, session_id).await
    }

    async fn restart(&self, session_id: SessionId) -> Result<()> {
        ContainerManager::restart(self, session_id).await
    }

    async fn authorize_control(&self, caller: &PeerCredentials, target: ControlTarget) -> Result<()> {
        ContainerManager::authorize_control(self, caller, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(uid: u32, pid: Option<u32>) -> PeerCredentials {
        PeerCredentials { uid, gid: uid, pid }
    }

    fn session(user_id: u32, owner_pid: u32) -> Session {
        Session {
            user_id: Some(user_id),
            owner_pid: Some(owner_pid),
            ..Default::default()
        }
    }

    #[test]
    fn test_owner_may_start() {
        assert!(authorize(&caller(1000, Some(555)), &session(1000, 555)).is_ok());
    }

    #[test]
    fn test_root_may_start_anything() {
        assert!(authorize(&caller(0, Some(1)), &session(1000, 555)).is_ok());
        assert!(authorize(&caller(0, None), &Session::default()).is_ok());
    }

    #[test]
    fn test_other_user_denied() {
        let result = authorize(&caller(1001, Some(555)), &session(1000, 555));
        assert!(matches!(result, Err(ContainerError::PermissionDenied(_))));
    }

    #[test]
    fn test_wrong_pid_denied() {
        let result = authorize(&caller(1000, Some(556)), &session(1000, 555));
        assert!(matches!(result, Err(ContainerError::PermissionDenied(_))));
    }

    #[test]
    fn test_unidentifiable_pid_denied() {
        let result = authorize(&caller(1000, None), &session(1000, 555));
        assert!(matches!(result, Err(ContainerError::PermissionDenied(_))));
    }

    #[test]
    fn test_undeclared_owner_denied() {
        let result = authorize(&caller(1000, Some(555)), &Session::default());
        assert!(matches!(result, Err(ContainerError::PermissionDenied(_))));
    }

    #[test]
    fn test_report_collects_failures() {
        let mut report = TeardownReport::new(3);
        report.record(TeardownStep::Hardware, Ok(()));
        report.record(
            TeardownStep::Network,
            Err(ContainerError::Runtime("script exited 1".to_string())),
        );

        assert!(!report.is_clean());
        assert!(report.failed(TeardownStep::Network));
        assert!(!report.failed(TeardownStep::Hardware));
        assert_eq!(report.failures[0].step.to_string(), "network");
    }
}
