//! In-memory stand-ins for the runtime and host adapters.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use waydroid_manager::cli::ManagerConfig;
use waydroid_manager::container::host::{
    DriverAdapter, FilesystemAdapter, HardwareAdapter, NetworkAdapter, OwnerSignal,
    PermissionAdapter, ProtocolAdapter,
};
use waydroid_manager::container::{
    ContainerError, ContainerManager, ContainerState, HostAdapters, Result, RuntimeAdapter,
    WaitPolicy,
};
use waydroid_manager::executor::{
    CommandExecutor, ExecutionCommand, ExecutionResult, ExecutorError,
};
use waydroid_manager::session::{Session, SessionFields, SessionId, keys};
use waydroid_manager::PeerCredentials;

/// Runtime whose containers change state the moment they are told to.
#[derive(Default)]
pub struct FakeRuntime {
    states: Mutex<HashMap<SessionId, ContainerState>>,
    calls: Mutex<Vec<String>>,
    next_pid: AtomicU32,
    failing: Mutex<HashSet<&'static str>>,
    /// Verbs that succeed but never change state
    stuck: Mutex<HashSet<&'static str>>,
    legacy_config: Mutex<bool>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    pub fn fail(&self, verb: &'static str) {
        self.failing.lock().unwrap().insert(verb);
    }

    pub fn get_stuck(&self, verb: &'static str) {
        self.stuck.lock().unwrap().insert(verb);
    }

    pub fn use_legacy_config(&self) {
        *self.legacy_config.lock().unwrap() = true;
    }

    pub fn set_state(&self, session_id: SessionId, state: ContainerState) {
        self.states.lock().unwrap().insert(session_id, state);
    }

    pub fn state(&self, session_id: SessionId) -> ContainerState {
        self.states
            .lock()
            .unwrap()
            .get(&session_id)
            .copied()
            .unwrap_or(ContainerState::Stopped)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn transition(&self, verb: &'static str, session_id: SessionId, to: ContainerState) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", verb, session_id));
        if self.failing.lock().unwrap().contains(verb) {
            return Err(ContainerError::Runtime(format!("{} failed", verb)));
        }
        if !self.stuck.lock().unwrap().contains(verb) {
            self.set_state(session_id, to);
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    async fn status(&self, session_id: SessionId) -> Result<ContainerState> {
        Ok(self.state(session_id))
    }

    async fn start(&self, session_id: SessionId) -> Result<u32> {
        self.transition("start", session_id, ContainerState::Running)?;
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn stop(&self, session_id: SessionId) -> Result<()> {
        self.transition("stop", session_id, ContainerState::Stopped)
    }

    async fn freeze(&self, session_id: SessionId) -> Result<()> {
        self.transition("freeze", session_id, ContainerState::Frozen)
    }

    async fn unfreeze(&self, session_id: SessionId) -> Result<()> {
        self.transition("unfreeze", session_id, ContainerState::Running)
    }

    async fn generate_session_config(&self, session_id: SessionId, _session: &Session) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("generate_session_config {}", session_id));
        Ok(())
    }

    async fn supports_session_config(&self, _session_id: SessionId) -> Result<bool> {
        Ok(!*self.legacy_config.lock().unwrap())
    }
}

/// Every host adapter in one recorder. Steps are named `<adapter>.<verb>`.
#[derive(Default)]
pub struct FakeHost {
    steps: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    signalled: Mutex<Vec<u32>>,
}

impl FakeHost {
    pub fn fail(&self, step: &'static str) {
        self.failing.lock().unwrap().insert(step);
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }

    pub fn ran(&self, step: &str) -> bool {
        self.steps().iter().any(|s| s.starts_with(step))
    }

    pub fn signalled(&self) -> Vec<u32> {
        self.signalled.lock().unwrap().clone()
    }

    fn step(&self, name: &'static str, detail: impl std::fmt::Display) -> Result<()> {
        self.steps.lock().unwrap().push(format!("{} {}", name, detail));
        if self.failing.lock().unwrap().contains(name) {
            return Err(ContainerError::Runtime(format!("{} failed", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl DriverAdapter for FakeHost {
    async fn probe_binder(&self) -> Result<()> {
        self.step("drivers.probe_binder", "")
    }

    async fn probe_ashmem(&self) -> Result<()> {
        self.step("drivers.probe_ashmem", "")
    }

    async fn load_binder_nodes(&self) -> Result<()> {
        self.step("drivers.load_binder_nodes", "")
    }

    fn binder_nodes(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/dev/binderfs/anbox-binder")]
    }
}

#[async_trait]
impl PermissionAdapter for FakeHost {
    async fn set_mode(&self, paths: &[PathBuf], mode: u32) -> Result<()> {
        self.step("permissions.set_mode", format!("{:o} {}", mode, paths.len()))
    }

    async fn hardware_nodes(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/dev/dri"), PathBuf::from("/dev/fb0")]
    }
}

#[async_trait]
impl NetworkAdapter for FakeHost {
    async fn start(&self, session_id: SessionId) -> Result<()> {
        self.step("network.start", session_id)
    }

    async fn stop(&self, session_id: SessionId) -> Result<()> {
        self.step("network.stop", session_id)
    }
}

#[async_trait]
impl FilesystemAdapter for FakeHost {
    async fn mount_rootfs(&self, session_id: SessionId, _images_path: &Path, _session: &Session) -> Result<()> {
        self.step("filesystem.mount_rootfs", session_id)
    }

    async fn umount_rootfs(&self, session_id: SessionId) -> Result<()> {
        self.step("filesystem.umount_rootfs", session_id)
    }

    async fn bind_legacy_data(&self, session_id: SessionId, _data_dir: &Path) -> Result<()> {
        self.step("filesystem.bind_legacy_data", session_id)
    }

    async fn unbind_legacy_data(&self, session_id: SessionId) -> Result<()> {
        self.step("filesystem.unbind_legacy_data", session_id)
    }
}

#[async_trait]
impl ProtocolAdapter for FakeHost {
    async fn set_default_version(&self, session_id: SessionId) -> Result<()> {
        self.step("protocol.set_default_version", session_id)
    }
}

#[async_trait]
impl HardwareAdapter for FakeHost {
    async fn stop(&self, session_id: SessionId) -> Result<()> {
        self.step("hardware.stop", session_id)
    }
}

impl OwnerSignal for FakeHost {
    fn terminate(&self, pid: u32) -> Result<()> {
        self.step("owner.terminate", pid)?;
        self.signalled.lock().unwrap().push(pid);
        Ok(())
    }
}

/// Executor for code paths that only probe the host; every command fails.
pub struct OfflineExecutor;

#[async_trait]
impl CommandExecutor for OfflineExecutor {
    async fn execute(&self, _command: ExecutionCommand) -> std::result::Result<ExecutionResult, ExecutorError> {
        Ok(ExecutionResult {
            stdout: String::new(),
            stderr: "offline".to_string(),
            exit_code: 1,
            duration: Duration::ZERO,
        })
    }

    async fn spawn(&self, command: ExecutionCommand) -> std::result::Result<u32, ExecutorError> {
        Err(ExecutorError::Spawn {
            program: command.program,
            source: std::io::Error::other("offline"),
        })
    }

    fn executor_type(&self) -> &'static str {
        "offline"
    }
}

pub fn fast_wait() -> WaitPolicy {
    WaitPolicy {
        timeout_ms: 200,
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
    }
}

pub fn test_config(work_dir: &Path) -> ManagerConfig {
    ManagerConfig {
        work_dir: work_dir.to_path_buf(),
        images_path: work_dir.join("images"),
        wait: fast_wait(),
        ..Default::default()
    }
}

/// A Container Manager wired to fakes.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub host: Arc<FakeHost>,
    pub manager: Arc<ContainerManager>,
    pub work_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut ManagerConfig)) -> Self {
        let work_dir = TempDir::new().unwrap();
        let mut config = test_config(work_dir.path());
        adjust(&mut config);

        let runtime = Arc::new(FakeRuntime::new());
        let host = Arc::new(FakeHost::default());
        let adapters = HostAdapters {
            runtime: runtime.clone(),
            drivers: host.clone(),
            permissions: host.clone(),
            network: host.clone(),
            filesystem: host.clone(),
            protocol: host.clone(),
            hardware: host.clone(),
            owner: host.clone(),
        };

        Self {
            runtime,
            host,
            manager: Arc::new(ContainerManager::new(config, adapters)),
            work_dir,
        }
    }

    /// Start `session_id` as its owner would.
    pub async fn start(&self, session_id: SessionId) -> Result<u32> {
        let (caller, fields) = owned_session(1000, 5000 + session_id);
        self.manager.start(&caller, session_id, fields).await
    }
}

/// Credentials and fields for a session owned by `uid` from process `pid`.
pub fn owned_session(uid: u32, pid: u32) -> (PeerCredentials, SessionFields) {
    let mut fields = SessionFields::new();
    fields.insert(keys::USER_NAME.to_string(), "alice".to_string());
    fields.insert(keys::USER_ID.to_string(), uid.to_string());
    fields.insert(keys::GROUP_ID.to_string(), uid.to_string());
    fields.insert(keys::OWNER_PID.to_string(), pid.to_string());
    fields.insert(keys::DATA_DIR.to_string(), "/home/alice/.local/share/waydroid".to_string());
    (
        PeerCredentials {
            uid,
            gid: uid,
            pid: Some(pid),
        },
        fields,
    )
}

pub fn state_of(fields: &SessionFields) -> Option<&str> {
    fields.get(keys::STATE).map(String::as_str)
}
