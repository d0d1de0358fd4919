//! Container runtime adapter.
//!
//! The runtime itself (LXC) is an external collaborator. [`RuntimeAdapter`]
//! is the boundary the Container Manager drives; [`LxcRuntime`] implements
//! it by invoking the `lxc-*` tools against each session's LXC path.

use super::{ContainerError, ContainerState, Result};
use crate::env;
use crate::executor::{CommandExecutor, ExecutionCommand};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Mount point of the user's runtime directory inside the container
const CONTAINER_RUNTIME_DIR: &str = "run/xdg";

/// Wayland display name the container expects
const CONTAINER_WAYLAND_DISPLAY: &str = "wayland-0";

/// Status/start/stop/freeze primitives for one container per session.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Current state of the session's container.
    async fn status(&self, session_id: SessionId) -> Result<ContainerState>;

    /// Launch the container and return the pid of its init process.
    async fn start(&self, session_id: SessionId) -> Result<u32>;

    async fn stop(&self, session_id: SessionId) -> Result<()>;

    async fn freeze(&self, session_id: SessionId) -> Result<()>;

    async fn unfreeze(&self, session_id: SessionId) -> Result<()>;

    /// Write the session-scoped runtime configuration derived from `session`.
    async fn generate_session_config(&self, session_id: SessionId, session: &Session) -> Result<()>;

    /// Whether the resident configuration includes the session-scoped one.
    ///
    /// Configurations written before multi-session support return `false`
    /// and need the legacy data bind.
    async fn supports_session_config(&self, session_id: SessionId) -> Result<bool>;
}

/// LXC-backed runtime adapter.
pub struct LxcRuntime {
    executor: Arc<dyn CommandExecutor>,
    work_dir: PathBuf,
    container_name: String,
    command_timeout: Duration,
}

impl LxcRuntime {
    pub fn new(executor: Arc<dyn CommandExecutor>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            work_dir: work_dir.into(),
            container_name: env::CONTAINER_NAME.to_string(),
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    fn lxc_command(&self, tool: &str, session_id: SessionId, extra: &[&str]) -> ExecutionCommand {
        let mut args = vec![
            "-P".to_string(),
            env::session_lxc_path(&self.work_dir, session_id)
                .to_string_lossy()
                .into_owned(),
            "-n".to_string(),
            self.container_name.clone(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        ExecutionCommand::new(tool, args).with_timeout(self.command_timeout)
    }

    async fn run_checked(&self, command: ExecutionCommand) -> Result<()> {
        let result = self.executor.execute(command.clone()).await?;
        result.check(&command)?;
        Ok(())
    }
}

#[async_trait]
impl RuntimeAdapter for LxcRuntime {
    async fn status(&self, session_id: SessionId) -> Result<ContainerState> {
        let command = self.lxc_command("lxc-info", session_id, &["-sH"]);
        let result = self.executor.execute(command).await?;

        // lxc-info fails for containers that were never defined or started
        if !result.success() {
            debug!(
                session_id,
                "lxc-info exited with {}, treating container as stopped", result.exit_code
            );
            return Ok(ContainerState::Stopped);
        }

        ContainerState::from_runtime_output(&result.stdout).ok_or_else(|| {
            ContainerError::Runtime(format!(
                "unexpected lxc-info output: {}",
                result.stdout.trim()
            ))
        })
    }

    async fn start(&self, session_id: SessionId) -> Result<u32> {
        let mut command = self.lxc_command("lxc-start", session_id, &["-F", "--", "/init"]);
        command.timeout = None;

        let pid = self.executor.spawn(command).await?;
        info!(session_id, pid, "Launched container runtime");
        Ok(pid)
    }

    async fn stop(&self, session_id: SessionId) -> Result<()> {
        self.run_checked(self.lxc_command("lxc-stop", session_id, &["-k"]))
            .await
    }

    async fn freeze(&self, session_id: SessionId) -> Result<()> {
        self.run_checked(self.lxc_command("lxc-freeze", session_id, &[]))
            .await
    }

    async fn unfreeze(&self, session_id: SessionId) -> Result<()> {
        self.run_checked(self.lxc_command("lxc-unfreeze", session_id, &[]))
            .await
    }

    async fn generate_session_config(&self, session_id: SessionId, session: &Session) -> Result<()> {
        let path = env::session_lxc_session_config_file(&self.work_dir, session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = render_session_config(session);
        tokio::fs::write(&path, contents).await?;
        debug!(session_id, "Wrote session config {:?}", path);
        Ok(())
    }

    async fn supports_session_config(&self, session_id: SessionId) -> Result<bool> {
        let path = env::session_lxc_config_file(&self.work_dir, session_id);
        let contents = tokio::fs::read_to_string(&path).await?;
        Ok(contents.contains(env::session::SESSION_CONFIG_MARKER))
    }
}

/// Host Wayland socket for a session: absolute displays are used verbatim.
pub fn wayland_socket_path(session: &Session) -> Option<PathBuf> {
    let display = session.wayland_display.as_deref()?;
    if Path::new(display).is_absolute() {
        return Some(PathBuf::from(display));
    }
    session.runtime_dir.as_ref().map(|dir| dir.join(display))
}

/// Render `lxc.mount.entry` lines binding the session's host resources.
pub fn render_session_config(session: &Session) -> String {
    let mut lines = Vec::new();

    let mut mount = |host: &Path, target: String, kind: &str| {
        lines.push(format!(
            "lxc.mount.entry = {} {} none rbind,create={},optional 0 0",
            host.display(),
            target,
            kind
        ));
    };

    if let Some(socket) = wayland_socket_path(session) {
        mount(
            &socket,
            format!("{}/{}", CONTAINER_RUNTIME_DIR, CONTAINER_WAYLAND_DISPLAY),
            "file",
        );
    }
    if let Some(pulse) = session.pulse_runtime_path.as_deref() {
        mount(pulse, format!("{}/pulse", CONTAINER_RUNTIME_DIR), "dir");
    }
    if let Some(data) = session.data_dir.as_deref() {
        mount(data, "data".to_string(), "dir");
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::recording::RecordingExecutor;
    use tempfile::TempDir;

    fn runtime(executor: Arc<RecordingExecutor>, work: &Path) -> LxcRuntime {
        LxcRuntime::new(executor, work)
    }

    #[tokio::test]
    async fn test_status_parses_lxc_info() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond("lxc-info", 0, "FROZEN\n");
        let lxc = runtime(executor.clone(), Path::new("/var/lib/waydroid"));

        assert_eq!(lxc.status(1).await.unwrap(), ContainerState::Frozen);
        assert_eq!(
            executor.commands(),
            vec!["lxc-info -P /var/lib/waydroid/session_1/lxc -n waydroid -sH"]
        );
    }

    #[tokio::test]
    async fn test_status_failure_means_stopped() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond("lxc-info", 1, "");
        let lxc = runtime(executor, Path::new("/var/lib/waydroid"));

        assert_eq!(lxc.status(0).await.unwrap(), ContainerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_spawns_foreground_lxc() {
        let executor = Arc::new(RecordingExecutor::new());
        let lxc = runtime(executor.clone(), Path::new("/w"));

        assert_eq!(lxc.start(3).await.unwrap(), 4242);
        assert_eq!(
            executor.commands(),
            vec!["lxc-start -P /w/session_3/lxc -n waydroid -F -- /init"]
        );
    }

    #[tokio::test]
    async fn test_failed_freeze_surfaces() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond("lxc-freeze", 1, "");
        let lxc = runtime(executor, Path::new("/w"));

        assert!(matches!(
            lxc.freeze(0).await,
            Err(ContainerError::Executor(_))
        ));
    }

    #[tokio::test]
    async fn test_session_config_round_trip_on_disk() {
        let temp = TempDir::new().unwrap();
        let lxc = runtime(Arc::new(RecordingExecutor::new()), temp.path());

        let session = Session {
            runtime_dir: Some(PathBuf::from("/run/user/1000")),
            wayland_display: Some("wayland-1".to_string()),
            data_dir: Some(PathBuf::from("/home/a/data")),
            ..Default::default()
        };
        lxc.generate_session_config(0, &session).await.unwrap();

        let written = std::fs::read_to_string(env::session_lxc_session_config_file(temp.path(), 0)).unwrap();
        assert!(written.contains("/run/user/1000/wayland-1 run/xdg/wayland-0"));
        assert!(written.contains("/home/a/data data none"));

        // resident config written by an older release
        let resident = env::session_lxc_config_file(temp.path(), 0);
        std::fs::write(&resident, "lxc.include = config_nodes\n").unwrap();
        assert!(!lxc.supports_session_config(0).await.unwrap());

        std::fs::write(&resident, "lxc.include = config_session\n").unwrap();
        assert!(lxc.supports_session_config(0).await.unwrap());
    }

    #[test]
    fn test_absolute_wayland_display_used_verbatim() {
        let session = Session {
            wayland_display: Some("/tmp/custom-wayland".to_string()),
            runtime_dir: Some(PathBuf::from("/run/user/1000")),
            ..Default::default()
        };
        assert_eq!(
            wayland_socket_path(&session),
            Some(PathBuf::from("/tmp/custom-wayland"))
        );
    }
}
