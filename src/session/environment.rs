//! Live environment discovery for session bring-up.
//!
//! The Session Manager runs as the logged-in user. What that user's session
//! looks like (Wayland socket, runtime directory, data home, display density)
//! is read from the process environment once and then turned into one
//! [`Session`] per configured index.

use super::{Result, Session, SessionError, SessionId};
use crate::env;
use crate::executor::{CommandExecutor, ExecutionCommand};
use crate::ipc::PeerCredentials;
use nix::unistd::{User, getgid, getuid};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Density multiplier applied to `GRID_UNIT_PX`
const GRID_UNIT_DENSITY_FACTOR: u32 = 20;

/// The user environment a Session Manager was started in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionEnvironment {
    pub user_name: String,
    pub user_id: u32,
    pub group_id: u32,
    pub owner_pid: u32,
    pub home: PathBuf,
    pub xdg_data_home: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    pub wayland_display: Option<String>,
    pub pulse_runtime_path: Option<PathBuf>,
    pub grid_unit_px: Option<String>,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl SessionEnvironment {
    /// Read the current process's identity and environment.
    pub fn from_process() -> Self {
        let uid = getuid();
        let user = User::from_uid(uid).ok().flatten();

        let home = non_empty_var("HOME")
            .map(PathBuf::from)
            .or_else(|| user.as_ref().map(|u| u.dir.clone()))
            .unwrap_or_else(|| PathBuf::from("/"));

        Self {
            user_name: user.map(|u| u.name).unwrap_or_else(|| uid.to_string()),
            user_id: uid.as_raw(),
            group_id: getgid().as_raw(),
            owner_pid: std::process::id(),
            home,
            xdg_data_home: non_empty_var("XDG_DATA_HOME").map(PathBuf::from),
            runtime_dir: non_empty_var("XDG_RUNTIME_DIR").map(PathBuf::from),
            wayland_display: non_empty_var("WAYLAND_DISPLAY"),
            pulse_runtime_path: non_empty_var("PULSE_RUNTIME_PATH").map(PathBuf::from),
            grid_unit_px: non_empty_var("GRID_UNIT_PX"),
        }
    }

    /// Credentials this process presents to the container service.
    pub fn credentials(&self) -> PeerCredentials {
        PeerCredentials {
            uid: self.user_id,
            gid: self.group_id,
            pid: Some(self.owner_pid),
        }
    }

    pub fn data_home(&self) -> PathBuf {
        self.xdg_data_home
            .clone()
            .unwrap_or_else(|| self.home.join(".local/share"))
    }

    pub fn wayland_display(&self) -> String {
        match &self.wayland_display {
            Some(display) => display.clone(),
            None => {
                warn!(
                    "WAYLAND_DISPLAY is not set, defaulting to \"{}\"",
                    env::session::DEFAULT_WAYLAND_DISPLAY
                );
                env::session::DEFAULT_WAYLAND_DISPLAY.to_string()
            }
        }
    }

    /// Resolve and check the Wayland socket for `display`.
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingRuntimeDir`] for a relative display without a
    /// runtime directory, [`SessionError::MissingWaylandSocket`] if the socket
    /// is not there.
    pub fn wayland_socket(&self, display: &str) -> Result<PathBuf> {
        let socket = if Path::new(display).is_absolute() {
            PathBuf::from(display)
        } else {
            self.runtime_dir
                .as_ref()
                .ok_or(SessionError::MissingRuntimeDir)?
                .join(display)
        };

        if !socket.exists() {
            return Err(SessionError::MissingWaylandSocket(socket));
        }
        Ok(socket)
    }

    /// Build the record for session `session_id`, creating its data dir.
    pub async fn build_session(
        &self,
        session_id: SessionId,
        density: u32,
        background_start: bool,
    ) -> Result<Session> {
        let display = self.wayland_display();
        let socket = self.wayland_socket(&display)?;
        debug!(session_id, "Using Wayland socket {}", socket.display());

        let data_home = self.data_home();
        let data_dir = env::user_session_data_dir(&data_home, session_id);
        tokio::fs::create_dir_all(&data_dir).await?;

        let pulse_runtime_path = self
            .pulse_runtime_path
            .clone()
            .or_else(|| self.runtime_dir.as_ref().map(|dir| dir.join("pulse")));

        Ok(Session {
            user_name: Some(self.user_name.clone()),
            user_id: Some(self.user_id),
            group_id: Some(self.group_id),
            owner_pid: Some(self.owner_pid),
            home: Some(self.home.clone()),
            xdg_data_home: Some(data_home),
            runtime_dir: self.runtime_dir.clone(),
            wayland_display: Some(display),
            pulse_runtime_path,
            data_dir: Some(data_dir),
            density: Some(density),
            background_start: Some(background_start),
            ..Default::default()
        })
    }
}

/// Ask the host for its configured display density, if it can tell.
pub async fn host_density(executor: &dyn CommandExecutor) -> Option<String> {
    let getprop = which::which("getprop").ok()?;
    let command = ExecutionCommand::new(
        getprop.to_string_lossy(),
        vec![env::session::DENSITY_PROPERTY.to_string()],
    )
    .with_timeout(Duration::from_secs(5));

    match executor.execute(command).await {
        Ok(result) if result.success() => Some(result.stdout.trim().to_string()),
        Ok(result) => {
            debug!("getprop exited with {}", result.exit_code);
            None
        }
        Err(e) => {
            debug!("getprop failed: {}", e);
            None
        }
    }
}

/// Pick the density: host property, then the grid unit hint, then 0.
pub fn density_from(host_value: Option<&str>, grid_unit_px: Option<&str>) -> u32 {
    if let Some(value) = host_value.map(str::trim).filter(|v| !v.is_empty()) {
        match value.parse() {
            Ok(density) => return density,
            Err(_) => warn!("Ignoring host density '{}'", value),
        }
    }

    if let Some(grid) = grid_unit_px {
        match grid.trim().parse::<u32>() {
            Ok(px) => return px.saturating_mul(GRID_UNIT_DENSITY_FACTOR),
            Err(_) => warn!("Ignoring GRID_UNIT_PX '{}'", grid),
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn environment(temp: &TempDir) -> SessionEnvironment {
        SessionEnvironment {
            user_name: "alice".to_string(),
            user_id: 1000,
            group_id: 1000,
            owner_pid: 555,
            home: temp.path().join("home"),
            runtime_dir: Some(temp.path().join("run")),
            wayland_display: Some("wayland-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_density_precedence() {
        assert_eq!(density_from(Some("320"), Some("8")), 320);
        assert_eq!(density_from(Some(""), Some("8")), 160);
        assert_eq!(density_from(None, None), 0);
        assert_eq!(density_from(None, Some("wide")), 0);
    }

    #[test]
    fn test_missing_runtime_dir_is_fatal() {
        let env = SessionEnvironment {
            wayland_display: Some("wayland-0".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            env.wayland_socket("wayland-0"),
            Err(SessionError::MissingRuntimeDir)
        ));
    }

    #[test]
    fn test_missing_socket_is_reported() {
        let temp = TempDir::new().unwrap();
        let env = environment(&temp);
        assert!(matches!(
            env.wayland_socket("wayland-1"),
            Err(SessionError::MissingWaylandSocket(_))
        ));
    }

    #[tokio::test]
    async fn test_build_session_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let env = environment(&temp);
        std::fs::create_dir_all(temp.path().join("run")).unwrap();
        std::fs::write(temp.path().join("run/wayland-1"), "").unwrap();

        let session = env.build_session(2, 240, false).await.unwrap();

        let data_dir = temp.path().join("home/.local/share/waydroid/session_2/data");
        assert_eq!(session.data_dir.as_deref(), Some(data_dir.as_path()));
        assert!(data_dir.is_dir());
        assert_eq!(session.pulse_runtime_path, Some(temp.path().join("run/pulse")));
        assert_eq!(session.owner_pid, Some(555));
        assert_eq!(session.density, Some(240));
        assert_eq!(session.background_start, Some(false));
        assert!(session.state.is_none());
    }

    #[tokio::test]
    async fn test_absolute_display_needs_no_runtime_dir() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("compositor.sock");
        std::fs::write(&socket, "").unwrap();

        let env = SessionEnvironment {
            home: temp.path().to_path_buf(),
            wayland_display: Some(socket.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let session = env.build_session(0, 0, true).await.unwrap();
        assert_eq!(session.runtime_dir, None);
        assert_eq!(session.pulse_runtime_path, None);
    }
}
