//! Environment constants and path utilities.
//!
//! This module centralizes the hardcoded paths, socket names and device
//! nodes used by both services, and derives the per-session host paths so
//! that concurrent sessions never share a mount point or LXC directory.

use crate::session::SessionId;
use std::path::{Path, PathBuf};

/// Default state directory for container images, rootfs and LXC configs
pub const DEFAULT_WORK_DIR: &str = "/var/lib/waydroid";

/// LXC container name inside each session's LXC directory
pub const CONTAINER_NAME: &str = "waydroid";

/// Socket the privileged container service listens on
pub const CONTAINER_SOCKET_PATH: &str = "/run/waydroid-container.sock";

/// Socket file name of the per-user session service, placed in `XDG_RUNTIME_DIR`
pub const SESSION_SOCKET_NAME: &str = "waydroid-session.sock";

/// Directory with helper scripts shipped alongside the binaries
pub const DEFAULT_TOOLS_DIR: &str = "/usr/lib/waydroid";

/// Network script location relative to the tools directory
pub const NETWORK_SCRIPT: &str = "data/scripts/waydroid-net.sh";

/// Configuration file names
pub mod config {
    /// Config file name in the user/system config directories
    pub const CONFIG_FILE_NAME: &str = "manager.toml";

    /// Config file name looked up in the current directory
    pub const LOCAL_CONFIG_FILE_NAME: &str = "waydroid-manager.toml";

    /// Directory name under `~/.config` and `/etc`
    pub const CONFIG_DIR_NAME: &str = "waydroid";
}

/// Host device nodes the container needs access to
pub mod devices {
    /// Mount point of binderfs
    pub const BINDERFS_PATH: &str = "/dev/binderfs";

    /// Binder node names allocated for the container
    pub const BINDER_DRIVER: &str = "anbox-binder";
    pub const VNDBINDER_DRIVER: &str = "anbox-vndbinder";
    pub const HWBINDER_DRIVER: &str = "anbox-hwbinder";

    /// Fixed hardware nodes opened up for graphics, media and sync
    pub const HARDWARE_NODES: &[&str] = &[
        "/dev/ashmem",
        "/dev/sw_sync",
        "/sys/kernel/debug/sync/sw_sync",
        "/dev/Vcodec",
        "/dev/MTK_SMI",
        "/dev/mdp_sync",
        "/dev/mtk_cmdq",
        "/dev/dri",
        "/dev/graphics",
        "/dev/pvr_sync",
        "/dev/ion",
    ];

    /// `/dev` entries matched by prefix (framebuffers, video devices)
    pub const HARDWARE_NODE_PREFIXES: &[&str] = &["fb", "video"];

    /// Mode for binder nodes
    pub const BINDER_MODE: u32 = 0o666;

    /// Mode for hardware nodes
    pub const HARDWARE_MODE: u32 = 0o777;
}

/// Session-related names
pub mod session {
    /// Display used when `WAYLAND_DISPLAY` is unset
    pub const DEFAULT_WAYLAND_DISPLAY: &str = "wayland-0";

    /// Prefix of every per-session directory
    pub const SESSION_DIR_PREFIX: &str = "session_";

    /// Marker in the resident LXC config showing it includes per-session config
    pub const SESSION_CONFIG_MARKER: &str = "config_session";

    /// Per-session LXC config file name
    pub const SESSION_CONFIG_FILE_NAME: &str = "config_session";

    /// Base properties file written before launch
    pub const BASE_PROP_FILE_NAME: &str = "waydroid_base.prop";

    /// Host property consulted for the display density
    pub const DENSITY_PROPERTY: &str = "ro.sf.lcd_density";
}

/// Name of a session's private directory, e.g. `session_0`
pub fn session_dir_name(session_id: SessionId) -> String {
    format!("{}{}", session::SESSION_DIR_PREFIX, session_id)
}

/// Build a specific session's work directory
pub fn session_work_dir(work_dir: &Path, session_id: SessionId) -> PathBuf {
    work_dir.join(session_dir_name(session_id))
}

/// Build the session's rootfs mount point
pub fn session_rootfs_path(work_dir: &Path, session_id: SessionId) -> PathBuf {
    session_work_dir(work_dir, session_id).join("rootfs")
}

/// Build the session's legacy single-session data path
pub fn session_data_path(work_dir: &Path, session_id: SessionId) -> PathBuf {
    session_work_dir(work_dir, session_id).join("data")
}

/// Build the session's LXC path (`lxc-* -P`)
pub fn session_lxc_path(work_dir: &Path, session_id: SessionId) -> PathBuf {
    session_work_dir(work_dir, session_id).join("lxc")
}

/// Build the resident LXC config file of a session
pub fn session_lxc_config_file(work_dir: &Path, session_id: SessionId) -> PathBuf {
    session_lxc_path(work_dir, session_id)
        .join(CONTAINER_NAME)
        .join("config")
}

/// Build the per-session LXC config file generated at start
pub fn session_lxc_session_config_file(work_dir: &Path, session_id: SessionId) -> PathBuf {
    session_lxc_path(work_dir, session_id)
        .join(CONTAINER_NAME)
        .join(session::SESSION_CONFIG_FILE_NAME)
}

/// Build the session's base properties file
pub fn session_base_prop_file(work_dir: &Path, session_id: SessionId) -> PathBuf {
    session_work_dir(work_dir, session_id).join(session::BASE_PROP_FILE_NAME)
}

/// Build a user's per-session Android data directory
pub fn user_session_data_dir(xdg_data_home: &Path, session_id: SessionId) -> PathBuf {
    xdg_data_home
        .join("waydroid")
        .join(session_dir_name(session_id))
        .join("data")
}

/// Build the network script path from a tools directory
pub fn network_script_path(tools_dir: &Path) -> PathBuf {
    tools_dir.join(NETWORK_SCRIPT)
}

/// Build config file path in a user's config home
pub fn user_config_file_path(config_home: &Path) -> PathBuf {
    config_home
        .join(config::CONFIG_DIR_NAME)
        .join(config::CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(config::LOCAL_CONFIG_FILE_NAME)
}

/// Build the system-wide config file path
pub fn system_config_file_path() -> PathBuf {
    Path::new("/etc")
        .join(config::CONFIG_DIR_NAME)
        .join(config::CONFIG_FILE_NAME)
}
