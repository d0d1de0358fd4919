//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./waydroid-manager.toml
//! 2. User config: $XDG_CONFIG_HOME/waydroid/manager.toml (~/.config by default)
//! 3. System config: /etc/waydroid/manager.toml
//! 4. Built-in defaults

use crate::container::WaitPolicy;
use crate::env;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Vendor type that needs the binder and ashmem modules probed
pub const MAINLINE_VENDOR: &str = "MAINLINE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Binder devices and protocol versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    pub binderfs_path: PathBuf,
    pub binder_driver: String,
    pub vndbinder_driver: String,
    pub hwbinder_driver: String,
    pub binder_protocol: String,
    pub service_manager_protocol: String,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            binderfs_path: PathBuf::from(env::devices::BINDERFS_PATH),
            binder_driver: env::devices::BINDER_DRIVER.to_string(),
            vndbinder_driver: env::devices::VNDBINDER_DRIVER.to_string(),
            hwbinder_driver: env::devices::HWBINDER_DRIVER.to_string(),
            binder_protocol: "aidl3".to_string(),
            service_manager_protocol: "aidl3".to_string(),
        }
    }
}

/// Settings shared by both services and the client commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// State directory; each session gets `<work_dir>/session_<id>`
    pub work_dir: PathBuf,
    /// Directory holding system.img and vendor.img
    pub images_path: PathBuf,
    pub vendor_type: String,
    /// Sessions the Session Manager brings up, numbered from 0
    pub num_sessions: u32,
    pub container_socket: PathBuf,
    /// Session socket file name inside `XDG_RUNTIME_DIR`
    pub session_socket_name: String,
    /// Where the helper scripts are installed
    pub tools_dir: PathBuf,
    pub container_name: String,
    pub binder: BinderConfig,
    /// Bound on stop/freeze/unfreeze transitions
    pub wait: WaitPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let work_dir = PathBuf::from(env::DEFAULT_WORK_DIR);
        Self {
            images_path: work_dir.join("images"),
            work_dir,
            vendor_type: MAINLINE_VENDOR.to_string(),
            num_sessions: 1,
            container_socket: PathBuf::from(env::CONTAINER_SOCKET_PATH),
            session_socket_name: env::SESSION_SOCKET_NAME.to_string(),
            tools_dir: PathBuf::from(env::DEFAULT_TOOLS_DIR),
            container_name: env::CONTAINER_NAME.to_string(),
            binder: BinderConfig::default(),
            wait: WaitPolicy::default(),
        }
    }
}

impl ManagerConfig {
    pub fn is_mainline(&self) -> bool {
        self.vendor_type == MAINLINE_VENDOR
    }

    /// Session service socket for a user's runtime directory
    pub fn session_socket(&self, runtime_dir: &Path) -> PathBuf {
        runtime_dir.join(&self.session_socket_name)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load `explicit` if given, otherwise walk the discovery hierarchy
    pub fn load(explicit: Option<&Path>) -> Result<ManagerConfig, ConfigError> {
        match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                ManagerConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<ManagerConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return ManagerConfig::from_toml_file(config_path);
        }

        debug!("No configuration file found, using defaults");
        Ok(ManagerConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::get_config_candidates()
            .into_iter()
            .inspect(|candidate| debug!("Checking for config file: {:?}", candidate))
            .find(|candidate| candidate.is_file())
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(config_home) = Self::get_config_home() {
            candidates.push(env::user_config_file_path(&config_home));
        }

        candidates.push(env::system_config_file_path());
        candidates
    }

    /// `$XDG_CONFIG_HOME`, falling back to `~/.config`
    fn get_config_home() -> Option<PathBuf> {
        std_env::var_os("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| std_env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
