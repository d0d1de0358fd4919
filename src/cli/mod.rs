//! CLI-specific functionality for the container and session services
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, ContainerAction, ExecutionMode};
pub use config::{BinderConfig, ConfigDiscovery, ConfigError, MAINLINE_VENDOR, ManagerConfig};
