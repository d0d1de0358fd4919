//! Command line argument parsing
//!
//! Subcommands:
//! - `container-service`: run the privileged container service
//! - `session-service`: run the per-user session service and start its sessions
//! - `session stop`: stop the user's session
//! - `container <verb>`: call the container service directly
//! - `prop get|set`: read or write an Android property in a session
//! - `show-config`: show configuration discovery information

use crate::session::SessionId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionMode {
    ContainerService,
    SessionService { background_start: bool },
    SessionStop { session_id: SessionId },
    Container(ContainerAction),
    PropGet { session_id: SessionId, key: String },
    PropSet {
        session_id: SessionId,
        key: String,
        value: String,
    },
    ShowConfig,
}

#[derive(Debug, Parser)]
#[command(name = "waydroid-manager")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Container and session lifecycle services for Android containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the container service (requires root)
    ContainerService,
    /// Run the session service for the current user
    SessionService {
        /// Bring the sessions up in the foreground
        #[arg(long = "foreground")]
        foreground: bool,
    },
    /// Session service commands
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
    /// Talk to the container service directly
    Container {
        #[command(subcommand)]
        action: ContainerAction,
    },
    /// Android property access
    Prop {
        #[command(subcommand)]
        action: PropCommand,
    },
    /// Show configuration discovery information
    ShowConfig,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Stop a session, through the session service if it is running
    Stop {
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum ContainerAction {
    /// Print the session record
    Status {
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
    Stop {
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
        /// Also terminate the owning session process
        #[arg(long = "quit-session")]
        quit_session: bool,
    },
    /// Stop every tracked session
    StopAll {
        #[arg(long = "quit-session")]
        quit_session: bool,
    },
    Freeze {
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
    Unfreeze {
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
    Restart {
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
}

#[derive(Debug, Subcommand)]
pub enum PropCommand {
    Get {
        key: String,
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
    Set {
        key: String,
        value: String,
        #[arg(short = 's', long = "session", default_value_t = 0)]
        session_id: SessionId,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::ContainerService) => Ok(ExecutionMode::ContainerService),
            Some(Commands::SessionService { foreground }) => Ok(ExecutionMode::SessionService {
                background_start: !*foreground,
            }),
            Some(Commands::Session {
                action: SessionCommand::Stop { session_id },
            }) => Ok(ExecutionMode::SessionStop {
                session_id: *session_id,
            }),
            Some(Commands::Container { action }) => Ok(ExecutionMode::Container(action.clone())),
            Some(Commands::Prop { action }) => Ok(match action {
                PropCommand::Get { key, session_id } => ExecutionMode::PropGet {
                    session_id: *session_id,
                    key: key.clone(),
                },
                PropCommand::Set {
                    key,
                    value,
                    session_id,
                } => ExecutionMode::PropSet {
                    session_id: *session_id,
                    key: key.clone(),
                    value: value.clone(),
                },
            }),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err("No command specified".to_string()),
        }
    }
}
