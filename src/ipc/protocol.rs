//! Wire format: one JSON object per line in each direction.
//!
//! ```text
//! -> {"method":"start","params":{"session_id":0,"fields":{"user_id":"1000","pid":"555"}}}
//! <- {"ok":true,"data":4242}
//! -> {"method":"stop","params":{"session_id":0,"quit_session":false}}
//! <- {"ok":false,"error":{"kind":"unknown_session","message":"Unknown session 0","session_id":0}}
//! ```

use super::ControlTarget;
use crate::container::{ContainerError, ContainerState, Result};
use crate::session::{SessionFields, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Start {
        session_id: SessionId,
        #[serde(default)]
        fields: SessionFields,
    },
    Stop {
        session_id: SessionId,
        #[serde(default)]
        quit_session: bool,
    },
    StopAll {
        #[serde(default)]
        quit_session: bool,
    },
    Freeze {
        session_id: SessionId,
    },
    Unfreeze {
        session_id: SessionId,
    },
    GetSession {
        session_id: SessionId,
    },
    Restart {
        session_id: SessionId,
    },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Start { .. } => "start",
            Request::Stop { .. } => "stop",
            Request::StopAll { .. } => "stop_all",
            Request::Freeze { .. } => "freeze",
            Request::Unfreeze { .. } => "unfreeze",
            Request::GetSession { .. } => "get_session",
            Request::Restart { .. } => "restart",
        }
    }

    /// Target of a state-changing verb other than `start`, which carries
    /// its own ownership check.
    pub fn control_target(&self) -> Option<ControlTarget> {
        match self {
            Request::Stop { session_id, .. }
            | Request::Freeze { session_id }
            | Request::Unfreeze { session_id }
            | Request::Restart { session_id } => Some(ControlTarget::One(*session_id)),
            Request::StopAll { .. } => Some(ControlTarget::All),
            Request::Ping | Request::Start { .. } | Request::GetSession { .. } => None,
        }
    }
}

/// Structured error kinds reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    AlreadyTracked,
    UnknownSession,
    TransportUnavailable,
    RuntimeTransitionTimeout,
    AlreadyRunning,
    InvalidSession,
    Protocol,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ContainerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_ms: Option<u64>,
}

impl WireError {
    fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            session_id: None,
            target: None,
            waited_ms: None,
        }
    }

    fn for_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Rebuild the typed error on the calling side.
    pub fn into_error(self) -> ContainerError {
        let WireError {
            kind,
            message,
            session_id,
            target,
            waited_ms,
        } = self;

        match (kind, session_id) {
            (ErrorKind::PermissionDenied, _) => ContainerError::PermissionDenied(message),
            (ErrorKind::AlreadyTracked, Some(id)) => ContainerError::AlreadyTracked(id),
            (ErrorKind::UnknownSession, Some(id)) => ContainerError::UnknownSession(id),
            (ErrorKind::TransportUnavailable, _) => ContainerError::TransportUnavailable(message),
            (ErrorKind::RuntimeTransitionTimeout, Some(id)) => {
                ContainerError::RuntimeTransitionTimeout {
                    session_id: id,
                    target: target.unwrap_or(ContainerState::Stopped),
                    waited: Duration::from_millis(waited_ms.unwrap_or_default()),
                }
            }
            (ErrorKind::AlreadyRunning, _) => ContainerError::AlreadyRunning(message.into()),
            (ErrorKind::InvalidSession, _) => ContainerError::InvalidSession(message),
            (ErrorKind::Protocol, _) => ContainerError::Protocol(message),
            _ => ContainerError::Runtime(message),
        }
    }
}

impl From<&ContainerError> for WireError {
    fn from(error: &ContainerError) -> Self {
        let message = error.to_string();
        match error {
            ContainerError::PermissionDenied(reason) => {
                WireError::new(ErrorKind::PermissionDenied, reason.clone())
            }
            ContainerError::AlreadyTracked(id) => {
                WireError::new(ErrorKind::AlreadyTracked, message).for_session(*id)
            }
            ContainerError::UnknownSession(id) => {
                WireError::new(ErrorKind::UnknownSession, message).for_session(*id)
            }
            ContainerError::TransportUnavailable(reason) => {
                WireError::new(ErrorKind::TransportUnavailable, reason.clone())
            }
            ContainerError::RuntimeTransitionTimeout {
                session_id,
                target,
                waited,
            } => {
                let mut wire = WireError::new(ErrorKind::RuntimeTransitionTimeout, message)
                    .for_session(*session_id);
                wire.target = Some(*target);
                wire.waited_ms = Some(u64::try_from(waited.as_millis()).unwrap_or(u64::MAX));
                wire
            }
            ContainerError::AlreadyRunning(path) => {
                WireError::new(ErrorKind::AlreadyRunning, path.display().to_string())
            }
            ContainerError::InvalidSession(reason) => {
                WireError::new(ErrorKind::InvalidSession, reason.clone())
            }
            ContainerError::Protocol(reason) => WireError::new(ErrorKind::Protocol, reason.clone()),
            ContainerError::Runtime(_) | ContainerError::Executor(_) | ContainerError::Io(_) => {
                WireError::new(ErrorKind::Runtime, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn success(data: Option<serde_json::Value>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: WireError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }

    /// Turn a reply back into the call's result.
    pub fn into_result(self) -> Result<Option<serde_json::Value>> {
        if self.ok {
            return Ok(self.data);
        }
        Err(match self.error {
            Some(error) => error.into_error(),
            None => ContainerError::Protocol("failure response without error".to_string()),
        })
    }
}
