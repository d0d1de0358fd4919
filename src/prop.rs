//! Property access inside a session's container.
//!
//! Reading or writing an Android property needs a running container. When
//! the session is frozen, [`PropertyCoordinator`] thaws it for the duration
//! of the operation and freezes it again afterwards, so callers observe the
//! same state before and after.

use crate::container::{ContainerError, ContainerState};
use crate::env;
use crate::executor::{CommandExecutor, ExecutionCommand};
use crate::ipc::LifecycleService;
use crate::session::{SessionId, keys};
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    /// No reachable service or no running container for the session
    #[error("WayDroid session is stopped")]
    SessionStopped,

    /// Another freeze request keeps the container frozen
    #[error("Session {0} is held frozen by another request")]
    HeldFrozen(SessionId),

    #[error("Property access failed: {0}")]
    Property(String),

    #[error(transparent)]
    Container(ContainerError),
}

impl From<ContainerError> for PropertyError {
    fn from(error: ContainerError) -> Self {
        match error {
            ContainerError::TransportUnavailable(_) | ContainerError::UnknownSession(_) => {
                PropertyError::SessionStopped
            }
            other => PropertyError::Container(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PropertyError>;

/// Raw property reads and writes, with no freeze handling.
#[async_trait]
pub trait PropertyAdapter: Send + Sync {
    /// `None` when the property is unset.
    async fn get(&self, session_id: SessionId, key: &str) -> Result<Option<String>>;
    async fn set(&self, session_id: SessionId, key: &str, value: &str) -> Result<()>;
}

/// Runs `getprop`/`setprop` in the container through `lxc-attach`.
pub struct LxcProperties {
    executor: Arc<dyn CommandExecutor>,
    work_dir: PathBuf,
    container_name: String,
}

impl LxcProperties {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        work_dir: impl Into<PathBuf>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            work_dir: work_dir.into(),
            container_name: container_name.into(),
        }
    }

    fn attach(&self, session_id: SessionId, tool: &str, args: &[&str]) -> ExecutionCommand {
        let mut command_args = vec![
            "-P".to_string(),
            env::session_lxc_path(&self.work_dir, session_id)
                .to_string_lossy()
                .into_owned(),
            "-n".to_string(),
            self.container_name.clone(),
            "--clear-env".to_string(),
            "--".to_string(),
            format!("/system/bin/{}", tool),
        ];
        command_args.extend(args.iter().map(|arg| arg.to_string()));
        ExecutionCommand::new("lxc-attach", command_args).with_timeout(Duration::from_secs(10))
    }

    async fn run(&self, command: ExecutionCommand) -> Result<String> {
        let result = self
            .executor
            .execute(command.clone())
            .await
            .map_err(|e| PropertyError::Property(e.to_string()))?
            .check(&command)
            .map_err(|e| PropertyError::Property(e.to_string()))?;
        Ok(result.stdout)
    }
}

#[async_trait]
impl PropertyAdapter for LxcProperties {
    async fn get(&self, session_id: SessionId, key: &str) -> Result<Option<String>> {
        let stdout = self.run(self.attach(session_id, "getprop", &[key])).await?;
        let value = stdout.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    async fn set(&self, session_id: SessionId, key: &str, value: &str) -> Result<()> {
        self.run(self.attach(session_id, "setprop", &[key, value]))
            .await
            .map(|_| ())
    }
}

/// Wraps property operations in an unfreeze/freeze bracket.
pub struct PropertyCoordinator {
    session_service: Option<Arc<dyn LifecycleService>>,
    container: Arc<dyn LifecycleService>,
    properties: Arc<dyn PropertyAdapter>,
}

impl PropertyCoordinator {
    pub fn new(container: Arc<dyn LifecycleService>, properties: Arc<dyn PropertyAdapter>) -> Self {
        Self {
            session_service: None,
            container,
            properties,
        }
    }

    /// Require the user's session service to be up before touching properties.
    pub fn with_session_service(mut self, service: Arc<dyn LifecycleService>) -> Self {
        self.session_service = Some(service);
        self
    }

    pub async fn get(&self, session_id: SessionId, key: &str) -> Result<Option<String>> {
        let properties = self.properties.clone();
        let key = key.to_string();
        self.with_thawed(session_id, move || async move { properties.get(session_id, &key).await })
            .await
    }

    pub async fn set(&self, session_id: SessionId, key: &str, value: &str) -> Result<()> {
        let properties = self.properties.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.with_thawed(session_id, move || async move {
            properties.set(session_id, &key, &value).await
        })
        .await
    }

    async fn current_state(&self, session_id: SessionId) -> Result<ContainerState> {
        let fields = self
            .container
            .get_session(session_id)
            .await
            .map_err(|e| {
                debug!(session_id, "Session lookup failed: {}", e);
                PropertyError::SessionStopped
            })?;

        // Placeholders carry no state
        let state = fields
            .get(keys::STATE)
            .and_then(|state| state.parse::<ContainerState>().ok())
            .ok_or(PropertyError::SessionStopped)?;

        match state {
            ContainerState::Stopped => Err(PropertyError::SessionStopped),
            state => Ok(state),
        }
    }

    async fn with_thawed<T, F, Fut>(&self, session_id: SessionId, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if let Some(service) = &self.session_service {
            service.ping().await.map_err(|e| {
                debug!("Session service unreachable: {}", e);
                PropertyError::SessionStopped
            })?;
        }

        let frozen = self.current_state(session_id).await? == ContainerState::Frozen;
        if frozen {
            self.container.unfreeze(session_id).await?;
            if self.current_state(session_id).await? == ContainerState::Frozen {
                // Put our hold back; the other holder decides when to thaw
                self.container.freeze(session_id).await?;
                return Err(PropertyError::HeldFrozen(session_id));
            }
        }

        let result = operation().await;

        if frozen {
            if let Err(e) = self.container.freeze(session_id).await {
                if result.is_ok() {
                    return Err(e.into());
                }
                warn!(session_id, "Failed to refreeze after property access: {}", e);
            }
        }

        result
    }
}
