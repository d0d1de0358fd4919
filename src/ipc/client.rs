//! Socket-backed [`LifecycleService`] client.

use super::credentials::PeerCredentials;
use super::protocol::{Request, Response};
use super::{LifecycleService, ServiceScope};
use crate::container::{ContainerError, Result};
use crate::session::{SessionFields, SessionId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

/// Default bound on connecting to a service
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A lifecycle service reached over its Unix socket.
///
/// Every call opens its own connection, so the server sees fresh peer
/// credentials each time. Failing to connect is reported as
/// [`ContainerError::TransportUnavailable`].
#[derive(Debug, Clone)]
pub struct RemoteService {
    path: PathBuf,
    scope: ServiceScope,
    connect_timeout: Duration,
}

impl RemoteService {
    pub fn new(path: impl Into<PathBuf>, scope: ServiceScope) -> Self {
        Self {
            path: path.into(),
            scope,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> ContainerError {
        ContainerError::TransportUnavailable(format!(
            "{} service at {}: {}",
            self.scope,
            self.path.display(),
            reason
        ))
    }

    async fn connect(&self) -> Result<UnixStream> {
        match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(self.unavailable(e)),
            Err(_) => Err(self.unavailable("connect timed out")),
        }
    }

    /// Send one request and wait for its reply.
    pub async fn call(&self, request: Request) -> Result<Option<serde_json::Value>> {
        debug!(method = request.method(), "Calling {} service", self.scope);

        let stream = self.connect().await?;
        let (read, mut write) = stream.into_split();

        let mut line =
            serde_json::to_string(&request).map_err(|e| ContainerError::Protocol(e.to_string()))?;
        line.push('\n');
        write
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.unavailable(e))?;

        let reply = BufReader::new(read)
            .lines()
            .next_line()
            .await
            .map_err(|e| self.unavailable(e))?
            .ok_or_else(|| self.unavailable("connection closed before reply"))?;

        let response: Response = serde_json::from_str(&reply)
            .map_err(|e| ContainerError::Protocol(format!("malformed reply: {}", e)))?;
        response.into_result()
    }

    async fn call_unit(&self, request: Request) -> Result<()> {
        self.call(request).await.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(data: Option<serde_json::Value>) -> Result<T> {
    let data = data.ok_or_else(|| ContainerError::Protocol("reply carries no data".to_string()))?;
    serde_json::from_value(data).map_err(|e| ContainerError::Protocol(e.to_string()))
}

#[async_trait]
impl LifecycleService for RemoteService {
    fn scope(&self) -> ServiceScope {
        self.scope
    }

    async fn ping(&self) -> Result<()> {
        self.call_unit(Request::Ping).await
    }

    async fn start(
        &self,
        _caller: &PeerCredentials,
        session_id: SessionId,
        fields: SessionFields,
    ) -> Result<u32> {
        decode(self.call(Request::Start { session_id, fields }).await?)
    }

    async fn stop(&self, session_id: SessionId, quit_session: bool) -> Result<()> {
        self.call_unit(Request::Stop {
            session_id,
            quit_session,
        })
        .await
    }

    async fn stop_all(&self, quit_session: bool) -> Result<()> {
        self.call_unit(Request::StopAll { quit_session }).await
    }

    async fn freeze(&self, session_id: SessionId) -> Result<()> {
        self.call_unit(Request::Freeze { session_id }).await
    }

    async fn unfreeze(&self, session_id: SessionId) -> Result<()> {
        self.call_unit(Request::Unfreeze { session_id }).await
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionFields> {
        decode(self.call(Request::GetSession { session_id }).await?)
    }

    async fn restart(&self, session_id: SessionId) -> Result<()> {
        self.call_unit(Request::Restart { session_id }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_socket_is_transport_unavailable() {
        let temp = TempDir::new().unwrap();
        let remote = RemoteService::new(temp.path().join("absent.sock"), ServiceScope::User);

        let result = remote.ping().await;
        assert!(matches!(result, Err(ContainerError::TransportUnavailable(_))));
    }

    #[test]
    fn test_decode_requires_data() {
        assert!(decode::<u32>(None).is_err());
        assert_eq!(decode::<u32>(Some(serde_json::json!(42))).unwrap(), 42);
    }
}
