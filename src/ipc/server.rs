//! Unix-socket server for a [`LifecycleService`].

use super::credentials::PeerCredentials;
use super::protocol::{Request, Response, WireError};
use super::LifecycleService;
use crate::container::{ContainerError, Result};
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Longest request line a connection may send, newline excluded
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// A bound service socket.
pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketServer {
    /// Bind `path`, replacing a stale socket file left by a dead instance.
    ///
    /// # Errors
    ///
    /// [`ContainerError::AlreadyRunning`] if something already answers on
    /// `path`, or the bind's IO error.
    pub async fn bind(path: impl Into<PathBuf>, mode: u32) -> Result<Self> {
        let path = path.into();

        if tokio::fs::try_exists(&path).await? {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(ContainerError::AlreadyRunning(path));
            }
            debug!("Removing stale socket {}", path.display());
            tokio::fs::remove_file(&path).await?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let listener = UnixListener::bind(&path)?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
        info!("Listening on {}", path.display());

        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves, then remove the socket
    /// and hand back what `shutdown` resolved to.
    ///
    /// No connection is accepted once `shutdown` has resolved, so teardown
    /// that follows cannot race a new client.
    pub async fn serve<F, T>(self, service: Arc<dyn LifecycleService>, shutdown: F) -> Result<T>
    where
        F: Future<Output = T> + Send,
    {
        let SocketServer { listener, path } = self;
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                outcome = &mut shutdown => break outcome,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, service).await {
                                warn!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
            }
        };
        drop(listener);

        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }
        info!("{} service stopped", service.scope());
        Ok(outcome)
    }
}

/// Read one newline-terminated request into `buf`.
///
/// Returns `Ok(false)` at end of stream. A line longer than
/// [`MAX_REQUEST_BYTES`] is an error; at most that many bytes are buffered.
async fn read_request<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = reader
        .take(MAX_REQUEST_BYTES + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(false);
    }
    if buf.last() != Some(&b'\n') && buf.len() as u64 > MAX_REQUEST_BYTES {
        return Err(ContainerError::Protocol(format!(
            "request exceeds {} bytes",
            MAX_REQUEST_BYTES
        )));
    }
    Ok(true)
}

async fn handle_connection(stream: UnixStream, service: Arc<dyn LifecycleService>) -> Result<()> {
    let caller = match PeerCredentials::from_stream(&stream) {
        Ok(caller) => Some(caller),
        Err(e) => {
            warn!("Cannot read peer credentials: {}", e);
            None
        }
    };

    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();

    loop {
        let request = match read_request(&mut reader, &mut buf).await {
            Ok(true) => parse_request(&buf),
            Ok(false) => break,
            Err(e @ ContainerError::Protocol(_)) => {
                warn!(?caller, "Dropping connection: {}", e);
                send(&mut write, &Response::failure(WireError::from(&e))).await?;
                break;
            }
            Err(e) => return Err(e),
        };

        let response = match request {
            Ok(Some(request)) => dispatch(service.as_ref(), caller.as_ref(), request).await,
            Ok(None) => continue,
            Err(e) => Response::failure(WireError::from(&e)),
        };
        send(&mut write, &response).await?;
    }
    Ok(())
}

/// `Ok(None)` for a blank line.
fn parse_request(line: &[u8]) -> Result<Option<Request>> {
    let line = std::str::from_utf8(line)
        .map_err(|e| ContainerError::Protocol(format!("invalid request: {}", e)))?;
    if line.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| ContainerError::Protocol(format!("invalid request: {}", e)))
}

async fn send(write: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut reply = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":{"kind":"protocol","message":"serialization failed"}}"#.to_string());
    reply.push('\n');
    write.write_all(reply.as_bytes()).await?;
    write.flush().await?;
    Ok(())
}

/// Run one request against `service`.
pub async fn dispatch(
    service: &dyn LifecycleService,
    caller: Option<&PeerCredentials>,
    request: Request,
) -> Response {
    debug!(method = request.method(), ?caller, "Dispatching request");

    if let Some(target) = request.control_target() {
        let allowed = match caller {
            Some(caller) => service.authorize_control(caller, target).await,
            None => Err(ContainerError::PermissionDenied(
                "cannot identify caller".to_string(),
            )),
        };
        if let Err(e) = allowed {
            debug!(method = request.method(), "Request refused: {}", e);
            return Response::failure(WireError::from(&e));
        }
    }

    let result = match request {
        Request::Ping => service.ping().await.map(|_| None),
        Request::Start { session_id, fields } => match caller {
            Some(caller) => service
                .start(caller, session_id, fields)
                .await
                .map(|pid| Some(serde_json::Value::from(pid))),
            None => Err(ContainerError::PermissionDenied(
                "cannot identify caller".to_string(),
            )),
        },
        Request::Stop {
            session_id,
            quit_session,
        } => service.stop(session_id, quit_session).await.map(|_| None),
        Request::StopAll { quit_session } => service.stop_all(quit_session).await.map(|_| None),
        Request::Freeze { session_id } => service.freeze(session_id).await.map(|_| None),
        Request::Unfreeze { session_id } => service.unfreeze(session_id).await.map(|_| None),
        Request::GetSession { session_id } => {
            service.get_session(session_id).await.and_then(|fields| {
                serde_json::to_value(fields)
                    .map(Some)
                    .map_err(|e| ContainerError::Protocol(e.to_string()))
            })
        }
        Request::Restart { session_id } => service.restart(session_id).await.map(|_| None),
    };

    match result {
        Ok(data) => Response::success(data),
        Err(e) => {
            debug!("Request failed: {}", e);
            Response::failure(WireError::from(&e))
        }
    }
}
