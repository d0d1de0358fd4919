use nix::unistd::{getgid, getuid};
use std::io;
use tokio::net::UnixStream;

/// Identity of the process on the other end of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    /// Absent when the kernel cannot report it; such callers cannot prove ownership
    pub pid: Option<u32>,
}

impl PeerCredentials {
    /// Credentials of the current process.
    pub fn current() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            pid: Some(std::process::id()),
        }
    }

    /// Read `SO_PEERCRED` from a connected socket.
    pub fn from_stream(stream: &UnixStream) -> io::Result<Self> {
        let cred = stream.peer_cred()?;
        Ok(Self {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid().and_then(|pid| u32::try_from(pid).ok()),
        })
    }

    pub fn is_privileged(&self) -> bool {
        self.uid == 0
    }
}
