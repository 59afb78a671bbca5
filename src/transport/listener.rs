//! Server-side socket listener.

use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::transport::path;
use crate::transport::probe::{inspect, ActiveState, Liveness};
use crate::{IpcError, Result};

/// How long `bind` waits for an existing server to answer before treating its
/// socket as stale.
const STALE_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

fn identity_of(path: &Path) -> Option<FileIdentity> {
    fs::symlink_metadata(path).ok().map(|meta| FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

/// A bound Unix socket that removes its socket file when dropped.
///
/// The file is only removed while it is still the one this listener
/// created; a socket re-bound at the same path by another server is left
/// alone.
#[derive(Debug)]
pub struct SocketListener {
    inner: UnixListener,
    path: PathBuf,
    identity: Option<FileIdentity>,
}

impl SocketListener {
    /// Bind a listening socket at `path` with room for `backlog` pending
    /// connections.
    ///
    /// An existing socket that no server answers on is replaced. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Transport`] if the path is unusable, another server
    /// is already listening there, a non-socket file is in the way, or the
    /// bind itself fails.
    pub fn bind(path: &Path, backlog: u32) -> Result<Self> {
        let resolution = path::resolve(path, false).map_err(|err| {
            IpcError::Transport(format!("cannot bind {}: {err}", path.display()))
        })?;

        reclaim_stale(path)?;

        let inner = resolution
            .with_address(|addr| listen_at(addr, backlog))
            .map_err(|err| IpcError::Transport(format!("cannot bind {}: {err}", path.display())))?;

        let identity = identity_of(path);
        info!(path = %path.display(), backlog, "socket bound");

        Ok(Self {
            inner,
            path: path.to_path_buf(),
            identity,
        })
    }

    /// Accept the next queued connection.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the listener stays usable.
    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(stream)
    }

    /// Path this listener was bound at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if self.identity.is_none() || identity_of(&self.path) != self.identity {
            debug!(path = %self.path.display(), "socket file replaced; leaving it in place");
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "socket file removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(%err, path = %self.path.display(), "failed to remove socket file"),
        }
    }
}

fn listen_at(addr: &Path, backlog: u32) -> io::Result<UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.bind(&SockAddr::unix(addr)?)?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    socket.set_nonblocking(true)?;
    UnixListener::from_std(socket.into())
}

/// Clear the way for `bind`: refuse a live server or a foreign file, remove a
/// dead socket.
fn reclaim_stale(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(IpcError::Transport(format!(
                "cannot inspect {}: {err}",
                path.display()
            )))
        }
    };

    if !meta.file_type().is_socket() {
        return Err(IpcError::Transport(format!(
            "{} exists and is not a socket",
            path.display()
        )));
    }

    match inspect(path, STALE_PROBE_TIMEOUT) {
        Liveness::Known(ActiveState::Listening) => Err(IpcError::Transport(format!(
            "another server is already listening on {}",
            path.display()
        ))),
        Liveness::Saturated => Err(IpcError::Transport(format!(
            "another server is already listening on {} (accept queue full)",
            path.display()
        ))),
        // Only a refused connect proves nobody owns the socket.
        Liveness::Known(ActiveState::NotListening) => {
            info!(path = %path.display(), "removing stale socket");
            match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(IpcError::Transport(format!(
                    "cannot remove stale socket {}: {err}",
                    path.display()
                ))),
            }
        }
        Liveness::Known(ActiveState::PathNotFound) => Ok(()),
        Liveness::Known(state) => Err(IpcError::Transport(format!(
            "cannot tell whether {} is in use ({state})",
            path.display()
        ))),
    }
}
