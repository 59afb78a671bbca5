//! Client-side connects with error classification and backoff.

use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use socket2::{Domain, SockAddr, Socket, Type};

use crate::transport::path;
use crate::{IpcError, Result};

/// First pause between connect attempts.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(5);

/// Longest pause between connect attempts.
pub const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Make one connection attempt to the socket at `path`.
///
/// Failures are classified so callers can decide whether to retry:
/// a missing path becomes [`IpcError::PathNotFound`], a socket nobody
/// accepts on becomes [`IpcError::NotListening`], a full accept queue
/// becomes [`IpcError::Busy`], and an unaddressable path becomes
/// [`IpcError::InvalidPath`].
///
/// The connect itself is non-blocking, so a full accept queue fails at once
/// with `EAGAIN` instead of parking the caller inside the kernel. The
/// returned stream is switched back to blocking mode.
///
/// # Errors
///
/// Returns the classified failure.
pub fn connect_once(path: &Path, allow_chdir: bool) -> Result<UnixStream> {
    let resolution = path::resolve(path, allow_chdir)?;
    resolution
        .with_address(connect_nonblocking)
        .map_err(|err| classify(path, &err))
}

fn connect_nonblocking(addr: &Path) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.connect(&SockAddr::unix(addr)?)?;
    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

/// Map a connect error onto the crate taxonomy.
#[must_use]
pub fn classify(path: &Path, err: &io::Error) -> IpcError {
    let target = path.display();
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
            IpcError::PathNotFound(format!("{target}: {err}"))
        }
        io::ErrorKind::ConnectionRefused => IpcError::NotListening(format!("{target}: {err}")),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            IpcError::Busy(format!("{target}: {err}"))
        }
        io::ErrorKind::InvalidInput => IpcError::InvalidPath(format!("{target}: {err}")),
        _ => IpcError::Io(format!("connect to {target} failed: {err}")),
    }
}

/// Bounded exponential backoff between connect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    /// Start at [`INITIAL_BACKOFF`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    /// Sleep before the next attempt, never past `deadline`.
    ///
    /// Returns `false` without sleeping once the deadline has passed.
    pub fn pause(&mut self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(self.next.min(deadline - now));
        self.next = (self.next * 2).min(MAX_BACKOFF);
        true
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
