//! Connect-only liveness probe.

use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::transport::connect::{connect_once, Backoff};
use crate::transport::path;
use crate::IpcError;

/// Externally observable liveness of a server at a socket path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActiveState {
    /// A server is accepting connections.
    Listening,
    /// The socket exists but nothing accepts connections on it.
    NotListening,
    /// Nothing exists at the path.
    PathNotFound,
    /// The path is malformed, unaddressable, or not a socket.
    InvalidPath,
    /// Any other system-level failure.
    OtherError,
}

impl ActiveState {
    /// Whether a server answered the probe.
    #[must_use]
    pub fn is_listening(self) -> bool {
        self == Self::Listening
    }
}

impl Display for ActiveState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Listening => "listening",
            Self::NotListening => "not listening",
            Self::PathNotFound => "path not found",
            Self::InvalidPath => "invalid path",
            Self::OtherError => "other error",
        };
        f.write_str(label)
    }
}

/// Finer-grained probe result used when deciding whether a socket file may
/// be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    /// A definite answer from the kernel or the filesystem.
    Known(ActiveState),
    /// Every connect failed with a full accept queue until the deadline.
    /// Somebody is listening; they are just not accepting yet.
    Saturated,
}

/// Classify the server at `path` without sending a command.
///
/// A successful connect is closed immediately, so the server sees an empty
/// connection and never dispatches it. A server whose accept queue is full is
/// retried until `timeout` elapses and then reported as
/// [`ActiveState::NotListening`]. The working directory is never changed.
#[must_use]
pub fn probe(path: &Path, timeout: Duration) -> ActiveState {
    match inspect(path, timeout) {
        Liveness::Known(state) => state,
        Liveness::Saturated => ActiveState::NotListening,
    }
}

/// Like [`probe`], but keeps a saturated server apart from a dead socket.
pub(crate) fn inspect(path: &Path, timeout: Duration) -> Liveness {
    if path::validate(path).is_err() {
        return Liveness::Known(ActiveState::InvalidPath);
    }

    match fs::symlink_metadata(path) {
        Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            return Liveness::Known(ActiveState::PathNotFound);
        }
        Err(err) => {
            debug!(%err, path = %path.display(), "probe could not stat socket");
            return Liveness::Known(ActiveState::OtherError);
        }
        Ok(meta) if !meta.file_type().is_socket() => {
            return Liveness::Known(ActiveState::InvalidPath);
        }
        Ok(_) => {}
    }

    let deadline = Instant::now() + timeout;
    let mut backoff = Backoff::new();
    let state = loop {
        match connect_once(path, false) {
            Ok(stream) => {
                drop(stream);
                break ActiveState::Listening;
            }
            Err(IpcError::PathNotFound(_)) => break ActiveState::PathNotFound,
            Err(IpcError::NotListening(_)) => break ActiveState::NotListening,
            Err(IpcError::InvalidPath(_)) => break ActiveState::InvalidPath,
            Err(IpcError::Busy(_)) => {
                if !backoff.pause(deadline) {
                    debug!(path = %path.display(), "accept queue stayed full until the deadline");
                    return Liveness::Saturated;
                }
            }
            Err(err) => {
                debug!(%err, path = %path.display(), "probe connect failed");
                break ActiveState::OtherError;
            }
        }
    };
    Liveness::Known(state)
}
