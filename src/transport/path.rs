//! Socket path validation and address resolution.
//!
//! A Unix socket address holds at most [`SUN_PATH_MAX`] bytes (NUL included),
//! so longer paths cannot be handed to `connect`/`bind` directly. They are
//! resolved one of two ways:
//!
//! - through an open handle on the parent directory
//!   (`/proc/self/fd/<fd>/<name>`), which never touches process-wide state;
//! - by changing into the parent directory and using the bare file name,
//!   which is process-wide and therefore serialized by a global lock.

use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::{IpcError, Result};

/// Capacity of `sockaddr_un.sun_path`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const SUN_PATH_MAX: usize = 108;

/// Capacity of `sockaddr_un.sun_path`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const SUN_PATH_MAX: usize = 104;

static CHDIR_LOCK: Mutex<()> = Mutex::new(());

/// How a socket path is turned into something `connect`/`bind` accept.
#[derive(Debug)]
pub enum Resolution {
    /// Short enough to be used as-is.
    Direct(PathBuf),
    /// Addressed through an open handle on the parent directory.
    DirHandle {
        /// Short alias that resolves through the handle.
        alias: PathBuf,
        /// Keeps the descriptor behind `alias` open.
        _dir: File,
    },
    /// Addressed by bare name after changing into the parent directory.
    Chdir {
        /// Parent directory of the socket.
        dir: PathBuf,
        /// File name of the socket.
        name: PathBuf,
    },
}

impl Resolution {
    /// Run `op` with an address that reaches the socket.
    ///
    /// For [`Resolution::Chdir`] the working directory is switched for the
    /// duration of `op` and restored afterwards.
    ///
    /// # Errors
    ///
    /// Returns whatever `op` returns, or the error raised while switching
    /// into the socket directory.
    pub fn with_address<T>(&self, op: impl FnOnce(&Path) -> io::Result<T>) -> io::Result<T> {
        match self {
            Self::Direct(path) => op(path),
            Self::DirHandle { alias, .. } => op(alias),
            Self::Chdir { dir, name } => {
                let _guard = CHDIR_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
                let previous = std::env::current_dir()?;
                std::env::set_current_dir(dir)?;
                let result = op(name);
                if let Err(err) = std::env::set_current_dir(&previous) {
                    warn!(%err, cwd = %previous.display(), "failed to restore working directory");
                }
                result
            }
        }
    }

    /// Whether resolving this path changes the process working directory.
    #[must_use]
    pub fn changes_directory(&self) -> bool {
        matches!(self, Self::Chdir { .. })
    }
}

/// Reject paths that can never name a socket.
///
/// # Errors
///
/// Returns [`IpcError::InvalidPath`] for an empty path, a path containing a
/// NUL byte, or a path without a final file name component.
pub fn validate(path: &Path) -> Result<()> {
    let raw = path.as_os_str().as_bytes();
    if raw.is_empty() {
        return Err(IpcError::InvalidPath("socket path is empty".into()));
    }
    if raw.contains(&0) {
        return Err(IpcError::InvalidPath(format!(
            "socket path contains a NUL byte: {}",
            path.display()
        )));
    }
    if path.file_name().is_none() {
        return Err(IpcError::InvalidPath(format!(
            "socket path has no file name: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Whether `path` fits in a socket address as-is.
#[must_use]
pub fn fits(path: &Path) -> bool {
    path.as_os_str().len() < SUN_PATH_MAX
}

/// Work out how to address `path`.
///
/// When `allow_chdir` is false the working directory is never touched; long
/// paths go through a directory handle instead.
///
/// # Errors
///
/// Returns [`IpcError::InvalidPath`] when the path is malformed or cannot be
/// shortened, and [`IpcError::PathNotFound`] when the parent directory of a
/// long path does not exist.
pub fn resolve(path: &Path, allow_chdir: bool) -> Result<Resolution> {
    validate(path)?;
    if fits(path) {
        return Ok(Resolution::Direct(path.to_path_buf()));
    }

    let (dir, name) = split(path)?;
    if !fits(Path::new(name)) {
        return Err(IpcError::InvalidPath(format!(
            "socket file name is too long: {}",
            path.display()
        )));
    }

    if allow_chdir {
        Ok(Resolution::Chdir {
            dir: dir.to_path_buf(),
            name: PathBuf::from(name),
        })
    } else {
        via_dir_handle(dir, name, path)
    }
}

fn split(path: &Path) -> Result<(&Path, &OsStr)> {
    let name = path
        .file_name()
        .ok_or_else(|| IpcError::InvalidPath(format!("no file name: {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((dir, name))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn via_dir_handle(dir: &Path, name: &OsStr, path: &Path) -> Result<Resolution> {
    use std::os::fd::AsRawFd;

    let handle = File::open(dir).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
            IpcError::PathNotFound(format!("{}: {err}", dir.display()))
        }
        _ => IpcError::Io(format!("cannot open {}: {err}", dir.display())),
    })?;

    let alias = PathBuf::from(format!("/proc/self/fd/{}", handle.as_raw_fd())).join(name);
    if !fits(&alias) {
        return Err(IpcError::InvalidPath(format!(
            "socket path is too long: {}",
            path.display()
        )));
    }

    Ok(Resolution::DirHandle {
        alias,
        _dir: handle,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn via_dir_handle(_dir: &Path, _name: &OsStr, path: &Path) -> Result<Resolution> {
    Err(IpcError::InvalidPath(format!(
        "socket path is too long and the working directory may not be changed: {}",
        path.display()
    )))
}
