//! Unit tests for socket path validation and long-path resolution.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use sockline::transport::path::{fits, resolve, validate, Resolution, SUN_PATH_MAX};
use sockline::IpcError;

/// Build a path under `root` that is longer than a socket address allows.
fn long_path(root: &Path) -> PathBuf {
    let mut dir = root.to_path_buf();
    while dir.as_os_str().len() < SUN_PATH_MAX + 20 {
        dir.push("a".repeat(40));
    }
    dir.join("s.sock")
}

#[test]
fn empty_path_is_invalid() {
    let err = validate(Path::new("")).expect_err("empty path");
    assert!(matches!(err, IpcError::InvalidPath(_)));
}

#[test]
fn nul_byte_is_invalid() {
    let path = Path::new(OsStr::from_bytes(b"/tmp/so\0ck"));
    let err = validate(path).expect_err("nul byte");
    assert!(err.to_string().contains("NUL"), "got {err}");
}

#[test]
fn root_has_no_file_name() {
    assert!(validate(Path::new("/")).is_err());
    assert!(validate(Path::new("/tmp/..")).is_err());
}

#[test]
fn short_path_resolves_directly() {
    let path = Path::new("/tmp/sockline.sock");

    assert!(fits(path));
    let resolution = resolve(path, true).expect("short path");
    assert!(matches!(resolution, Resolution::Direct(ref p) if p == path));
    assert!(!resolution.changes_directory());
}

/// The address limit counts the terminating NUL.
#[test]
fn path_at_address_limit_does_not_fit() {
    let exact = format!("/{}", "x".repeat(SUN_PATH_MAX - 1));
    assert_eq!(exact.len(), SUN_PATH_MAX);
    assert!(!fits(Path::new(&exact)));
    assert!(fits(Path::new(&exact[..SUN_PATH_MAX - 1])));
}

/// A long path with chdir allowed resolves to parent dir plus bare name.
#[test]
fn long_path_with_chdir_uses_parent_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let path = long_path(root.path());

    let resolution = resolve(&path, true).expect("resolve");

    match &resolution {
        Resolution::Chdir { dir, name } => {
            assert_eq!(Some(dir.as_path()), path.parent());
            assert_eq!(name, Path::new("s.sock"));
        }
        other => panic!("expected chdir resolution, got {other:?}"),
    }
    assert!(resolution.changes_directory());
}

/// With chdir disallowed a long path goes through a directory handle and
/// never changes the working directory.
#[cfg(target_os = "linux")]
#[test]
fn long_path_without_chdir_uses_dir_handle() {
    let root = tempfile::tempdir().expect("tempdir");
    let path = long_path(root.path());
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");

    let resolution = resolve(&path, false).expect("resolve");

    match &resolution {
        Resolution::DirHandle { alias, .. } => {
            assert!(alias.starts_with("/proc/self/fd"), "alias {alias:?}");
            assert!(fits(alias));
        }
        other => panic!("expected dir-handle resolution, got {other:?}"),
    }
    assert!(!resolution.changes_directory());
}

/// A dir-handle resolution of a missing parent reports a missing path.
#[cfg(target_os = "linux")]
#[test]
fn long_path_with_missing_parent_is_not_found() {
    let root = tempfile::tempdir().expect("tempdir");
    let path = long_path(root.path());

    let err = resolve(&path, false).expect_err("parent does not exist");

    assert!(matches!(err, IpcError::PathNotFound(_)), "got {err:?}");
}

/// A file name that alone exceeds the address limit cannot be shortened.
#[test]
fn overlong_file_name_is_invalid() {
    let path = PathBuf::from("/tmp").join("n".repeat(SUN_PATH_MAX + 1));

    let err = resolve(&path, true).expect_err("name too long");

    assert!(matches!(err, IpcError::InvalidPath(_)));
}
