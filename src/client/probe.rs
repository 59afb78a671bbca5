//! Client-facing liveness checks.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

pub use crate::transport::ActiveState;

/// How long a probe keeps retrying a server whose accept queue is full.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Report whether a server is accepting connections at `path`.
///
/// Connects and disconnects without sending a command, so the server's
/// handler is never invoked.
#[must_use]
pub fn get_active_state(path: impl AsRef<Path>) -> ActiveState {
    crate::transport::probe(path.as_ref(), PROBE_TIMEOUT)
}

/// Poll [`get_active_state`] until `accept` holds or `timeout` elapses.
///
/// Returns the last observed state.
pub fn wait_for_state(
    path: impl AsRef<Path>,
    timeout: Duration,
    accept: impl Fn(ActiveState) -> bool,
) -> ActiveState {
    let path = path.as_ref();
    let deadline = Instant::now() + timeout;
    loop {
        let state = get_active_state(path);
        if accept(state) || Instant::now() >= deadline {
            return state;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
