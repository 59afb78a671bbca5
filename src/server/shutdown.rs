//! Cooperative quit/drain state machine.
//!
//! `Listening → Draining → Stopped`, never backwards. The first quit request
//! moves the server to `Draining`: the accept loop stops, connections already
//! accepted run to completion. Once every tracked connection task has
//! finished the server is `Stopped`.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use tracing::info;

const LISTENING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting new connections.
    Listening,
    /// Finishing accepted connections; no new ones are accepted.
    Draining,
    /// Every connection has finished.
    Stopped,
}

#[derive(Debug)]
struct Inner {
    state: AtomicU8,
    quit: CancellationToken,
    stopped: CancellationToken,
    connections: TaskTracker,
}

/// Shared handle on a server's shutdown bookkeeping.
///
/// Cloning is cheap; every clone observes and drives the same state.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the `Listening` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(LISTENING),
                quit: CancellationToken::new(),
                stopped: CancellationToken::new(),
                connections: TaskTracker::new(),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        match self.inner.state.load(Ordering::Acquire) {
            LISTENING => ServerState::Listening,
            DRAINING => ServerState::Draining,
            _ => ServerState::Stopped,
        }
    }

    /// Start draining.
    ///
    /// Returns `true` for the call that performed the transition; later calls
    /// are no-ops and return `false`.
    pub fn request_quit(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(LISTENING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            info!(in_flight = self.in_flight(), "quit requested; draining");
            self.inner.quit.cancel();
        }
        won
    }

    /// Whether a quit has been requested.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != LISTENING
    }

    /// Number of connection tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.connections.len()
    }

    /// Resolve once the server has fully stopped.
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await;
    }

    pub(crate) fn quit_requested(&self) -> WaitForCancellationFuture<'_> {
        self.inner.quit.cancelled()
    }

    pub(crate) fn track<F>(&self, connection: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.connections.spawn(connection);
    }

    /// Wait for every tracked connection, then enter `Stopped`.
    pub(crate) async fn drain(&self) {
        let _ = self.inner.state.compare_exchange(
            LISTENING,
            DRAINING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.connections.close();
        self.inner.connections.wait().await;
        self.inner.state.store(STOPPED, Ordering::Release);
        self.inner.stopped.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
