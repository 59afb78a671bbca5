//! Unit tests for the shutdown coordinator state machine.

use sockline::{ServerState, ShutdownCoordinator};

#[test]
fn new_coordinator_is_listening() {
    let shutdown = ShutdownCoordinator::new();

    assert_eq!(shutdown.state(), ServerState::Listening);
    assert!(!shutdown.is_draining());
    assert_eq!(shutdown.in_flight(), 0);
}

/// Only the first quit request performs the transition.
#[test]
fn first_quit_request_wins() {
    let shutdown = ShutdownCoordinator::new();

    assert!(shutdown.request_quit());
    assert!(!shutdown.request_quit(), "second request must be a no-op");
    assert_eq!(shutdown.state(), ServerState::Draining);
    assert!(shutdown.is_draining());
}

/// Clones observe and drive the same state.
#[test]
fn clones_share_state() {
    let shutdown = ShutdownCoordinator::default();
    let other = shutdown.clone();

    assert!(other.request_quit());

    assert_eq!(shutdown.state(), ServerState::Draining);
    assert!(!shutdown.request_quit());
}

/// `stopped` stays pending while the server is merely draining.
#[tokio::test]
async fn stopped_does_not_resolve_while_draining() {
    let shutdown = ShutdownCoordinator::new();
    shutdown.request_quit();

    let waited =
        tokio::time::timeout(std::time::Duration::from_millis(50), shutdown.stopped()).await;

    assert!(waited.is_err(), "stopped must wait for the drain to finish");
}
