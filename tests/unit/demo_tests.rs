//! Unit tests for the demo command helpers.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

use sockline::demo::{ballast_report, row, DemoApp, ROW_LEN};
use sockline::{CommandHandler, IpcError, Outcome, ReplyChannel};

#[test]
fn row_is_zero_padded_to_fixed_width() {
    let first = row(0);
    let last = row(9_999);

    assert_eq!(first.len(), ROW_LEN);
    assert_eq!(last.len(), ROW_LEN);
    assert!(first.starts_with("big: 0000"));
    assert!(last.ends_with("9999\n"));
}

#[test]
fn uniform_ballast_reports_letter_and_length() {
    assert_eq!(ballast_report(&"A".repeat(1234)), "rcvd:A00001234\n");
    assert_eq!(ballast_report("z"), "rcvd:z00000001\n");
}

/// Any byte that differs from the first counts as an error.
#[test]
fn mixed_ballast_reports_error_count() {
    assert_eq!(ballast_report("AAAB"), "errs:1\n");
    assert_eq!(ballast_report("ABCD"), "errs:3\n");
}

#[test]
fn empty_ballast_reports_zero_length() {
    assert_eq!(ballast_report(""), "rcvd:?00000000\n");
}

async fn run_ping(app: &DemoApp) -> (sockline::Result<Outcome>, Vec<u8>) {
    let (server, mut client) = UnixStream::pair().expect("socket pair");
    let (_read, write) = server.into_split();
    let mut reply = ReplyChannel::new(write);

    let result = app.handle("ping", &mut reply).await;
    drop(reply);

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.expect("read");
    (result, wire)
}

/// The instance handed out by `new` serves commands.
#[tokio::test]
async fn registered_instance_serves_commands() {
    let app = DemoApp::new();

    let (result, wire) = run_ping(&app).await;

    assert!(matches!(result, Ok(Outcome::Done)), "got {result:?}");
    assert_eq!(wire, b"0008pong");
}

/// A copy of the application living at another address is refused before
/// it writes anything.
#[tokio::test]
async fn substituted_instance_is_rejected() {
    let original = DemoApp::new();
    let substitute = Arc::new(DemoApp::clone(&original));

    let (result, wire) = run_ping(&substitute).await;

    assert!(matches!(result, Err(IpcError::Application(_))), "got {result:?}");
    assert!(wire.is_empty(), "no reply expected, got {wire:?}");

    let (result, _) = run_ping(&original).await;
    assert!(result.is_ok(), "original must still pass, got {result:?}");
}
