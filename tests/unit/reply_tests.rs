//! Unit tests for `ReplyChannel` framing and peer-gone handling.

use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

use sockline::codec::MAX_PAYLOAD_LEN;
use sockline::{IpcError, ReplyChannel};

async fn channel_pair() -> (ReplyChannel, UnixStream) {
    let (server, client) = UnixStream::pair().expect("socket pair");
    let (_read, write) = server.into_split();
    (ReplyChannel::new(write), client)
}

/// A short emit is written as one data packet.
#[tokio::test]
async fn emit_writes_one_packet() {
    let (mut reply, mut client) = channel_pair().await;

    reply.emit(b"pong").await.expect("emit");
    drop(reply);

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.expect("read");
    assert_eq!(wire, b"0008pong");
}

/// Successive emits appear on the wire in call order.
#[tokio::test]
async fn emits_preserve_order() {
    let (mut reply, mut client) = channel_pair().await;

    reply.emit_str("one").await.expect("emit one");
    reply.emit_str("two").await.expect("emit two");
    assert_eq!(reply.bytes_written(), 6);
    drop(reply);

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.expect("read");
    assert_eq!(wire, b"0007one0007two");
}

/// An empty emit sends nothing and does not count as written.
#[tokio::test]
async fn empty_emit_is_a_no_op() {
    let (mut reply, mut client) = channel_pair().await;

    reply.emit(b"").await.expect("empty emit");
    assert!(!reply.has_written());
    drop(reply);

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.expect("read");
    assert!(wire.is_empty());
}

/// A buffer larger than one packet is split and fully delivered.
#[tokio::test]
async fn large_emit_is_split_into_packets() {
    let (mut reply, mut client) = channel_pair().await;
    let data = vec![b'k'; MAX_PAYLOAD_LEN + 100];

    let reader = tokio::spawn(async move {
        let mut wire = Vec::new();
        client.read_to_end(&mut wire).await.expect("read");
        wire
    });

    reply.emit(&data).await.expect("emit");
    drop(reply);

    let wire = reader.await.expect("reader task");
    assert_eq!(wire.len(), data.len() + 8, "two packet headers expected");
    assert_eq!(&wire[..4], b"fff0");
    assert_eq!(&wire[4 + MAX_PAYLOAD_LEN..8 + MAX_PAYLOAD_LEN], b"0068");
}

/// Once the client hangs up, emit fails with `PeerGone` and keeps failing.
#[tokio::test]
async fn emit_after_client_hangup_is_peer_gone() {
    let (mut reply, client) = channel_pair().await;
    drop(client);

    let chunk = vec![b'z'; 64 * 1024];
    let mut first_err = None;
    for _ in 0..64 {
        if let Err(err) = reply.emit(&chunk).await {
            first_err = Some(err);
            break;
        }
    }

    let err = first_err.expect("writing to a closed peer must eventually fail");
    assert!(matches!(err, IpcError::PeerGone(_)), "got {err:?}");
    assert!(reply.is_peer_gone());

    let again = reply.emit(b"more").await.expect_err("still gone");
    assert!(matches!(again, IpcError::PeerGone(_)));
}
