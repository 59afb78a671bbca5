//! Per-connection request handling.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, warn};

use crate::codec::{Packet, PacketCodec};
use crate::server::handler::{CommandHandler, Outcome};
use crate::server::reply::ReplyChannel;
use crate::server::shutdown::ShutdownCoordinator;
use crate::{IpcError, Result};

/// Longest command prefix echoed into logs.
const LOG_PREVIEW_CHARS: usize = 64;

/// Everything a worker needs to service one accepted connection.
pub(crate) struct Connection<H> {
    pub stream: UnixStream,
    pub handler: Arc<H>,
    pub shutdown: ShutdownCoordinator,
    pub max_command_bytes: usize,
    pub command_timeout: Duration,
    /// Held until the connection is closed; bounds concurrent requests.
    pub permit: OwnedSemaphorePermit,
}

/// Read one command, dispatch it, stream the reply, close.
///
/// Every failure is contained here: nothing propagates to the accept loop or
/// to sibling connections.
pub(crate) async fn serve_connection<H: CommandHandler>(conn: Connection<H>) {
    let Connection {
        stream,
        handler,
        shutdown,
        max_command_bytes,
        command_timeout,
        permit,
    } = conn;

    let (read_half, write_half) = stream.into_split();

    let read = tokio::time::timeout(command_timeout, read_command(read_half, max_command_bytes));
    let command = match read.await {
        Ok(Ok(Some(command))) => command,
        Ok(Ok(None)) => {
            debug!("client closed without sending a command");
            return;
        }
        Ok(Err(err)) => {
            warn!(%err, "rejecting unreadable command");
            return;
        }
        Err(_) => {
            debug!(
                timeout_ms = command_timeout.as_millis(),
                "no command before the deadline; closing"
            );
            return;
        }
    };

    debug!(command = %preview(&command), "dispatching command");

    let mut reply = ReplyChannel::new(write_half);
    let result = AssertUnwindSafe(handler.handle(&command, &mut reply))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(Outcome::Done)) => finish(reply).await,
        Ok(Ok(Outcome::Quit)) => {
            if reply.has_written() {
                warn!(
                    bytes = reply.bytes_written(),
                    "handler wrote a reply before returning quit"
                );
            }
            shutdown.request_quit();
            finish(reply).await;
        }
        Ok(Err(err)) if reply.is_peer_gone() => {
            debug!(%err, "client went away mid-reply");
        }
        Ok(Err(err)) => {
            warn!(%err, command = %preview(&command), "command failed");
        }
        Err(panic) => {
            error!(
                panic = %panic_message(panic.as_ref()),
                command = %preview(&command),
                "command handler panicked"
            );
        }
    }

    drop(permit);
}

/// Read packets up to the flush that ends the command record.
///
/// Returns `Ok(None)` when the peer disconnects before sending anything,
/// which is what a liveness probe does.
async fn read_command(read_half: OwnedReadHalf, limit: usize) -> Result<Option<String>> {
    let mut packets = FramedRead::new(read_half, PacketCodec::new());
    let mut command = Vec::new();
    let mut started = false;

    while let Some(packet) = packets.next().await {
        match packet? {
            Packet::Data(bytes) => {
                started = true;
                if command.len() + bytes.len() > limit {
                    return Err(IpcError::Protocol(format!(
                        "command exceeds {limit} bytes"
                    )));
                }
                command.extend_from_slice(&bytes);
            }
            Packet::Flush => {
                return String::from_utf8(command)
                    .map(Some)
                    .map_err(|err| IpcError::Protocol(format!("command is not UTF-8: {err}")));
            }
        }
    }

    if started {
        Err(IpcError::Protocol(
            "connection closed before the end of the command".into(),
        ))
    } else {
        Ok(None)
    }
}

async fn finish(reply: ReplyChannel) {
    let bytes = reply.bytes_written();
    match reply.finish().await {
        Ok(()) => debug!(bytes, "reply complete"),
        Err(err) => debug!(%err, "could not terminate reply"),
    }
}

fn preview(command: &str) -> String {
    if command.chars().count() <= LOG_PREVIEW_CHARS {
        command.to_owned()
    } else {
        let mut short: String = command.chars().take(LOG_PREVIEW_CHARS).collect();
        short.push('…');
        short
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
