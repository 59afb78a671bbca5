//! Synchronous IPC client.
//!
//! Each call opens its own connection, so any number of threads may send
//! commands at once without sharing state.
//!
//! # Example
//!
//! ```rust,no_run
//! use sockline::client::{send_command, ConnectOptions};
//!
//! let options = ConnectOptions {
//!     wait_if_busy: true,
//!     ..ConnectOptions::default()
//! };
//! let reply = send_command("/tmp/sockline.sock", &options, "ping")?;
//! assert_eq!(reply, b"pong");
//! # Ok::<(), sockline::IpcError>(())
//! ```

pub mod probe;

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::codec::{Packet, PacketCodec};
use crate::transport::connect::{connect_once, Backoff};
use crate::{IpcError, Result};

pub use probe::{get_active_state, wait_for_state, ActiveState};

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 16 * 1024;

/// Connection policy for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Retry with backoff while the server cannot take the connection.
    pub wait_if_busy: bool,
    /// Retry while the socket path does not exist yet.
    pub wait_if_not_found: bool,
    /// Never change the working directory to reach a long socket path.
    pub uds_disallow_chdir: bool,
    /// How long retries may continue.
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            wait_if_busy: false,
            wait_if_not_found: false,
            uds_disallow_chdir: false,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Open a connection to the server at `path` according to `options`.
///
/// # Errors
///
/// Returns the classified failure of the last attempt:
/// [`IpcError::PathNotFound`], [`IpcError::NotListening`],
/// [`IpcError::Busy`], [`IpcError::InvalidPath`] or [`IpcError::Io`].
pub fn connect(path: impl AsRef<Path>, options: &ConnectOptions) -> Result<UnixStream> {
    let path = path.as_ref();
    let deadline = Instant::now() + options.timeout;
    let mut backoff = Backoff::new();

    loop {
        let err = match connect_once(path, !options.uds_disallow_chdir) {
            Ok(stream) => return Ok(stream),
            Err(err) => err,
        };

        let retry = match err {
            IpcError::PathNotFound(_) => options.wait_if_not_found,
            IpcError::Busy(_) | IpcError::NotListening(_) => options.wait_if_busy,
            _ => false,
        };
        if !retry || !backoff.pause(deadline) {
            return Err(err);
        }
        debug!(%err, path = %path.display(), "connect failed; retrying");
    }
}

/// Send `command` to the server at `path` and return the complete reply.
///
/// # Errors
///
/// Returns a connect failure (see [`connect`]), [`IpcError::PeerGone`] if
/// the command cannot be written, [`IpcError::IncompleteReply`] if the
/// server closes the connection before finishing the reply (the handler
/// failed), or [`IpcError::Protocol`] on malformed framing.
pub fn send_command(
    path: impl AsRef<Path>,
    options: &ConnectOptions,
    command: &str,
) -> Result<Vec<u8>> {
    let mut stream = connect(path, options)?;
    send_on(&mut stream, command)
}

/// Send `command` over an already connected stream and read the reply.
///
/// # Errors
///
/// See [`send_command`].
pub fn send_on(stream: &mut UnixStream, command: &str) -> Result<Vec<u8>> {
    write_command(stream, command.as_bytes())?;
    read_reply(stream)
}

fn write_command(stream: &mut UnixStream, command: &[u8]) -> Result<()> {
    let mut buf = BytesMut::new();
    PacketCodec::encode_chunked(command, &mut buf);
    PacketCodec::encode_flush(&mut buf);
    stream
        .write_all(&buf)
        .and_then(|()| stream.flush())
        .map_err(|err| IpcError::PeerGone(format!("cannot send command: {err}")))
}

fn read_reply(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut codec = PacketCodec::new();
    let mut pending = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut reply = Vec::new();

    loop {
        while let Some(packet) = codec.decode(&mut pending)? {
            match packet {
                Packet::Data(bytes) => reply.extend_from_slice(&bytes),
                Packet::Flush => return Ok(reply),
            }
        }

        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                ) =>
            {
                return Err(IpcError::IncompleteReply(format!(
                    "connection reset after {} reply bytes: {err}",
                    reply.len()
                )))
            }
            Err(err) => return Err(IpcError::Io(format!("cannot read reply: {err}"))),
        };

        if n == 0 {
            return Err(IpcError::IncompleteReply(format!(
                "server closed the connection after {} reply bytes",
                reply.len()
            )));
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}
