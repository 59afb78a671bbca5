//! Streaming reply writer handed to command handlers.

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;

use crate::codec::PacketCodec;
use crate::{IpcError, Result};

/// Write side of one connection, borrowed by a handler for one command.
///
/// Every [`emit`](Self::emit) appends to the reply stream in call order.
/// Large buffers are split into wire packets; the client sees a single
/// contiguous byte stream regardless of how the reply was emitted.
#[derive(Debug)]
pub struct ReplyChannel {
    writer: OwnedWriteHalf,
    scratch: BytesMut,
    written: usize,
    peer_gone: bool,
}

impl ReplyChannel {
    /// Wrap the write half of an accepted connection.
    #[must_use]
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer,
            scratch: BytesMut::new(),
            written: 0,
            peer_gone: false,
        }
    }

    /// Append `data` to the reply.
    ///
    /// Empty slices are accepted and send nothing.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::PeerGone`] when the client has disconnected; every
    /// later call fails the same way.
    pub async fn emit(&mut self, data: &[u8]) -> Result<()> {
        if self.peer_gone {
            return Err(IpcError::PeerGone("reply stream already closed".into()));
        }
        if data.is_empty() {
            return Ok(());
        }

        self.scratch.clear();
        PacketCodec::encode_chunked(data, &mut self.scratch);
        if let Err(err) = self.writer.write_all(&self.scratch).await {
            self.peer_gone = true;
            return Err(IpcError::PeerGone(err.to_string()));
        }

        self.written += data.len();
        Ok(())
    }

    /// Append UTF-8 text to the reply.
    ///
    /// # Errors
    ///
    /// See [`emit`](Self::emit).
    pub async fn emit_str(&mut self, text: &str) -> Result<()> {
        self.emit(text.as_bytes()).await
    }

    /// Whether any reply bytes have been written.
    #[must_use]
    pub fn has_written(&self) -> bool {
        self.written > 0
    }

    /// Number of payload bytes written so far.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Whether a write failed because the client went away.
    #[must_use]
    pub fn is_peer_gone(&self) -> bool {
        self.peer_gone
    }

    /// Terminate the reply and close the write side.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::PeerGone`] when the terminator cannot be written.
    pub(crate) async fn finish(mut self) -> Result<()> {
        if self.peer_gone {
            return Err(IpcError::PeerGone("reply stream already closed".into()));
        }
        self.scratch.clear();
        PacketCodec::encode_flush(&mut self.scratch);
        self.writer
            .write_all(&self.scratch)
            .await
            .map_err(|err| IpcError::PeerGone(err.to_string()))?;
        self.writer
            .shutdown()
            .await
            .map_err(|err| IpcError::PeerGone(err.to_string()))
    }
}
