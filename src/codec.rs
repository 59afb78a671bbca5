//! Packet framing for commands and replies.
//!
//! Every record (the client's command, the server's reply) travels as a
//! sequence of data packets closed by a flush packet:
//!
//! ```text
//! 000ahello      data packet: 4 hex digits of total length, then payload
//! 0000           flush packet: end of record
//! ```
//!
//! The length counts its own four header bytes, so the smallest data packet
//! is `0004` (empty payload). Lengths `0001..=0003` are never valid.
//!
//! Use [`PacketCodec`] with [`tokio_util::codec::FramedRead`] on the server
//! side; the synchronous client drives the same [`Decoder`] over a
//! [`BytesMut`] it fills from a blocking socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{IpcError, Result};

/// Size of the ASCII length header.
pub const HEADER_LEN: usize = 4;

/// Largest packet on the wire, header included.
pub const MAX_PACKET_LEN: usize = 65_520;

/// Largest payload carried by a single data packet.
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

const FLUSH: &[u8; HEADER_LEN] = b"0000";

/// One decoded wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A fragment of the current record.
    Data(Bytes),
    /// End of the current record.
    Flush,
}

/// Length-prefixed packet codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl PacketCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Append a flush packet to `dst`.
    pub fn encode_flush(dst: &mut BytesMut) {
        dst.extend_from_slice(FLUSH);
    }

    /// Append `data` to `dst` as as many data packets as needed.
    ///
    /// An empty slice produces no packets.
    pub fn encode_chunked(data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len() + HEADER_LEN * data.len().div_ceil(MAX_PAYLOAD_LEN));
        for piece in data.chunks(MAX_PAYLOAD_LEN) {
            put_header(piece.len() + HEADER_LEN, dst);
            dst.extend_from_slice(piece);
        }
    }
}

fn put_header(len: usize, dst: &mut BytesMut) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for shift in [12, 8, 4, 0] {
        dst.put_u8(HEX[(len >> shift) & 0xf]);
    }
}

fn parse_header(header: &[u8]) -> Result<usize> {
    header.iter().try_fold(0usize, |acc, &byte| {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => {
                return Err(IpcError::Protocol(format!(
                    "bad packet header {:?}",
                    String::from_utf8_lossy(header)
                )))
            }
        };
        Ok((acc << 4) | usize::from(digit))
    })
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = parse_header(&src[..HEADER_LEN])?;
        if len == 0 {
            src.advance(HEADER_LEN);
            return Ok(Some(Packet::Flush));
        }
        if len < HEADER_LEN {
            return Err(IpcError::Protocol(format!("invalid packet length {len}")));
        }
        if len > MAX_PACKET_LEN {
            return Err(IpcError::Protocol(format!(
                "packet length {len} exceeds maximum {MAX_PACKET_LEN}"
            )));
        }

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len - HEADER_LEN).freeze();
        Ok(Some(Packet::Data(payload)))
    }
}

impl Encoder<&[u8]> for PacketCodec {
    type Error = IpcError;

    /// Encode `item` as a single data packet.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Protocol`] when `item` is larger than
    /// [`MAX_PAYLOAD_LEN`]; use [`PacketCodec::encode_chunked`] for
    /// arbitrary sizes.
    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        if item.len() > MAX_PAYLOAD_LEN {
            return Err(IpcError::Protocol(format!(
                "payload of {} bytes does not fit in one packet",
                item.len()
            )));
        }
        dst.reserve(item.len() + HEADER_LEN);
        put_header(item.len() + HEADER_LEN, dst);
        dst.extend_from_slice(item);
        Ok(())
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = IpcError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        match item {
            Packet::Data(bytes) => <Self as Encoder<&[u8]>>::encode(self, bytes.as_ref(), dst),
            Packet::Flush => {
                Self::encode_flush(dst);
                Ok(())
            }
        }
    }
}
