//! Packet framer
//!
//! Reassembles length-prefixed packets from socket reads of arbitrary size.
//!
//! ## Reassembly
//! ```text
//!   read #1            read #2                    read #3
//! ┌─────────────┐ ┌───────────────────────────┐ ┌─────────┐
//! │ len │ pkt A…│ │…A │ len │ pkt B │ len │ C…│ │…C       │
//! └─────────────┘ └───────────────────────────┘ └─────────┘
//!   buffered        emit A, emit B, buffer C      emit C
//! ```
//!
//! Between reads the leftover buffer holds at most one partial packet and
//! never a complete one.

use bytes::{Buf, Bytes, BytesMut};

use crate::config::DEFAULT_MAX_PACKET_SIZE;
use crate::error::{EventStoreError, Result};
use super::packet::{HEADER_SIZE, LENGTH_PREFIX_SIZE};

/// Stateful reassembler for inbound bytes
#[derive(Debug)]
pub struct PacketFramer {
    /// Partial packet carried over from the previous read
    leftover: BytesMut,

    /// Largest content length accepted before the stream is declared corrupt
    max_packet_size: usize,
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            leftover: BytesMut::new(),
            max_packet_size,
        }
    }

    /// Feed one chunk of socket data
    ///
    /// Returns every inner packet (bytes after the length prefix) completed
    /// by this chunk, in arrival order. A framing error leaves the framer
    /// empty; the stream cannot be resynchronized after it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        self.leftover.extend_from_slice(chunk);

        let mut packets = Vec::new();
        loop {
            // Cannot read the length prefix yet
            if self.leftover.len() < LENGTH_PREFIX_SIZE {
                break;
            }

            let content_length = u32::from_le_bytes([
                self.leftover[0],
                self.leftover[1],
                self.leftover[2],
                self.leftover[3],
            ]) as usize;

            if content_length < HEADER_SIZE || content_length > self.max_packet_size {
                self.leftover.clear();
                return Err(EventStoreError::Framing(format!(
                    "Invalid content length {} (expected {}..={})",
                    content_length, HEADER_SIZE, self.max_packet_size
                )));
            }

            let expected = content_length + LENGTH_PREFIX_SIZE;
            if self.leftover.len() < expected {
                tracing::trace!(
                    "Partial packet buffered (wanted: {} bytes, got: {} bytes)",
                    expected,
                    self.leftover.len()
                );
                break;
            }

            let mut packet = self.leftover.split_to(expected);
            packet.advance(LENGTH_PREFIX_SIZE);
            packets.push(packet.freeze());
        }

        Ok(packets)
    }

    /// Number of bytes waiting for the rest of their packet
    pub fn buffered(&self) -> usize {
        self.leftover.len()
    }

    /// Discard any partial packet
    pub fn reset(&mut self) {
        self.leftover.clear();
    }
}
