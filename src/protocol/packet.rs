//! Packet encoding
//!
//! One protocol packet: command code, correlation id and payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::correlation::CorrelationId;
use crate::error::{EventStoreError, Result};
use super::TcpCommand;

/// Size of the little-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Command byte + 16-byte correlation id
pub const HEADER_SIZE: usize = 17;

/// A decoded inner packet (everything after the length prefix)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw command code; may be outside the known command table
    pub command_code: u8,

    pub correlation_id: CorrelationId,

    /// Empty when the packet carries no body
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: TcpCommand, correlation_id: CorrelationId, payload: Bytes) -> Self {
        Self {
            command_code: command.code(),
            correlation_id,
            payload,
        }
    }

    /// The command, if the code is in the table
    pub fn command(&self) -> Option<TcpCommand> {
        TcpCommand::from_code(self.command_code)
    }

    /// Value written to the length prefix
    pub fn content_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize with the length prefix
    pub fn serialize(&self) -> Bytes {
        serialize_packet(self.command_code, &self.correlation_id, &self.payload)
    }

    /// Parse an inner packet as emitted by the framer
    pub fn parse(mut inner: Bytes) -> Result<Self> {
        if inner.len() < HEADER_SIZE {
            return Err(EventStoreError::Framing(format!(
                "Inner packet too short: expected at least {} bytes, got {}",
                HEADER_SIZE,
                inner.len()
            )));
        }

        let command_code = inner[0];
        let correlation_id = CorrelationId::from_slice(&inner[1..HEADER_SIZE])?;
        let payload = inner.split_off(HEADER_SIZE);

        Ok(Self {
            command_code,
            correlation_id,
            payload,
        })
    }
}

/// Build a wire packet
///
/// Format: content_len (4, LE) + command (1) + correlation_id (16) + payload
pub fn serialize_packet(command_code: u8, correlation_id: &CorrelationId, payload: &[u8]) -> Bytes {
    let content_length = HEADER_SIZE + payload.len();

    let mut packet = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + content_length);
    packet.put_u32_le(content_length as u32);
    packet.put_u8(command_code);
    packet.put_slice(correlation_id.as_bytes());
    packet.put_slice(payload);

    packet.freeze()
}
