//! Packet Writer
//!
//! Serialized write path shared by callers and the reader thread.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::correlation::CorrelationId;
use crate::error::Result;
use crate::protocol::{serialize_packet, TcpCommand};

/// Cloneable handle to the socket's write half
///
/// Each packet is written and flushed under one lock, so packets from
/// different threads never interleave.
#[derive(Clone)]
pub struct PacketWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl PacketWriter {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Frame and write one packet
    pub fn send(&self, command: TcpCommand, correlation_id: &CorrelationId, payload: &[u8]) -> Result<()> {
        let packet = serialize_packet(command.code(), correlation_id, payload);

        let mut writer = self.inner.lock();
        writer.write_all(&packet)?;
        writer.flush()?;

        tracing::debug!(
            "Sent {} command with correlation id: {}",
            command,
            correlation_id
        );
        Ok(())
    }
}
