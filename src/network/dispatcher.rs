//! Command Dispatcher
//!
//! Turns reassembled packets into typed replies and hands them to the
//! handler registered under the packet's correlation id.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::correlation::{noop_handler, CorrelationRegistry, ResponseHandler};
use crate::error::{EventStoreError, Result};
use crate::protocol::{
    decode_typed, CreateStreamCompleted, MessageCodec, OperationResult, Packet,
    ReadStreamEventsForwardCompleted, RecordedEvent, StreamEventAppeared,
    SubscriptionConfirmation, SubscriptionDropped, TcpCommand, WriteEventsCompleted,
};

use super::PacketWriter;

/// Decoded outcome delivered to a response handler
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nothing to decode (heartbeat, unhandled or unknown command)
    Empty,

    /// Stream created, or it already existed
    StreamCreated,

    EventWritten { event_number: i32 },

    StreamEventsRead(ReadStreamEventsForwardCompleted),

    /// One live event pushed to a subscription
    EventAppeared(RecordedEvent),

    SubscriptionConfirmed(SubscriptionConfirmation),

    /// Final message on a subscription
    SubscriptionDropped(SubscriptionDropped),
}

/// Routes packets to registered handlers
///
/// Runs on the connection's reader thread only, so handlers for a given
/// correlation id are invoked in the order their packets were reassembled.
pub struct Dispatcher {
    registry: Arc<Mutex<CorrelationRegistry>>,
    codec: Arc<dyn MessageCodec>,
    writer: PacketWriter,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Mutex<CorrelationRegistry>>,
        codec: Arc<dyn MessageCodec>,
        writer: PacketWriter,
    ) -> Self {
        Self {
            registry,
            codec,
            writer,
        }
    }

    /// Handle one inbound packet
    ///
    /// Never fails: decode problems are handed to the handler, unknown
    /// commands and unknown correlation ids are logged.
    pub fn dispatch(&self, packet: Packet) {
        let id = packet.correlation_id;
        let command = packet.command();

        match command {
            Some(command) => tracing::debug!(
                "Received {} command with correlation id: {}",
                command,
                id
            ),
            None => tracing::debug!(
                "Received unknown command 0x{:02x} with correlation id: {}",
                packet.command_code,
                id
            ),
        }

        let handler = self.handler_for(&packet, command);

        match command {
            Some(TcpCommand::HeartbeatRequestCommand) => {
                // Answer before any handler runs so the response is the next write
                if let Err(e) = self.writer.send(TcpCommand::HeartbeatResponseCommand, &id, &[]) {
                    tracing::error!("Failed to send heartbeat response: {}", e);
                }
                handler(Ok(Reply::Empty));
            }
            Some(command) => handler(self.decode_reply(command, &packet.payload)),
            None => {
                tracing::warn!(
                    "Don't know how to process command code 0x{:02x}",
                    packet.command_code
                );
                handler(Ok(Reply::Empty));
            }
        }
    }

    fn handler_for(&self, packet: &Packet, command: Option<TcpCommand>) -> ResponseHandler {
        let id = &packet.correlation_id;
        let mut registry = self.registry.lock();

        let handler = match registry.take(id) {
            Some(handler) => handler,
            None => {
                if command != Some(TcpCommand::HeartbeatRequestCommand) {
                    tracing::warn!("No handler registered for correlation id {}", id);
                }
                noop_handler()
            }
        };

        // A dropped subscription never delivers again
        if command == Some(TcpCommand::SubscriptionDropped) {
            registry.cancel(id);
        }

        handler
    }

    /// Decode the payload for `command` into a reply
    fn decode_reply(&self, command: TcpCommand, payload: &[u8]) -> Result<Reply> {
        let codec = self.codec.as_ref();

        match command {
            TcpCommand::CreateStreamCompleted => {
                let res: CreateStreamCompleted = decode_typed(codec, payload)?;
                match OperationResult::from_code(res.error_code) {
                    // An existing stream counts as created
                    OperationResult::Success | OperationResult::WrongExpectedVersion => {
                        Ok(Reply::StreamCreated)
                    }
                    kind => Err(operation_error(kind, res.error)),
                }
            }
            TcpCommand::WriteEventsCompleted => {
                let res: WriteEventsCompleted = decode_typed(codec, payload)?;
                match OperationResult::from_code(res.error_code) {
                    OperationResult::Success => Ok(Reply::EventWritten {
                        event_number: res.event_number,
                    }),
                    kind => Err(operation_error(kind, res.error)),
                }
            }
            TcpCommand::ReadStreamEventsForwardCompleted => {
                let res: ReadStreamEventsForwardCompleted = decode_typed(codec, payload)?;
                Ok(Reply::StreamEventsRead(res))
            }
            TcpCommand::StreamEventAppeared => {
                let res: StreamEventAppeared = decode_typed(codec, payload)?;
                Ok(Reply::EventAppeared(res.event.event))
            }
            TcpCommand::SubscriptionConfirmation => {
                let res: SubscriptionConfirmation = decode_typed(codec, payload)?;
                Ok(Reply::SubscriptionConfirmed(res))
            }
            TcpCommand::SubscriptionDropped => {
                let res: SubscriptionDropped = decode_typed(codec, payload)?;
                Ok(Reply::SubscriptionDropped(res))
            }
            other => {
                tracing::warn!("Don't know how to process a {} command", other);
                Ok(Reply::Empty)
            }
        }
    }
}

fn operation_error(kind: OperationResult, message: Option<String>) -> EventStoreError {
    EventStoreError::Operation {
        kind,
        message: message.unwrap_or_default(),
    }
}
