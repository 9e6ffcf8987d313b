//! Message codec
//!
//! Turns typed records into payload bytes and back, keyed by logical
//! message name. The connection only sees the [`MessageCodec`] trait, so a
//! schema-driven codec can replace the default one without touching the
//! framing or dispatch code.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EventStoreError, Result};
use super::messages::*;

/// Encode/decode service for message payloads
pub trait MessageCodec: Send + Sync {
    /// Encode a message into payload bytes
    fn encode(&self, message: &Message) -> Result<Bytes>;

    /// Decode payload bytes as the given message kind
    ///
    /// Fails with `EventStoreError::Codec` on malformed bytes.
    fn decode(&self, kind: MessageKind, bytes: &[u8]) -> Result<Message>;
}

/// Decode a payload straight into its typed record
pub fn decode_typed<T: ProtocolMessage>(codec: &dyn MessageCodec, bytes: &[u8]) -> Result<T> {
    let message = codec.decode(T::KIND, bytes)?;
    let actual = message.kind();
    T::from_message(message).ok_or_else(|| {
        EventStoreError::Codec(format!(
            "codec returned {} when asked for {}",
            actual,
            T::KIND
        ))
    })
}

// =============================================================================
// Bincode Codec
// =============================================================================

/// Default codec: each record is serialized on its own with bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

fn to_bytes<T: Serialize>(kind: MessageKind, value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| EventStoreError::Codec(format!("failed to encode {}: {}", kind, e)))
}

fn from_bytes<T: DeserializeOwned>(kind: MessageKind, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| EventStoreError::Codec(format!("failed to decode {}: {}", kind, e)))
}

impl MessageCodec for BincodeCodec {
    fn encode(&self, message: &Message) -> Result<Bytes> {
        let kind = message.kind();
        match message {
            Message::CreateStream(m) => to_bytes(kind, m),
            Message::CreateStreamCompleted(m) => to_bytes(kind, m),
            Message::WriteEvents(m) => to_bytes(kind, m),
            Message::WriteEventsCompleted(m) => to_bytes(kind, m),
            Message::ReadStreamEventsForward(m) => to_bytes(kind, m),
            Message::ReadStreamEventsForwardCompleted(m) => to_bytes(kind, m),
            Message::SubscribeToStream(m) => to_bytes(kind, m),
            Message::SubscriptionConfirmation(m) => to_bytes(kind, m),
            Message::StreamEventAppeared(m) => to_bytes(kind, m),
            Message::SubscriptionDropped(m) => to_bytes(kind, m),
            Message::UnsubscribeFromStream(m) => to_bytes(kind, m),
        }
    }

    fn decode(&self, kind: MessageKind, bytes: &[u8]) -> Result<Message> {
        let message = match kind {
            MessageKind::CreateStream => Message::CreateStream(from_bytes(kind, bytes)?),
            MessageKind::CreateStreamCompleted => {
                Message::CreateStreamCompleted(from_bytes(kind, bytes)?)
            }
            MessageKind::WriteEvents => Message::WriteEvents(from_bytes(kind, bytes)?),
            MessageKind::WriteEventsCompleted => {
                Message::WriteEventsCompleted(from_bytes(kind, bytes)?)
            }
            MessageKind::ReadStreamEventsForward => {
                Message::ReadStreamEventsForward(from_bytes(kind, bytes)?)
            }
            MessageKind::ReadStreamEventsForwardCompleted => {
                Message::ReadStreamEventsForwardCompleted(from_bytes(kind, bytes)?)
            }
            MessageKind::SubscribeToStream => Message::SubscribeToStream(from_bytes(kind, bytes)?),
            MessageKind::SubscriptionConfirmation => {
                Message::SubscriptionConfirmation(from_bytes(kind, bytes)?)
            }
            MessageKind::StreamEventAppeared => {
                Message::StreamEventAppeared(from_bytes(kind, bytes)?)
            }
            MessageKind::SubscriptionDropped => {
                Message::SubscriptionDropped(from_bytes(kind, bytes)?)
            }
            MessageKind::UnsubscribeFromStream => {
                Message::UnsubscribeFromStream(from_bytes(kind, bytes)?)
            }
        };
        Ok(message)
    }
}
