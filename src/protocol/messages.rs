//! Message definitions
//!
//! Typed payload records, one per logical message name. The wire shape of
//! each record is owned by the [`MessageCodec`](super::MessageCodec).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expected-version sentinel that disables the optimistic concurrency check
pub const EXPECTED_VERSION_ANY: i32 = -2;

// =============================================================================
// Requests
// =============================================================================

/// Create a new stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStream {
    pub event_stream_id: String,
    pub create_stream_id: Uuid,
    pub metadata: Vec<u8>,
    pub allow_forwarding: bool,
    pub is_json: bool,
}

/// A single event to append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// Append events to a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEvents {
    pub event_stream_id: String,
    pub expected_version: i32,
    pub events: Vec<NewEvent>,
    pub allow_forwarding: bool,
}

/// Read a range of events, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStreamEventsForward {
    pub event_stream_id: String,
    pub start_index: i32,
    pub max_count: i32,
    pub resolve_link_tos: bool,
}

/// Start a live subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeToStream {
    pub event_stream_id: String,
    pub resolve_link_tos: bool,
}

/// Stop the subscription identified by the packet's correlation id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeFromStream {}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStreamCompleted {
    pub event_stream_id: String,
    pub error_code: i32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEventsCompleted {
    pub event_stream_id: String,
    pub error_code: i32,
    pub error: Option<String>,
    /// Sequence number assigned to the first written event
    pub event_number: i32,
}

/// An event as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub event_stream_id: String,
    /// Zero-based position within the stream
    pub event_number: i32,
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// An event plus the link event that pointed at it, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub event: RecordedEvent,
    pub link: Option<RecordedEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStreamEventsForwardCompleted {
    pub event_stream_id: String,
    pub events: Vec<ResolvedEvent>,
    pub next_event_number: i32,
    pub last_event_number: i32,
    pub is_end_of_stream: bool,
    pub last_commit_position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfirmation {
    pub last_commit_position: i64,
    pub last_event_number: Option<i32>,
}

/// Pushed once per event appended after the subscription started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEventAppeared {
    pub event: ResolvedEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDropped {
    pub event_stream_id: String,
    pub reason: String,
}

// =============================================================================
// Message Envelope
// =============================================================================

/// Implemented by every typed record so it can be boxed into and recovered
/// from a [`Message`]
pub trait ProtocolMessage: Sized + Into<Message> {
    const KIND: MessageKind;

    fn from_message(message: Message) -> Option<Self>;
}

macro_rules! messages {
    ($($name:ident,)+) => {
        /// Logical message names understood by the codec
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $($name,)+
        }

        impl MessageKind {
            pub fn name(self) -> &'static str {
                match self {
                    $(MessageKind::$name => stringify!($name),)+
                }
            }
        }

        /// Any typed payload
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($name($name),)+
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$name(_) => MessageKind::$name,)+
                }
            }
        }

        $(
            impl From<$name> for Message {
                fn from(message: $name) -> Self {
                    Message::$name(message)
                }
            }

            impl ProtocolMessage for $name {
                const KIND: MessageKind = MessageKind::$name;

                fn from_message(message: Message) -> Option<Self> {
                    match message {
                        Message::$name(inner) => Some(inner),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )+
    };
}

messages! {
    CreateStream,
    CreateStreamCompleted,
    WriteEvents,
    WriteEventsCompleted,
    ReadStreamEventsForward,
    ReadStreamEventsForwardCompleted,
    SubscribeToStream,
    SubscriptionConfirmation,
    StreamEventAppeared,
    SubscriptionDropped,
    UnsubscribeFromStream,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
