//! Protocol Module
//!
//! Defines the Event Store binary TCP protocol as seen by a client.
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────────────┬─────────────────────┐
//! │ Len (4, LE)  │ Cmd (1)  │ Correlation Id (16)  │      Payload        │
//! └──────────────┴──────────┴──────────────────────┴─────────────────────┘
//!                └────────────────── Len = 17 + payload ─────────────────┘
//! ```
//!
//! The length prefix never counts itself. Everything after it is the
//! "inner packet" handed to the dispatcher.
//!
//! ### Selected Commands
//! - 0x01 / 0x02: heartbeat request / response
//! - 0x80 / 0x81: CreateStream / CreateStreamCompleted
//! - 0x82 / 0x83: WriteEvents / WriteEventsCompleted
//! - 0xB2 / 0xB3: ReadStreamEventsForward / ReadStreamEventsForwardCompleted
//! - 0xC0 / 0xC2: SubscribeToStream / StreamEventAppeared
//!
//! Payloads are opaque to the framing layer and go through a [`MessageCodec`].

mod command;
mod result;
mod messages;
mod codec;
mod packet;
mod framer;

pub use command::TcpCommand;
pub use result::OperationResult;
pub use messages::{
    CreateStream, CreateStreamCompleted, Message, MessageKind, NewEvent, ProtocolMessage,
    ReadStreamEventsForward, ReadStreamEventsForwardCompleted, RecordedEvent, ResolvedEvent,
    StreamEventAppeared, SubscribeToStream, SubscriptionConfirmation, SubscriptionDropped,
    UnsubscribeFromStream, WriteEvents, WriteEventsCompleted, EXPECTED_VERSION_ANY,
};
pub use codec::{decode_typed, BincodeCodec, MessageCodec};
pub use packet::{serialize_packet, Packet, HEADER_SIZE, LENGTH_PREFIX_SIZE};
pub use framer::PacketFramer;
