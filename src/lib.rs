//! # eventstore-tcp
//!
//! A client driver for the Event Store binary TCP protocol:
//! - Length-prefixed packet framing with reassembly of fragmented reads
//! - Correlation-id routing of responses, including multi-response
//!   subscriptions
//! - Stream creation, appends, forward reads and live subscriptions
//! - Read-and-subscribe: history followed by live events, in order and
//!   without duplicates
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Connection API                         │
//! │     create_stream / create_event / read / subscribe         │
//! └──────────┬──────────────────────────────────▲───────────────┘
//!            │ register + write                 │ handler(reply)
//! ┌──────────▼──────────┐            ┌──────────┴──────────────┐
//! │   Correlation       │◄───lookup──│      Dispatcher         │
//! │   Registry          │            │  (decode via codec)     │
//! └─────────────────────┘            └──────────▲──────────────┘
//!            │                                  │ packets
//! ┌──────────▼──────────┐            ┌──────────┴──────────────┐
//! │   PacketWriter      │            │     PacketFramer        │
//! │  (serialize, send)  │            │    (reader thread)      │
//! └──────────┬──────────┘            └──────────▲──────────────┘
//!            └────────────────► TCP ────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod correlation;
pub mod network;
pub mod supervisor;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EventStoreError, Result};
pub use config::Config;
pub use network::{CatchUpSubscription, Connection, PendingReply, Subscription};
pub use protocol::RecordedEvent;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
