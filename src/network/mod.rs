//! Network Module
//!
//! TCP connection handling and response routing.
//!
//! ## Architecture
//! - One socket per [`Connection`]
//! - Dedicated reader thread: framer → dispatcher → handlers
//! - Writes serialized through a shared [`PacketWriter`]

mod writer;
mod dispatcher;
mod pending;
mod catch_up;
mod connection;

pub use writer::PacketWriter;
pub use dispatcher::{Dispatcher, Reply};
pub use pending::{CatchUpSubscription, PendingReply, Subscription};
pub use catch_up::{CatchUpMerge, MergePhase, Sequenced};
pub use connection::{Connection, READ_ALL_MAX_COUNT};
