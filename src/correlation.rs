//! Correlation Module
//!
//! Routes inbound packets back to the request that caused them.
//!
//! Every outgoing request carries a fresh [`CorrelationId`]. The server
//! echoes it on the response (or on every push, for subscriptions), and the
//! [`CorrelationRegistry`] maps it back to the handler registered at send
//! time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{EventStoreError, Result};
use crate::network::Reply;

// =============================================================================
// Correlation Id
// =============================================================================

/// 128-bit identifier linking a request to its response(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Read an id from exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|e| EventStoreError::Framing(format!("Invalid correlation id: {}", e)))
    }

    /// Raw bytes as written on the wire
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Callback invoked with the decoded outcome of an inbound packet
pub type ResponseHandler = Arc<dyn Fn(Result<Reply>) + Send + Sync>;

/// Handler that ignores its input; used for unknown correlation ids
pub fn noop_handler() -> ResponseHandler {
    Arc::new(|_: Result<Reply>| {})
}

struct PendingEntry {
    /// Multi-response registrations survive delivery
    multi: bool,
    handler: ResponseHandler,
}

/// Pending handlers keyed by correlation id
///
/// Owned by a single connection. Single-use entries are removed on first
/// delivery; multi-use ("subscription") entries stay until cancelled.
#[derive(Default)]
pub struct CorrelationRegistry {
    entries: HashMap<CorrelationId, PendingEntry>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handler, replacing any previous entry for the same id
    pub fn register(&mut self, id: CorrelationId, multi: bool, handler: ResponseHandler) {
        let previous = self.entries.insert(id, PendingEntry { multi, handler });
        if previous.is_some() {
            tracing::warn!("Replaced existing registration for correlation id {}", id);
        }
    }

    /// Look up the handler for `id`, removing it unless it is multi-use
    pub fn take(&mut self, id: &CorrelationId) -> Option<ResponseHandler> {
        let multi = self.entries.get(id)?.multi;
        if multi {
            self.entries.get(id).map(|entry| Arc::clone(&entry.handler))
        } else {
            self.entries.remove(id).map(|entry| entry.handler)
        }
    }

    /// Like [`take`](Self::take), but unknown ids resolve to a no-op handler
    pub fn resolve(&mut self, id: &CorrelationId) -> ResponseHandler {
        self.take(id).unwrap_or_else(noop_handler)
    }

    /// Remove a registration of either kind; returns whether it existed
    pub fn cancel(&mut self, id: &CorrelationId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_multi(&self, id: &CorrelationId) -> bool {
        self.entries.get(id).map(|entry| entry.multi).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every registration, returning the handlers
    pub fn drain(&mut self) -> Vec<ResponseHandler> {
        self.entries.drain().map(|(_, entry)| entry.handler).collect()
    }
}
