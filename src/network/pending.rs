//! Pending replies and subscriptions
//!
//! Handles returned by connection operations. Operations return as soon as
//! the request is written; these handles receive the outcome later from the
//! reader thread.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;

use crate::correlation::{CorrelationId, CorrelationRegistry, ResponseHandler};
use crate::error::{EventStoreError, Result};
use crate::protocol::{Message, MessageCodec, RecordedEvent, TcpCommand, UnsubscribeFromStream};

use super::{PacketWriter, Reply};

// =============================================================================
// Single Reply
// =============================================================================

/// Outcome of a single request, delivered asynchronously
pub struct PendingReply<T> {
    correlation_id: CorrelationId,
    receiver: Receiver<Result<T>>,
    registry: Arc<Mutex<CorrelationRegistry>>,
    default_timeout: Duration,
}

impl<T: Send + 'static> PendingReply<T> {
    /// Build a handler/handle pair; `map` turns the raw reply into `T`
    pub(crate) fn channel<F>(
        correlation_id: CorrelationId,
        registry: Arc<Mutex<CorrelationRegistry>>,
        default_timeout: Duration,
        map: F,
    ) -> (ResponseHandler, Self)
    where
        F: Fn(Reply) -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let handler: ResponseHandler = Arc::new(move |reply: Result<Reply>| {
            // Never blocks the reader thread; a second delivery is dropped
            let _ = tx.try_send(reply.and_then(&map));
        });

        let pending = Self {
            correlation_id,
            receiver: rx,
            registry,
            default_timeout,
        };
        (handler, pending)
    }
}

impl<T> PendingReply<T> {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Block until the reply arrives or the configured request timeout passes
    pub fn wait(self) -> Result<T> {
        let timeout = self.default_timeout;
        self.wait_timeout(timeout)
    }

    /// Block until the reply arrives or `timeout` passes
    ///
    /// On timeout the registration is cancelled, so a late response is
    /// discarded by the dispatcher.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.registry.lock().cancel(&self.correlation_id);
                Err(EventStoreError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EventStoreError::ConnectionClosed),
        }
    }

    /// Non-blocking poll
    pub fn try_recv(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(EventStoreError::ConnectionClosed)),
        }
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Translate a raw subscription reply into an event for the caller
///
/// Confirmations and empty replies carry nothing for the caller.
pub(crate) fn subscription_item(reply: Result<Reply>) -> Option<Result<RecordedEvent>> {
    match reply {
        Ok(Reply::EventAppeared(event)) => Some(Ok(event)),
        Ok(Reply::SubscriptionDropped(dropped)) => {
            Some(Err(EventStoreError::SubscriptionDropped(dropped.reason)))
        }
        Ok(Reply::SubscriptionConfirmed(_)) | Ok(Reply::Empty) => None,
        Ok(_) => Some(Err(EventStoreError::UnexpectedReply("StreamEventAppeared"))),
        Err(e) => Some(Err(e)),
    }
}

/// What a subscription needs to tear itself down
#[derive(Clone)]
pub(crate) struct SubscriptionControl {
    pub(crate) correlation_id: CorrelationId,
    pub(crate) registry: Arc<Mutex<CorrelationRegistry>>,
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) writer: PacketWriter,
}

impl SubscriptionControl {
    /// Cancel the registration and tell the server to stop pushing
    ///
    /// Safe to call more than once; only the first call writes.
    pub(crate) fn unsubscribe(&self) -> Result<()> {
        if !self.registry.lock().cancel(&self.correlation_id) {
            // Already dropped by the server or the connection
            return Ok(());
        }

        let sent = self
            .codec
            .encode(&Message::from(UnsubscribeFromStream::default()))
            .and_then(|payload| {
                self.writer
                    .send(TcpCommand::UnsubscribeFromStream, &self.correlation_id, &payload)
            });
        if let Err(e) = &sent {
            // Pushes still arriving for this id go to the no-op handler
            tracing::warn!(
                "Failed to unsubscribe {}; server may keep pushing: {}",
                self.correlation_id,
                e
            );
        }
        sent
    }

    /// Unsubscribe where nobody is left to receive the error
    pub(crate) fn release(&self) {
        if let Err(e) = self.unsubscribe() {
            tracing::debug!("Release of subscription {} failed: {}", self.correlation_id, e);
        }
    }
}

/// Live feed of events appended to a stream after the subscription started
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    stream: String,
    receiver: Receiver<Result<RecordedEvent>>,
    control: SubscriptionControl,
}

impl Subscription {
    pub(crate) fn channel(
        stream: String,
        control: SubscriptionControl,
    ) -> (ResponseHandler, Self) {
        let (tx, rx) = channel::unbounded();
        let handler: ResponseHandler = Arc::new(move |reply: Result<Reply>| {
            if let Some(item) = subscription_item(reply) {
                let _ = tx.send(item);
            }
        });

        let subscription = Self {
            stream,
            receiver: rx,
            control,
        };
        (handler, subscription)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.control.correlation_id
    }

    /// Block for the next event; `None` once the subscription has ended
    pub fn recv(&self) -> Option<Result<RecordedEvent>> {
        self.receiver.recv().ok()
    }

    /// Block for the next event for at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<RecordedEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => item.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EventStoreError::ConnectionClosed),
        }
    }

    pub fn try_recv(&self) -> Option<Result<RecordedEvent>> {
        self.receiver.try_recv().ok()
    }

    /// Blocking iterator over events until the subscription ends
    pub fn iter(&self) -> channel::Iter<'_, Result<RecordedEvent>> {
        self.receiver.iter()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) -> Result<()> {
        self.control.unsubscribe()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.control.release();
    }
}

/// Handle for a read-and-subscribe feed; events go to the caller's callback
///
/// Dropping the handle stops the live feed.
pub struct CatchUpSubscription {
    stream: String,
    control: SubscriptionControl,
}

impl CatchUpSubscription {
    pub(crate) fn new(stream: String, control: SubscriptionControl) -> Self {
        Self { stream, control }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.control.correlation_id
    }

    /// Whether the live half is still registered
    pub fn is_active(&self) -> bool {
        self.control.registry.lock().contains(&self.control.correlation_id)
    }

    /// Stop the live feed
    pub fn unsubscribe(self) -> Result<()> {
        self.control.unsubscribe()
    }
}

impl Drop for CatchUpSubscription {
    fn drop(&mut self) {
        self.control.release();
    }
}
