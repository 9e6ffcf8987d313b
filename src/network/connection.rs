//! Connection
//!
//! Owns the socket, the reader thread and the correlation registry, and
//! exposes the client operations.
//!
//! ## Threads
//! - Caller threads frame and write requests through the shared
//!   [`PacketWriter`] after registering a handler.
//! - One reader thread owns the [`PacketFramer`] and runs the [`Dispatcher`];
//!   every handler is invoked there, one packet at a time.

use std::io::{BufWriter, ErrorKind, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::correlation::{CorrelationId, CorrelationRegistry, ResponseHandler};
use crate::error::{EventStoreError, Result};
use crate::protocol::{
    BincodeCodec, CreateStream, Message, MessageCodec, NewEvent, Packet, PacketFramer,
    ReadStreamEventsForward, ReadStreamEventsForwardCompleted, RecordedEvent, SubscribeToStream,
    TcpCommand, WriteEvents, EXPECTED_VERSION_ANY,
};

use super::catch_up::{CatchUpMerge, MergePhase};
use super::pending::{subscription_item, SubscriptionControl};
use super::{CatchUpSubscription, Dispatcher, PacketWriter, PendingReply, Reply, Subscription};

/// Max count used when reading a whole stream
pub const READ_ALL_MAX_COUNT: i32 = 10_000_000;

/// A client connection to one Event Store node
pub struct Connection {
    config: Config,

    /// Kept for shutdown; reads and writes use their own clones
    stream: TcpStream,

    writer: PacketWriter,

    registry: Arc<Mutex<CorrelationRegistry>>,

    codec: Arc<dyn MessageCodec>,

    /// Set once by whichever side closes first
    closed: Arc<AtomicBool>,

    reader: Mutex<Option<JoinHandle<()>>>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Connect using the default bincode codec
    pub fn connect(config: Config) -> Result<Self> {
        Self::connect_with_codec(config, Arc::new(BincodeCodec::new()))
    }

    /// Connect with a caller-supplied message codec
    pub fn connect_with_codec(config: Config, codec: Arc<dyn MessageCodec>) -> Result<Self> {
        tracing::info!("Connecting to Event Store at {}", config.addr());
        let stream = open_stream(&config)?;
        Self::from_stream(stream, config, codec)
    }

    /// Wrap an already connected socket and start the reader thread
    pub fn from_stream(stream: TcpStream, config: Config, codec: Arc<dyn MessageCodec>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        if config.write_timeout_ms > 0 {
            stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;
        }

        let read_stream = stream.try_clone()?;
        let writer = PacketWriter::new(BufWriter::new(stream.try_clone()?));
        let registry = Arc::new(Mutex::new(CorrelationRegistry::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = ReaderLoop {
            stream: read_stream,
            framer: PacketFramer::with_max_packet_size(config.max_packet_size),
            dispatcher: Dispatcher::new(Arc::clone(&registry), Arc::clone(&codec), writer.clone()),
            registry: Arc::clone(&registry),
            closed: Arc::clone(&closed),
            read_buffer_size: config.read_buffer_size.max(1),
            peer_addr: peer_addr.clone(),
        };
        let handle = thread::Builder::new()
            .name("eventstore-reader".to_string())
            .spawn(move || reader.run())?;

        tracing::info!("Connected to {}", peer_addr);

        Ok(Self {
            config,
            stream,
            writer,
            registry,
            codec,
            closed,
            reader: Mutex::new(Some(handle)),
            peer_addr,
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Create a stream; succeeds if it already exists
    pub fn create_stream(&self, stream: &str) -> Result<PendingReply<()>> {
        let message = CreateStream {
            event_stream_id: stream.to_string(),
            create_stream_id: Uuid::new_v4(),
            metadata: Vec::new(),
            allow_forwarding: true,
            is_json: true,
        };

        self.request(TcpCommand::CreateStream, message, |reply| match reply {
            Reply::StreamCreated => Ok(()),
            _ => Err(EventStoreError::UnexpectedReply("CreateStreamCompleted")),
        })
    }

    /// Append one event with no expected-version check
    ///
    /// Resolves to the event number assigned by the server.
    pub fn create_event(
        &self,
        stream: &str,
        event_type: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<PendingReply<i32>> {
        let message = WriteEvents {
            event_stream_id: stream.to_string(),
            expected_version: EXPECTED_VERSION_ANY,
            events: vec![NewEvent {
                event_id: Uuid::new_v4(),
                event_type: event_type.to_string(),
                is_json: true,
                data: data.into(),
                metadata: Vec::new(),
            }],
            allow_forwarding: true,
        };

        self.request(TcpCommand::WriteEvents, message, |reply| match reply {
            Reply::EventWritten { event_number } => Ok(event_number),
            _ => Err(EventStoreError::UnexpectedReply("WriteEventsCompleted")),
        })
    }

    /// Raw forward read of up to `max_count` events starting at `start_index`
    pub fn read_stream_events_forward(
        &self,
        stream: &str,
        start_index: i32,
        max_count: i32,
    ) -> Result<PendingReply<ReadStreamEventsForwardCompleted>> {
        self.request(
            TcpCommand::ReadStreamEventsForward,
            read_forward_message(stream, start_index, max_count),
            |reply| match reply {
                Reply::StreamEventsRead(res) => Ok(res),
                _ => Err(EventStoreError::UnexpectedReply("ReadStreamEventsForwardCompleted")),
            },
        )
    }

    /// Read every event in the stream, in order
    pub fn read_stream(&self, stream: &str) -> Result<PendingReply<Vec<RecordedEvent>>> {
        self.request(
            TcpCommand::ReadStreamEventsForward,
            read_forward_message(stream, 0, READ_ALL_MAX_COUNT),
            read_all_events,
        )
    }

    /// Receive every event appended to the stream from now on
    pub fn subscribe_to_stream(&self, stream: &str) -> Result<Subscription> {
        let id = CorrelationId::generate();
        let (handler, subscription) =
            Subscription::channel(stream.to_string(), self.subscription_control(id));

        self.send_request(
            TcpCommand::SubscribeToStream,
            subscribe_message(stream),
            true,
            id,
            handler,
        )?;
        Ok(subscription)
    }

    /// Deliver every existing event, then every new one, exactly once and in
    /// order
    ///
    /// The subscription starts before the historical read, so no event can
    /// fall between them; overlap is removed by event number. The callback
    /// runs on the reader thread and must not block for long.
    ///
    /// If the read gets no answer within the request timeout, the callback
    /// receives `EventStoreError::Timeout` once, from a watchdog thread, and
    /// the live feed stops.
    pub fn read_and_subscribe_to_stream<F>(&self, stream: &str, callback: F) -> Result<CatchUpSubscription>
    where
        F: FnMut(Result<RecordedEvent>) + Send + 'static,
    {
        let merge: Arc<Mutex<CatchUpMerge<RecordedEvent, EventStoreError, F>>> =
            Arc::new(Mutex::new(CatchUpMerge::new(callback)));

        // Live half
        let subscription_id = CorrelationId::generate();
        let control = self.subscription_control(subscription_id);
        let live = Arc::clone(&merge);
        let live_handler: ResponseHandler = Arc::new(move |reply: Result<Reply>| {
            if let Some(item) = subscription_item(reply) {
                live.lock().on_live(item);
            }
        });
        self.send_request(
            TcpCommand::SubscribeToStream,
            subscribe_message(stream),
            true,
            subscription_id,
            live_handler,
        )?;
        // Dropping the handle on an early return below unsubscribes
        let handle = CatchUpSubscription::new(stream.to_string(), control.clone());

        // Historical half
        let history = Arc::clone(&merge);
        let teardown = control;
        let complete_history = Arc::new(move |events: Result<Vec<RecordedEvent>>| {
            let failed = {
                let mut merge = history.lock();
                merge.on_history(events);
                merge.phase() == MergePhase::Failed
            };
            if failed {
                teardown.release();
            }
        });

        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let on_reply = Arc::clone(&complete_history);
        let history_handler: ResponseHandler = Arc::new(move |reply: Result<Reply>| {
            let _ = done_tx.try_send(());
            on_reply(reply.and_then(read_all_events));
        });

        // The read gets the same deadline as any other request. Whichever of
        // the reader and the watchdog removes the registration first
        // completes the history.
        let read_id = CorrelationId::generate();
        let registry = Arc::clone(&self.registry);
        let timeout = self.config.request_timeout();
        let on_timeout = Arc::clone(&complete_history);
        thread::Builder::new()
            .name("eventstore-history-timeout".to_string())
            .spawn(move || {
                // Disconnected means the handler ran or was dropped
                if !matches!(done_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                    return;
                }
                if registry.lock().cancel(&read_id) {
                    tracing::warn!("Historical read {} timed out after {:?}", read_id, timeout);
                    on_timeout(Err(EventStoreError::Timeout(timeout)));
                }
            })?;

        self.send_request(
            TcpCommand::ReadStreamEventsForward,
            read_forward_message(stream, 0, READ_ALL_MAX_COUNT).into(),
            false,
            read_id,
            history_handler,
        )?;

        Ok(handle)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Shut the socket down; pending requests fail with `ConnectionClosed`
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Closing connection to {}", self.peer_addr);
        }
        let _ = self.stream.shutdown(Shutdown::Both);

        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            // Closing from inside a handler must not wait on ourselves
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Requests and subscriptions still registered
    pub fn pending_requests(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn request<T, M, F>(&self, command: TcpCommand, message: M, map: F) -> Result<PendingReply<T>>
    where
        T: Send + 'static,
        M: Into<Message>,
        F: Fn(Reply) -> Result<T> + Send + Sync + 'static,
    {
        let id = CorrelationId::generate();
        let (handler, pending) = PendingReply::channel(
            id,
            Arc::clone(&self.registry),
            self.config.request_timeout(),
            map,
        );
        self.send_request(command, message.into(), false, id, handler)?;
        Ok(pending)
    }

    /// Register `handler` under `id`, then write the request
    fn send_request(
        &self,
        command: TcpCommand,
        message: Message,
        multi: bool,
        id: CorrelationId,
        handler: ResponseHandler,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(EventStoreError::ConnectionClosed);
        }

        let payload = self.codec.encode(&message)?;
        self.registry.lock().register(id, multi, handler);

        // The reader marks the connection closed before draining the registry
        if self.is_closed() {
            self.registry.lock().cancel(&id);
            return Err(EventStoreError::ConnectionClosed);
        }

        if let Err(e) = self.writer.send(command, &id, &payload) {
            self.registry.lock().cancel(&id);
            return Err(e);
        }
        Ok(())
    }

    fn subscription_control(&self, id: CorrelationId) -> SubscriptionControl {
        SubscriptionControl {
            correlation_id: id,
            registry: Arc::clone(&self.registry),
            codec: Arc::clone(&self.codec),
            writer: self.writer.clone(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Reader Thread
// =============================================================================

struct ReaderLoop {
    stream: TcpStream,
    framer: PacketFramer,
    dispatcher: Dispatcher,
    registry: Arc<Mutex<CorrelationRegistry>>,
    closed: Arc<AtomicBool>,
    read_buffer_size: usize,
    peer_addr: String,
}

impl ReaderLoop {
    fn run(mut self) {
        let outcome = self.pump();
        let was_closed = self.closed.swap(true, Ordering::SeqCst);

        match outcome {
            Ok(()) => tracing::info!("Disconnected from {}", self.peer_addr),
            Err(e) if was_closed => tracing::debug!("Reader for {} stopped: {}", self.peer_addr, e),
            Err(e) => tracing::error!("Connection to {} failed: {}", self.peer_addr, e),
        }
        let _ = self.stream.shutdown(Shutdown::Both);

        let orphans = self.registry.lock().drain();
        if !orphans.is_empty() {
            tracing::debug!("Failing {} pending requests", orphans.len());
        }
        for handler in orphans {
            handler(Err(EventStoreError::ConnectionClosed));
        }
    }

    /// Read until EOF or a fatal error
    fn pump(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.read_buffer_size];

        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            for inner in self.framer.feed(&buf[..n])? {
                self.dispatcher.dispatch(Packet::parse(inner)?);
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn open_stream(config: &Config) -> Result<TcpStream> {
    let addr = config.addr();
    if config.connect_timeout_ms == 0 {
        return Ok(TcpStream::connect(&addr)?);
    }

    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let mut last_error = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => e.into(),
        None => EventStoreError::Config(format!("{} did not resolve to any address", addr)),
    })
}

fn read_forward_message(stream: &str, start_index: i32, max_count: i32) -> ReadStreamEventsForward {
    ReadStreamEventsForward {
        event_stream_id: stream.to_string(),
        start_index,
        max_count,
        resolve_link_tos: false,
    }
}

fn subscribe_message(stream: &str) -> Message {
    Message::from(SubscribeToStream {
        event_stream_id: stream.to_string(),
        resolve_link_tos: false,
    })
}

/// Strip a forward-read envelope down to its events
fn read_all_events(reply: Reply) -> Result<Vec<RecordedEvent>> {
    match reply {
        Reply::StreamEventsRead(res) => Ok(res.events.into_iter().map(|e| e.event).collect()),
        _ => Err(EventStoreError::UnexpectedReply("ReadStreamEventsForwardCompleted")),
    }
}
