//! Tests for Connection
//!
//! End-to-end tests against an in-process server speaking the same wire
//! protocol. These tests verify:
//! - Every public operation against a simulated event store
//! - Dropped subscription handles release their registrations
//! - Heartbeat handling on a live socket
//! - Fragmented and coalesced server writes
//! - Timeouts (including an unanswered historical read), server
//!   disconnects and framing errors

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use uuid::Uuid;

use eventstore_tcp::correlation::CorrelationId;
use eventstore_tcp::protocol::{
    decode_typed, serialize_packet, BincodeCodec, CreateStream, CreateStreamCompleted, Message,
    MessageCodec, Packet, PacketFramer, ReadStreamEventsForward,
    ReadStreamEventsForwardCompleted, RecordedEvent, ResolvedEvent, StreamEventAppeared,
    SubscribeToStream, SubscriptionConfirmation, SubscriptionDropped, TcpCommand, WriteEvents,
    WriteEventsCompleted,
};
use eventstore_tcp::{Config, Connection, EventStoreError};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Server Side Helpers
// =============================================================================

/// Server end of one client connection
struct ServerConn {
    stream: TcpStream,
    framer: PacketFramer,
    queue: VecDeque<Packet>,
    codec: BincodeCodec,
}

impl ServerConn {
    fn new(stream: TcpStream) -> Self {
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            framer: PacketFramer::new(),
            queue: VecDeque::new(),
            codec: BincodeCodec::new(),
        }
    }

    /// Next packet from the client; `None` once the client hangs up
    fn next_packet(&mut self) -> Option<Packet> {
        let mut buf = [0u8; 4096];
        while self.queue.is_empty() {
            let n = match self.stream.read(&mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => n,
            };
            for inner in self.framer.feed(&buf[..n]).unwrap() {
                self.queue.push_back(Packet::parse(inner).unwrap());
            }
        }
        self.queue.pop_front()
    }

    fn encode(&self, command: TcpCommand, id: CorrelationId, message: Message) -> Vec<u8> {
        let payload = self.codec.encode(&message).unwrap();
        serialize_packet(command.code(), &id, &payload).to_vec()
    }

    fn send(&mut self, command: TcpCommand, id: CorrelationId, message: Message) {
        let bytes = self.encode(command, id, message);
        let _ = self.stream.write_all(&bytes);
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes);
    }
}

/// Accept one client and run `script` on it
fn spawn_server<F>(script: F) -> u16
where
    F: FnOnce(ServerConn) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            script(ServerConn::new(stream));
        }
    });
    port
}

/// Minimal in-memory event store
fn event_store(mut conn: ServerConn) {
    let mut streams: HashMap<String, Vec<RecordedEvent>> = HashMap::new();
    let mut subscribers: Vec<(CorrelationId, String)> = Vec::new();

    while let Some(packet) = conn.next_packet() {
        let id = packet.correlation_id;
        match packet.command() {
            Some(TcpCommand::CreateStream) => {
                let req: CreateStream = decode_typed(&conn.codec, &packet.payload).unwrap();
                let error_code = if streams.contains_key(&req.event_stream_id) {
                    4
                } else {
                    streams.insert(req.event_stream_id.clone(), Vec::new());
                    0
                };
                let reply = CreateStreamCompleted {
                    event_stream_id: req.event_stream_id,
                    error_code,
                    error: None,
                };
                conn.send(TcpCommand::CreateStreamCompleted, id, reply.into());
            }
            Some(TcpCommand::WriteEvents) => {
                let req: WriteEvents = decode_typed(&conn.codec, &packet.payload).unwrap();
                let events = streams.entry(req.event_stream_id.clone()).or_default();
                let first = events.len() as i32;

                let mut appended = Vec::new();
                for new in req.events {
                    let recorded = RecordedEvent {
                        event_stream_id: req.event_stream_id.clone(),
                        event_number: events.len() as i32,
                        event_id: new.event_id,
                        event_type: new.event_type,
                        is_json: new.is_json,
                        data: new.data,
                        metadata: new.metadata,
                    };
                    events.push(recorded.clone());
                    appended.push(recorded);
                }

                let reply = WriteEventsCompleted {
                    event_stream_id: req.event_stream_id.clone(),
                    error_code: 0,
                    error: None,
                    event_number: first,
                };
                conn.send(TcpCommand::WriteEventsCompleted, id, reply.into());

                for (sub_id, _) in subscribers.iter().filter(|(_, s)| *s == req.event_stream_id) {
                    for event in &appended {
                        let push = StreamEventAppeared {
                            event: ResolvedEvent {
                                event: event.clone(),
                                link: None,
                            },
                        };
                        let bytes = conn.encode(TcpCommand::StreamEventAppeared, *sub_id, push.into());
                        conn.send_raw(&bytes);
                    }
                }
            }
            Some(TcpCommand::ReadStreamEventsForward) => {
                let req: ReadStreamEventsForward =
                    decode_typed(&conn.codec, &packet.payload).unwrap();
                let all = streams.get(&req.event_stream_id).cloned().unwrap_or_default();
                let events: Vec<ResolvedEvent> = all
                    .iter()
                    .skip(req.start_index as usize)
                    .take(req.max_count as usize)
                    .cloned()
                    .map(|event| ResolvedEvent { event, link: None })
                    .collect();
                let next = req.start_index + events.len() as i32;
                let reply = ReadStreamEventsForwardCompleted {
                    event_stream_id: req.event_stream_id,
                    events,
                    next_event_number: next,
                    last_event_number: all.len() as i32 - 1,
                    is_end_of_stream: next as usize >= all.len(),
                    last_commit_position: 0,
                };
                conn.send(TcpCommand::ReadStreamEventsForwardCompleted, id, reply.into());
            }
            Some(TcpCommand::SubscribeToStream) => {
                let req: SubscribeToStream = decode_typed(&conn.codec, &packet.payload).unwrap();
                let last = streams
                    .get(&req.event_stream_id)
                    .and_then(|events| events.last())
                    .map(|e| e.event_number);
                subscribers.push((id, req.event_stream_id));
                let reply = SubscriptionConfirmation {
                    last_commit_position: 0,
                    last_event_number: last,
                };
                conn.send(TcpCommand::SubscriptionConfirmation, id, reply.into());
            }
            Some(TcpCommand::UnsubscribeFromStream) => {
                if let Some(pos) = subscribers.iter().position(|(sub_id, _)| *sub_id == id) {
                    let (_, stream) = subscribers.remove(pos);
                    let reply = SubscriptionDropped {
                        event_stream_id: stream,
                        reason: "Unsubscribed".to_string(),
                    };
                    conn.send(TcpCommand::SubscriptionDropped, id, reply.into());
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Client Side Helpers
// =============================================================================

fn config(port: u16) -> Config {
    Config::builder()
        .host("127.0.0.1")
        .port(port)
        .request_timeout_ms(5000)
        .build()
}

fn connect_to_event_store() -> Connection {
    let port = spawn_server(event_store);
    Connection::connect(config(port)).unwrap()
}

fn append(connection: &Connection, stream: &str, count: usize) {
    for i in 0..count {
        connection
            .create_event(stream, "Tested", format!("payload {}", i))
            .unwrap()
            .wait()
            .unwrap();
    }
}

// =============================================================================
// Operation Tests
// =============================================================================

#[test]
fn test_create_stream_is_idempotent() {
    let connection = connect_to_event_store();

    connection.create_stream("orders").unwrap().wait().unwrap();
    connection.create_stream("orders").unwrap().wait().unwrap();
    assert_eq!(connection.pending_requests(), 0);
}

#[test]
fn test_create_event_returns_event_numbers() {
    let connection = connect_to_event_store();
    connection.create_stream("orders").unwrap().wait().unwrap();

    let numbers: Vec<i32> = (0..3)
        .map(|i| {
            connection
                .create_event("orders", "OrderPlaced", format!("{{\"n\":{}}}", i))
                .unwrap()
                .wait()
                .unwrap()
        })
        .collect();
    assert_eq!(numbers, vec![0, 1, 2]);
}

#[test]
fn test_concurrent_requests_resolve_independently() {
    let connection = connect_to_event_store();

    let pending: Vec<_> = (0..10)
        .map(|_| connection.create_event("busy", "Tested", "x").unwrap())
        .collect();
    let mut numbers: Vec<i32> = pending.into_iter().map(|p| p.wait().unwrap()).collect();
    numbers.sort();

    assert_eq!(numbers, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_read_stream_returns_events_in_order() {
    let connection = connect_to_event_store();
    append(&connection, "orders", 4);

    let events = connection.read_stream("orders").unwrap().wait().unwrap();
    let numbers: Vec<i32> = events.iter().map(|e| e.event_number).collect();
    assert_eq!(numbers, vec![0, 1, 2, 3]);
    assert_eq!(events[2].data, b"payload 2".to_vec());
}

#[test]
fn test_read_stream_events_forward_range() {
    let connection = connect_to_event_store();
    append(&connection, "orders", 5);

    let res = connection
        .read_stream_events_forward("orders", 1, 2)
        .unwrap()
        .wait()
        .unwrap();
    let numbers: Vec<i32> = res.events.iter().map(|e| e.event.event_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(res.next_event_number, 3);
    assert!(!res.is_end_of_stream);
}

#[test]
fn test_read_empty_stream() {
    let connection = connect_to_event_store();

    let res = connection
        .read_stream_events_forward("nothing", 0, 100)
        .unwrap()
        .wait()
        .unwrap();
    assert!(res.events.is_empty());
    assert!(connection.read_stream("nothing").unwrap().wait().unwrap().is_empty());
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[test]
fn test_subscribe_receives_new_events() {
    let connection = connect_to_event_store();
    append(&connection, "orders", 2);

    let subscription = connection.subscribe_to_stream("orders").unwrap();
    append(&connection, "orders", 3);

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let event = subscription.recv_timeout(WAIT).unwrap().expect("event");
        numbers.push(event.event_number);
    }
    assert_eq!(numbers, vec![2, 3, 4]);
    assert_eq!(subscription.stream(), "orders");
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let connection = connect_to_event_store();

    let subscription = connection.subscribe_to_stream("orders").unwrap();
    append(&connection, "orders", 1);
    assert!(subscription.recv_timeout(WAIT).unwrap().is_some());

    subscription.unsubscribe().unwrap();
    assert_eq!(connection.pending_requests(), 0);

    // The connection keeps working after the drop notice arrives
    append(&connection, "orders", 1);
    assert_eq!(connection.pending_requests(), 0);
}

#[test]
fn test_dropping_subscription_releases_registration() {
    let connection = connect_to_event_store();

    for _ in 0..3 {
        let subscription = connection.subscribe_to_stream("orders").unwrap();
        drop(subscription);
    }
    assert_eq!(connection.pending_requests(), 0);

    append(&connection, "orders", 2);
    assert_eq!(connection.pending_requests(), 0);
}

#[test]
fn test_dropping_catch_up_subscription_releases_registration() {
    let connection = connect_to_event_store();
    append(&connection, "orders", 2);

    let (tx, rx) = channel::unbounded();
    let catch_up = connection
        .read_and_subscribe_to_stream("orders", move |event| {
            let _ = tx.send(event.map(|e| e.event_number));
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 0);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 1);

    drop(catch_up);
    assert_eq!(connection.pending_requests(), 0);

    append(&connection, "orders", 1);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_read_and_subscribe_times_out_unanswered_history() {
    let (tx, commands) = channel::unbounded();
    let port = spawn_server(move |mut conn| {
        let subscribe = conn.next_packet().unwrap();
        // The historical read is never answered
        let _read = conn.next_packet().unwrap();

        let confirmation = SubscriptionConfirmation {
            last_commit_position: 0,
            last_event_number: None,
        };
        conn.send(TcpCommand::SubscriptionConfirmation, subscribe.correlation_id, confirmation.into());
        let push = StreamEventAppeared {
            event: ResolvedEvent {
                event: RecordedEvent {
                    event_stream_id: "stalled".to_string(),
                    event_number: 0,
                    event_id: Uuid::new_v4(),
                    event_type: "Tested".to_string(),
                    is_json: false,
                    data: Vec::new(),
                    metadata: Vec::new(),
                },
                link: None,
            },
        };
        conn.send(TcpCommand::StreamEventAppeared, subscribe.correlation_id, push.into());

        while let Some(packet) = conn.next_packet() {
            let _ = tx.send(packet.command());
        }
    });
    let config = Config::builder()
        .host("127.0.0.1")
        .port(port)
        .request_timeout_ms(200)
        .build();
    let connection = Connection::connect(config).unwrap();

    let (events_tx, events) = channel::unbounded();
    let catch_up = connection
        .read_and_subscribe_to_stream("stalled", move |event| {
            let _ = events_tx.send(event);
        })
        .unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        Err(EventStoreError::Timeout(after)) => assert_eq!(after, Duration::from_millis(200)),
        other => panic!("Expected Timeout, got {:?}", other),
    }
    // The queued live event is abandoned along with the feed
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

    assert_eq!(
        commands.recv_timeout(WAIT).unwrap(),
        Some(TcpCommand::UnsubscribeFromStream)
    );
    assert!(!catch_up.is_active());
    assert_eq!(connection.pending_requests(), 0);
}

#[test]
fn test_read_and_subscribe_delivers_history_then_live() {
    let connection = connect_to_event_store();
    append(&connection, "orders", 3);

    let (tx, rx) = channel::unbounded();
    let catch_up = connection
        .read_and_subscribe_to_stream("orders", move |event| {
            let _ = tx.send(event.map(|e| e.event_number));
        })
        .unwrap();

    append(&connection, "orders", 2);

    let mut numbers = Vec::new();
    for _ in 0..5 {
        numbers.push(rx.recv_timeout(WAIT).unwrap().unwrap());
    }
    assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(catch_up.is_active());

    catch_up.unsubscribe().unwrap();
}

#[test]
fn test_read_and_subscribe_on_empty_stream() {
    let connection = connect_to_event_store();

    let (tx, rx) = channel::unbounded();
    let _catch_up = connection
        .read_and_subscribe_to_stream("fresh", move |event| {
            let _ = tx.send(event.map(|e| e.event_number));
        })
        .unwrap();

    append(&connection, "fresh", 2);

    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 0);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 1);
}

/// Live pushes that overlap the history reply are dropped
#[test]
fn test_read_and_subscribe_deduplicates_racing_pushes() {
    let port = spawn_server(|mut conn| {
        let subscribe = conn.next_packet().unwrap();
        let read = conn.next_packet().unwrap();
        assert_eq!(subscribe.command(), Some(TcpCommand::SubscribeToStream));
        assert_eq!(read.command(), Some(TcpCommand::ReadStreamEventsForward));

        let event = |n: i32| RecordedEvent {
            event_stream_id: "race".to_string(),
            event_number: n,
            event_id: Uuid::new_v4(),
            event_type: "Tested".to_string(),
            is_json: false,
            data: Vec::new(),
            metadata: Vec::new(),
        };

        // Live 3 and 4 arrive before history 0..=4 completes
        for n in 3..5 {
            let push = StreamEventAppeared {
                event: ResolvedEvent { event: event(n), link: None },
            };
            conn.send(TcpCommand::StreamEventAppeared, subscribe.correlation_id, push.into());
        }
        let history = ReadStreamEventsForwardCompleted {
            event_stream_id: "race".to_string(),
            events: (0..5).map(|n| ResolvedEvent { event: event(n), link: None }).collect(),
            next_event_number: 5,
            last_event_number: 4,
            is_end_of_stream: true,
            last_commit_position: 0,
        };
        conn.send(TcpCommand::ReadStreamEventsForwardCompleted, read.correlation_id, history.into());
        for n in 5..7 {
            let push = StreamEventAppeared {
                event: ResolvedEvent { event: event(n), link: None },
            };
            conn.send(TcpCommand::StreamEventAppeared, subscribe.correlation_id, push.into());
        }

        while conn.next_packet().is_some() {}
    });
    let connection = Connection::connect(config(port)).unwrap();

    let (tx, rx) = channel::unbounded();
    let _catch_up = connection
        .read_and_subscribe_to_stream("race", move |event| {
            let _ = tx.send(event.map(|e| e.event_number));
        })
        .unwrap();

    let mut numbers = Vec::new();
    for _ in 0..7 {
        numbers.push(rx.recv_timeout(WAIT).unwrap().unwrap());
    }
    assert_eq!(numbers, vec![0, 1, 2, 3, 4, 5, 6]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

// =============================================================================
// Heartbeat Tests
// =============================================================================

#[test]
fn test_heartbeat_request_is_answered() {
    let (tx, rx) = channel::bounded(1);
    let heartbeat_id = CorrelationId::generate();

    let port = spawn_server(move |mut conn| {
        let bytes = serialize_packet(
            TcpCommand::HeartbeatRequestCommand.code(),
            &heartbeat_id,
            &[],
        );
        conn.send_raw(&bytes);
        if let Some(packet) = conn.next_packet() {
            let _ = tx.send(packet);
        }
    });
    let _connection = Connection::connect(config(port)).unwrap();

    let reply = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(reply.command(), Some(TcpCommand::HeartbeatResponseCommand));
    assert_eq!(reply.correlation_id, heartbeat_id);
}

// =============================================================================
// Transport Edge Case Tests
// =============================================================================

#[test]
fn test_response_delivered_byte_by_byte() {
    let port = spawn_server(|mut conn| {
        let request = conn.next_packet().unwrap();
        let reply = CreateStreamCompleted {
            event_stream_id: "slow".to_string(),
            error_code: 0,
            error: None,
        };
        let bytes = conn.encode(TcpCommand::CreateStreamCompleted, request.correlation_id, reply.into());
        for byte in bytes {
            conn.send_raw(&[byte]);
            let _ = conn.stream.flush();
        }
        while conn.next_packet().is_some() {}
    });
    let connection = Connection::connect(config(port)).unwrap();

    connection.create_stream("slow").unwrap().wait().unwrap();
}

#[test]
fn test_coalesced_responses_in_one_write() {
    let port = spawn_server(|mut conn| {
        let first = conn.next_packet().unwrap();
        let second = conn.next_packet().unwrap();

        let mut bytes = Vec::new();
        for (packet, number) in [(&second, 8), (&first, 7)] {
            let reply = WriteEventsCompleted {
                event_stream_id: "s".to_string(),
                error_code: 0,
                error: None,
                event_number: number,
            };
            bytes.extend(conn.encode(TcpCommand::WriteEventsCompleted, packet.correlation_id, reply.into()));
        }
        conn.send_raw(&bytes);
        while conn.next_packet().is_some() {}
    });
    let connection = Connection::connect(config(port)).unwrap();

    let first = connection.create_event("s", "Tested", "a").unwrap();
    let second = connection.create_event("s", "Tested", "b").unwrap();

    // Responses arrive out of order; correlation ids route them correctly
    assert_eq!(second.wait().unwrap(), 8);
    assert_eq!(first.wait().unwrap(), 7);
}

#[test]
fn test_request_timeout_cancels_registration() {
    let port = spawn_server(|mut conn| while conn.next_packet().is_some() {});
    let connection = Connection::connect(config(port)).unwrap();

    let pending = connection.create_stream("silent").unwrap();
    assert_eq!(connection.pending_requests(), 1);

    let result = pending.wait_timeout(Duration::from_millis(100));
    assert!(matches!(result, Err(EventStoreError::Timeout(_))));
    assert_eq!(connection.pending_requests(), 0);
}

#[test]
fn test_server_disconnect_fails_pending_requests() {
    let port = spawn_server(|mut conn| {
        conn.next_packet();
        // Dropping the stream closes the socket
    });
    let connection = Connection::connect(config(port)).unwrap();

    let result = connection.create_stream("doomed").unwrap().wait();
    assert!(matches!(result, Err(EventStoreError::ConnectionClosed)));
    assert!(connection.is_closed());
    assert!(matches!(
        connection.create_stream("doomed"),
        Err(EventStoreError::ConnectionClosed)
    ));
}

#[test]
fn test_framing_error_closes_connection() {
    let port = spawn_server(|mut conn| {
        conn.next_packet();
        // Content length smaller than the fixed header
        conn.send_raw(&[3, 0, 0, 0, 0xAA, 0xBB, 0xCC]);
        while conn.next_packet().is_some() {}
    });
    let connection = Connection::connect(config(port)).unwrap();

    let result = connection.create_stream("garbled").unwrap().wait();
    assert!(matches!(result, Err(EventStoreError::ConnectionClosed)));
    assert!(connection.is_closed());
}

#[test]
fn test_unknown_command_does_not_hang_caller() {
    let port = spawn_server(|mut conn| {
        let request = conn.next_packet().unwrap();
        let bytes = serialize_packet(0x7E, &request.correlation_id, b"mystery");
        conn.send_raw(&bytes);
        while conn.next_packet().is_some() {}
    });
    let connection = Connection::connect(config(port)).unwrap();

    let result = connection.create_stream("odd").unwrap().wait();
    assert!(matches!(result, Err(EventStoreError::UnexpectedReply(_))));
    assert!(!connection.is_closed());
}

#[test]
fn test_close_fails_subscriptions() {
    let connection = connect_to_event_store();
    let subscription = connection.subscribe_to_stream("orders").unwrap();

    connection.close();

    assert!(connection.is_closed());
    match subscription.recv() {
        Some(Err(EventStoreError::ConnectionClosed)) => {}
        other => panic!("Expected ConnectionClosed, got {:?}", other.map(|r| r.is_ok())),
    }
    assert!(subscription.recv().is_none());
}

#[test]
fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = Connection::connect(config(port));
    assert!(matches!(result, Err(EventStoreError::Io(_))));
}
