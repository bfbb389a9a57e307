//! End-to-end exercises of the client runtime over a socketpair, with
//! the test body playing the server side byte-for-byte.

use std::{
    io::{Read, Write},
    os::{fd::OwnedFd, unix::net::UnixStream},
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use foraker_client::{
    Connection, FatalError, FlushStatus, ListenerResult, MarshalError, PrepareReadError, Proxy,
    core::{
        ArgKind, Argument, Interface, MessageDesc,
        arg::{body_size, encode_args},
        wire::{
            MessageEncoder,
            serde::{CompileTimeMessageSize, MessageHeader},
        },
    },
    protocol,
};

const MANAGER_REQ_CREATE_THING: u16 = 0;
const THING_REQ_WRITE: u16 = 1;
const THING_EVT_LEVEL: u16 = 0;

static THING_MANAGER: Interface = Interface {
    name: "thing_manager",
    version: 1,
    requests: &[MessageDesc {
        name: "create_thing",
        since: 1,
        signature: &[ArgKind::NewId, ArgKind::Str],
        child_interface: Some(&THING),
    }],
    events: &[],
};

static THING: Interface = Interface {
    name: "thing",
    version: 1,
    requests: &[
        MessageDesc {
            name: "set_label",
            since: 1,
            signature: &[ArgKind::Str],
            child_interface: None,
        },
        MessageDesc {
            name: "write",
            since: 1,
            signature: &[ArgKind::Array],
            child_interface: None,
        },
    ],
    events: &[MessageDesc {
        name: "level",
        since: 1,
        signature: &[ArgKind::Int],
        child_interface: None,
    }],
};

/// Encodes one server-to-client message.
fn event_bytes(object_id: u32, opcode: u16, signature: &[ArgKind], args: Vec<Argument>) -> Vec<u8> {
    let size = MessageHeader::SIZE + body_size(&args);
    let mut buf = vec![0u8; size];
    let mut encoder = MessageEncoder::new(&mut buf);
    encoder
        .write(&MessageHeader {
            object_id,
            opcode,
            size: size as u16,
        })
        .unwrap();
    let mut fds = Vec::new();
    encode_args(args, signature, &mut encoder, &mut fds).unwrap();
    assert!(fds.is_empty());
    buf
}

fn level_event(object_id: u32, level: i32) -> Vec<u8> {
    event_bytes(
        object_id,
        THING_EVT_LEVEL,
        &[ArgKind::Int],
        vec![Argument::Int(level)],
    )
}

fn connect_pair() -> (Connection, UnixStream) {
    let (client, server) = UnixStream::pair().unwrap();
    let conn = Connection::connect_to_fd(OwnedFd::from(client)).unwrap();
    (conn, server)
}

/// Binds the test manager global, tracking the bytes marshaled so the
/// server side knows how much setup to consume. Object ids: display 1,
/// registry 2, manager 3.
fn bind_manager(conn: &Connection) -> (Proxy, usize) {
    let mut sent = 0;

    let args = vec![Argument::NewId(0)];
    sent += MessageHeader::SIZE + body_size(&args);
    let registry = conn
        .display()
        .marshal(protocol::DISPLAY_REQ_GET_REGISTRY, args)
        .unwrap()
        .unwrap();
    assert_eq!(registry.id(), 2);

    let args = vec![
        Argument::Uint(1),
        Argument::Str(Some("thing_manager".into())),
        Argument::Uint(1),
        Argument::NewId(0),
    ];
    sent += MessageHeader::SIZE + body_size(&args);
    let manager = registry
        .marshal_constructor(protocol::REGISTRY_REQ_BIND, args, &THING_MANAGER)
        .unwrap();
    assert_eq!(manager.id(), 3);
    assert_eq!(manager.class(), "thing_manager");

    (manager, sent)
}

/// Creates one thing object; returns the proxy and the bytes marshaled.
fn create_thing(manager: &Proxy, label: &str) -> (Proxy, usize) {
    let args = vec![Argument::NewId(0), Argument::Str(Some(label.into()))];
    let sent = MessageHeader::SIZE + body_size(&args);
    let thing = manager
        .marshal(MANAGER_REQ_CREATE_THING, args)
        .unwrap()
        .unwrap();
    (thing, sent)
}

/// Records every `level` event it sees, in order.
fn recording_listener(into: Arc<Mutex<Vec<i32>>>) -> impl Fn(&Proxy, u16, &[Argument]) -> ListenerResult {
    move |_: &Proxy, opcode: u16, args: &[Argument]| -> ListenerResult {
        assert_eq!(opcode, THING_EVT_LEVEL);
        let Argument::Int(level) = args[0] else {
            panic!("level event carries an int");
        };
        into.lock().unwrap().push(level);
        Ok(())
    }
}

#[test]
fn constructors_allocate_monotonic_ids_and_events_reach_listeners() {
    let (conn, mut server) = connect_pair();
    let (manager, _) = bind_manager(&conn);
    let (thing, _) = create_thing(&manager, "top_level");
    assert_eq!(thing.id(), 4);

    let seen = Arc::new(Mutex::new(Vec::new()));
    thing.add_listener(recording_listener(Arc::clone(&seen))).unwrap();

    server.write_all(&level_event(4, 42)).unwrap();
    let dispatched = conn.dispatch().unwrap();

    assert_eq!(dispatched, 1);
    assert_eq!(*seen.lock().unwrap(), vec![42]);
    assert!(conn.error().is_none());
}

#[test]
fn events_route_to_each_proxys_assigned_queue() {
    let (conn, mut server) = connect_pair();
    let (manager, _) = bind_manager(&conn);
    let (x, _) = create_thing(&manager, "x");
    let (y, _) = create_thing(&manager, "y");

    let queue_a = conn.new_queue();
    let queue_b = conn.new_queue();
    x.set_queue(&queue_a);
    y.set_queue(&queue_b);

    let seen_x = Arc::new(Mutex::new(Vec::new()));
    let seen_y = Arc::new(Mutex::new(Vec::new()));
    x.add_listener(recording_listener(Arc::clone(&seen_x))).unwrap();
    y.add_listener(recording_listener(Arc::clone(&seen_y))).unwrap();

    let mut bytes = level_event(x.id(), 1);
    bytes.extend(level_event(y.id(), 2));
    bytes.extend(level_event(x.id(), 3));
    server.write_all(&bytes).unwrap();

    // Dispatching A must not deliver (or lose) B's event.
    assert_eq!(conn.dispatch_queue(&queue_a).unwrap(), 2);
    assert_eq!(*seen_x.lock().unwrap(), vec![1, 3]);
    assert!(seen_y.lock().unwrap().is_empty());
    assert_eq!(queue_b.pending(), 1);

    assert_eq!(conn.dispatch_queue_pending(&queue_b).unwrap(), 1);
    assert_eq!(*seen_y.lock().unwrap(), vec![2]);
}

#[test]
fn partial_flush_keeps_the_remainder_buffered() {
    let (conn, mut server) = connect_pair();
    let (manager, setup) = bind_manager(&conn);
    let (thing, created) = create_thing(&manager, "bulk");

    assert_eq!(conn.flush().unwrap(), FlushStatus::Complete);
    let mut drain = vec![0u8; setup + created];
    server.read_exact(&mut drain).unwrap();

    // Far more than a socket buffer holds.
    const COUNT: usize = 200;
    const PAYLOAD: usize = 3992;
    let mut expected = 0;
    for _ in 0..COUNT {
        let args = vec![Argument::Array(vec![0xab; PAYLOAD])];
        expected += MessageHeader::SIZE + body_size(&args);
        thing.marshal(THING_REQ_WRITE, args).unwrap();
    }

    assert_eq!(conn.flush().unwrap(), FlushStatus::Partial);

    let reader = thread::spawn(move || {
        let mut received = 0;
        let mut buf = vec![0u8; 64 * 1024];
        while received < expected {
            received += server.read(&mut buf).unwrap();
        }
        received
    });

    loop {
        match conn.flush().unwrap() {
            FlushStatus::Complete => break,
            FlushStatus::Partial => thread::sleep(Duration::from_millis(1)),
        }
    }
    assert_eq!(reader.join().unwrap(), expected);
}

#[test]
fn events_for_destroyed_objects_are_dropped_and_ids_never_reused() {
    let (conn, mut server) = connect_pair();
    let (manager, _) = bind_manager(&conn);
    let (doomed, _) = create_thing(&manager, "doomed");
    let (survivor, _) = create_thing(&manager, "survivor");

    let seen_doomed = Arc::new(Mutex::new(Vec::new()));
    let seen_survivor = Arc::new(Mutex::new(Vec::new()));
    doomed.add_listener(recording_listener(Arc::clone(&seen_doomed))).unwrap();
    survivor
        .add_listener(recording_listener(Arc::clone(&seen_survivor)))
        .unwrap();

    doomed.destroy();
    assert!(!doomed.is_alive());

    // An event already in flight for the destroyed id, the server's
    // deletion acknowledgement, then traffic for a live object.
    let mut bytes = level_event(doomed.id(), 13);
    bytes.extend(event_bytes(
        1,
        protocol::DISPLAY_EVT_DELETE_ID,
        &[ArgKind::Uint],
        vec![Argument::Uint(doomed.id())],
    ));
    bytes.extend(level_event(survivor.id(), 7));
    server.write_all(&bytes).unwrap();

    assert_eq!(conn.dispatch().unwrap(), 1);
    assert!(seen_doomed.lock().unwrap().is_empty());
    assert_eq!(*seen_survivor.lock().unwrap(), vec![7]);
    assert!(conn.error().is_none());

    // The retired id is not handed out again.
    let (next, _) = create_thing(&manager, "next");
    assert_eq!(next.id(), 6);
}

#[test]
fn only_one_thread_wins_the_read_intent() {
    let (conn, _server) = connect_pair();
    let queue = conn.default_queue();

    const THREADS: usize = 4;
    let barrier = Barrier::new(THREADS);
    let wins = AtomicUsize::new(0);
    let busy = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                let outcome = conn.prepare_read(&queue);
                // Everyone attempts before the winner lets go.
                barrier.wait();
                match outcome {
                    Ok(()) => {
                        wins.fetch_add(1, Ordering::Relaxed);
                        conn.cancel_read();
                    }
                    Err(PrepareReadError::ReaderBusy) => {
                        busy.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(other) => panic!("unexpected prepare_read outcome: {other}"),
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 1);
    assert_eq!(busy.load(Ordering::Relaxed), THREADS - 1);

    // The slot was released; taking it again succeeds.
    conn.prepare_read(&queue).unwrap();
    conn.cancel_read();
}

#[test]
fn roundtrip_waits_for_the_acknowledgement() {
    let (conn, mut server) = connect_pair();
    let (manager, mut setup) = bind_manager(&conn);
    let (thing, created) = create_thing(&manager, "observed");
    setup += created;

    let seen = Arc::new(Mutex::new(Vec::new()));
    thing.add_listener(recording_listener(Arc::clone(&seen))).unwrap();

    let thing_id = thing.id();
    let server_thread = thread::spawn(move || {
        let mut buf = vec![0u8; setup];
        server.read_exact(&mut buf).unwrap();

        // The sync request: header plus the callback's new id.
        let mut sync = [0u8; 12];
        server.read_exact(&mut sync).unwrap();
        let callback_id = u32::from_ne_bytes(sync[8..12].try_into().unwrap());

        // Unrelated traffic lands before the acknowledgement.
        server.write_all(&level_event(thing_id, 99)).unwrap();
        server
            .write_all(&event_bytes(
                callback_id,
                protocol::CALLBACK_EVT_DONE,
                &[ArgKind::Uint],
                vec![Argument::Uint(1)],
            ))
            .unwrap();
    });

    let dispatched = conn.roundtrip().unwrap();
    server_thread.join().unwrap();

    // The stray event and the acknowledgement itself.
    assert_eq!(dispatched, 2);
    assert_eq!(*seen.lock().unwrap(), vec![99]);
}

#[test]
fn server_error_event_latches_the_connection() {
    let (conn, mut server) = connect_pair();

    server
        .write_all(&event_bytes(
            1,
            protocol::DISPLAY_EVT_ERROR,
            &[ArgKind::Object, ArgKind::Uint, ArgKind::Str],
            vec![
                Argument::Object(1),
                Argument::Uint(protocol::display_error::NO_MEMORY),
                Argument::Str(Some("out of memory".into())),
            ],
        ))
        .unwrap();

    let error = conn.dispatch().unwrap_err();
    assert!(matches!(error, FatalError::Protocol(_)));

    let details = conn.protocol_error().unwrap();
    assert_eq!(details.code, protocol::display_error::NO_MEMORY);
    assert_eq!(details.object_id, 1);
    assert_eq!(details.interface, "wl_display");

    // Every subsequent operation reports the original failure.
    assert!(matches!(
        conn.display()
            .marshal(protocol::DISPLAY_REQ_GET_REGISTRY, vec![Argument::NewId(0)]),
        Err(MarshalError::Defunct)
    ));
    assert!(conn.flush().is_err());
    assert!(matches!(
        conn.prepare_read(&conn.default_queue()),
        Err(PrepareReadError::Defunct(_))
    ));
}

#[test]
fn event_for_unknown_object_is_a_protocol_error() {
    let (conn, mut server) = connect_pair();

    server.write_all(&level_event(50, 1)).unwrap();

    let error = conn.dispatch().unwrap_err();
    assert!(matches!(error, FatalError::Protocol(_)));
    let details = conn.protocol_error().unwrap();
    assert_eq!(details.code, protocol::display_error::INVALID_OBJECT);
    assert_eq!(details.object_id, 50);
}

#[test]
fn listener_failure_latches_but_finishes_the_pass() {
    let (conn, mut server) = connect_pair();
    let (manager, _) = bind_manager(&conn);
    let (failing, _) = create_thing(&manager, "failing");
    let (healthy, _) = create_thing(&manager, "healthy");

    failing
        .add_listener(|_: &Proxy, _: u16, _: &[Argument]| -> ListenerResult {
            Err("handler gave up".into())
        })
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    healthy.add_listener(recording_listener(Arc::clone(&seen))).unwrap();

    let mut bytes = level_event(failing.id(), 1);
    bytes.extend(level_event(healthy.id(), 2));
    server.write_all(&bytes).unwrap();

    // The pass drains both events even though the first listener fails.
    assert_eq!(conn.dispatch().unwrap(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![2]);

    assert!(matches!(conn.error(), Some(FatalError::Listener(_))));
    assert!(matches!(conn.dispatch(), Err(FatalError::Listener(_))));
}

#[test]
fn events_sent_before_peer_close_are_still_delivered() {
    let (conn, mut server) = connect_pair();
    let (manager, setup) = bind_manager(&conn);
    let (thing, created) = create_thing(&manager, "parting");
    assert_eq!(conn.flush().unwrap(), FlushStatus::Complete);
    server.read_exact(&mut vec![0u8; setup + created]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    thing.add_listener(recording_listener(Arc::clone(&seen))).unwrap();

    // The server's last words arrive together with the hangup.
    server.write_all(&level_event(thing.id(), 8)).unwrap();
    drop(server);

    assert_eq!(conn.dispatch().unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![8]);
    assert!(conn.error().is_none());

    // With nothing left to deliver, the hangup surfaces.
    conn.prepare_read(&conn.default_queue()).unwrap();
    let error = conn.read_events().unwrap_err();
    assert!(matches!(
        error,
        foraker_client::ReadEventsError::Fatal(FatalError::Transport(_))
    ));
}

#[test]
fn listener_binding_is_fixed_once_events_are_queued() {
    let (conn, mut server) = connect_pair();
    let (manager, _) = bind_manager(&conn);
    let (thing, _) = create_thing(&manager, "anchored");

    let seen = Arc::new(Mutex::new(Vec::new()));
    // Replacing before any event is queued is fine.
    thing.add_listener(recording_listener(Arc::clone(&seen))).unwrap();
    thing.add_listener(recording_listener(Arc::clone(&seen))).unwrap();

    server.write_all(&level_event(thing.id(), 5)).unwrap();
    conn.prepare_read(&conn.default_queue()).unwrap();
    conn.read_events().unwrap();
    assert_eq!(conn.default_queue().pending(), 1);

    assert!(thing.add_listener(recording_listener(Arc::clone(&seen))).is_err());

    assert_eq!(conn.dispatch_pending().unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![5]);
}
