//! The connection to the compositor.
//!
//! Owns the socket, the outgoing buffer, the object store and the
//! default event queue, and implements the cooperative multi-thread
//! read protocol: at most one thread holds the read intent at a time,
//! a thread that cannot take it is told to retry (never suspended), and
//! decoded events are routed to each target proxy's assigned queue so
//! that dispatch, which calls back into application code, happens
//! outside the exclusive reader slot.

use std::{
    collections::VecDeque,
    env, fmt, io,
    os::fd::{BorrowedFd, FromRawFd, OwnedFd},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};

use foraker_core::{
    ArgKind, Argument, Interface, ObjectId, arg,
    wire::{
        MAX_MESSAGE_SIZE, MessageDecoder, MessageEncoder,
        serde::{CompileTimeMessageSize, Decode, MessageHeader},
    },
};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    EventQueue,
    protocol::{self, display_error},
    proxy::{ListenerResult, MarshalError, Proxy, ProxyInner},
    queue::{QueueInner, QueuedEvent},
    socket::Socket,
    store::{Lookup, ObjectStore},
};

/// The object id of the display singleton.
const DISPLAY_ID: ObjectId = 1;

/// A connection to the compositor.
///
/// The `Connection` is the unique owner of the link: dropping it is the
/// disconnect. Outgoing bytes are flushed best-effort, the descriptor
/// is closed, and every proxy and queue created from it becomes
/// defunct (their operations fail; they are not dangling).
pub struct Connection {
    inner: Arc<ConnectionInner>,
    display: Proxy,
}

impl Connection {
    /// Connects to the compositor named by the environment.
    ///
    /// `WAYLAND_SOCKET` (an inherited, already connected descriptor)
    /// takes precedence; otherwise `WAYLAND_DISPLAY` (default
    /// `wayland-0`) is resolved against `XDG_RUNTIME_DIR` unless it is
    /// an absolute path.
    ///
    /// # Errors
    ///
    /// Fails if the environment names no usable socket or the connect
    /// itself fails.
    pub fn connect() -> Result<Self, ConnectError> {
        if let Some(var) = env::var_os("WAYLAND_SOCKET") {
            let fd: i32 = var
                .to_string_lossy()
                .parse()
                .map_err(|_| ConnectError::BadSocketVar)?;
            log::debug!("taking over inherited socket fd {fd}");
            return Self::connect_to_fd(unsafe { OwnedFd::from_raw_fd(fd) });
        }

        let display = env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-0".into());
        let mut path = PathBuf::from(display);
        if !path.is_absolute() {
            let runtime_dir =
                env::var_os("XDG_RUNTIME_DIR").ok_or(ConnectError::NoXdgRuntimeDir)?;
            path = PathBuf::from(runtime_dir).join(path);
        }

        log::debug!("connecting to {}", path.display());
        let stream = std::os::unix::net::UnixStream::connect(&path)?;
        Self::connect_to_fd(stream.into())
    }

    /// Builds a connection over an already connected descriptor.
    ///
    /// The returned connection has an empty default queue and the root
    /// proxy (id 1) bound to the display singleton.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature matches
    /// [`connect`](Self::connect) for callers that treat both paths
    /// uniformly.
    pub fn connect_to_fd(fd: OwnedFd) -> Result<Self, ConnectError> {
        let default_queue = Arc::new(QueueInner::new());
        let inner = Arc::new(ConnectionInner {
            socket: Socket::new(fd),
            out: Mutex::new(OutBuffer {
                bytes: Vec::new(),
                fds: Vec::new(),
            }),
            reader: Mutex::new(None),
            recv: Mutex::new(RecvBuffer { buf: Vec::new() }),
            in_fds: Mutex::new(VecDeque::new()),
            store: Mutex::new(ObjectStore::new()),
            default_queue: Arc::clone(&default_queue),
            fatal: Mutex::new(None),
        });

        let display = {
            let mut store = inner.store.lock();
            let id = store.alloc_id().unwrap();
            debug_assert_eq!(id, DISPLAY_ID);
            let display = ProxyInner::new(
                id,
                &protocol::WL_DISPLAY,
                Arc::downgrade(&inner),
                Arc::downgrade(&default_queue),
            );
            store.insert(Arc::clone(&display));
            Proxy::from_inner(display)
        };

        Ok(Self { inner, display })
    }

    /// The root proxy: the display singleton at object id 1.
    #[must_use]
    pub fn display(&self) -> &Proxy {
        &self.display
    }

    /// Creates a new, initially empty event queue.
    #[must_use]
    pub fn new_queue(&self) -> EventQueue {
        EventQueue::new(Arc::new(QueueInner::new()))
    }

    /// The connection's default event queue.
    #[must_use]
    pub fn default_queue(&self) -> EventQueue {
        EventQueue::new(Arc::clone(&self.inner.default_queue))
    }

    /// The raw descriptor, for the caller's own readiness polling. The
    /// read-protocol primitives themselves never poll.
    #[must_use]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.inner.socket.as_fd()
    }

    /// The latched fatal condition, if the connection has entered its
    /// permanent error state.
    #[must_use]
    pub fn error(&self) -> Option<FatalError> {
        self.inner.fatal.lock().clone()
    }

    /// Details of the latched condition when it is a protocol error.
    #[must_use]
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        match &*self.inner.fatal.lock() {
            Some(FatalError::Protocol(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Writes the pending outgoing buffer to the socket.
    ///
    /// A would-block from the transport leaves the unwritten remainder
    /// buffered and returns [`FlushStatus::Partial`], a transient
    /// signal rather than an error; retry once the descriptor is
    /// writable.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor is broken or the connection is already
    /// defunct.
    pub fn flush(&self) -> Result<FlushStatus, FatalError> {
        self.inner.flush()
    }

    /// Takes the read intent on behalf of `queue`.
    ///
    /// Never blocks: if another thread already holds the intent the
    /// caller gets [`PrepareReadError::ReaderBusy`] and should dispatch
    /// its own pending events and retry; if `queue` already holds
    /// events the caller must dispatch those first.
    ///
    /// # Errors
    ///
    /// [`PrepareReadError::ReaderBusy`], [`PrepareReadError::PendingEvents`]
    /// (both transient), or [`PrepareReadError::Defunct`].
    pub fn prepare_read(&self, queue: &EventQueue) -> Result<(), PrepareReadError> {
        self.inner.prepare_read(&queue.inner)
    }

    /// Reads available bytes, decodes every complete message present,
    /// and routes each event to the queue assigned to its target proxy.
    /// Releases the read intent on every path. Does not block: if no
    /// data is available the call returns with nothing routed.
    ///
    /// # Errors
    ///
    /// [`ReadEventsError::NotReader`] if the calling thread did not
    /// prepare a read, or the fatal condition that terminated the
    /// connection.
    pub fn read_events(&self) -> Result<(), ReadEventsError> {
        self.inner.read_events()
    }

    /// Gives up the read intent without touching the socket. Only
    /// meaningful between [`prepare_read`](Self::prepare_read) and
    /// [`read_events`](Self::read_events) on the same thread.
    pub fn cancel_read(&self) {
        self.inner.cancel_read();
    }

    /// Dispatches events already decoded and sitting in `queue`,
    /// without touching the socket. Callable from any thread at any
    /// time, regardless of the read protocol's state.
    ///
    /// Returns the number of events dispatched.
    ///
    /// # Errors
    ///
    /// Fails once the connection is defunct.
    pub fn dispatch_queue_pending(&self, queue: &EventQueue) -> Result<usize, FatalError> {
        self.inner.dispatch_pending(&queue.inner)
    }

    /// [`dispatch_queue_pending`](Self::dispatch_queue_pending) on the
    /// default queue.
    ///
    /// # Errors
    ///
    /// Fails once the connection is defunct.
    pub fn dispatch_pending(&self) -> Result<usize, FatalError> {
        self.inner.dispatch_pending(&self.inner.default_queue)
    }

    /// Dispatches `queue`, reading from the socket if it holds no
    /// pending events: pending-first, then a full
    /// prepare → flush → wait → read cycle until at least one event for
    /// `queue` has been dispatched.
    ///
    /// This composite (unlike the primitives it is built from) blocks
    /// in poll while the socket has nothing to read.
    ///
    /// # Errors
    ///
    /// Fails once the connection is defunct.
    pub fn dispatch_queue(&self, queue: &EventQueue) -> Result<usize, FatalError> {
        self.inner.dispatch_queue(&queue.inner)
    }

    /// [`dispatch_queue`](Self::dispatch_queue) on the default queue.
    ///
    /// # Errors
    ///
    /// Fails once the connection is defunct.
    pub fn dispatch(&self) -> Result<usize, FatalError> {
        self.inner.dispatch_queue(&self.inner.default_queue)
    }

    /// Blocks until the server has processed all currently issued
    /// requests: marshals a `sync`, flushes, and dispatches `queue`
    /// until the matching acknowledgement arrives. Unrelated events
    /// arriving in the meantime are dispatched normally.
    ///
    /// Returns the total number of events dispatched while waiting.
    ///
    /// # Errors
    ///
    /// Fails once the connection is defunct, or if the sync request
    /// itself cannot be marshaled.
    pub fn roundtrip_queue(&self, queue: &EventQueue) -> Result<usize, RoundtripError> {
        let done = Arc::new(AtomicBool::new(false));

        let callback = self.display.marshal_constructor(
            protocol::DISPLAY_REQ_SYNC,
            vec![Argument::NewId(0)],
            &protocol::WL_CALLBACK,
        )?;
        callback.set_queue(queue);
        let flag = Arc::clone(&done);
        callback
            .add_listener(move |_: &Proxy, _: u16, _: &[Argument]| -> ListenerResult {
                flag.store(true, Ordering::Release);
                Ok(())
            })
            .expect("fresh callback proxy cannot have a listener");

        let mut total = 0;
        while !done.load(Ordering::Acquire) {
            total += self.inner.dispatch_queue(&queue.inner)?;
        }
        callback.destroy();
        Ok(total)
    }

    /// [`roundtrip_queue`](Self::roundtrip_queue) on the default queue.
    ///
    /// # Errors
    ///
    /// As [`roundtrip_queue`](Self::roundtrip_queue).
    pub fn roundtrip(&self) -> Result<usize, RoundtripError> {
        self.roundtrip_queue(&self.default_queue())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        _ = self.inner.flush();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

struct OutBuffer {
    bytes: Vec<u8>,
    fds: Vec<OwnedFd>,
}

struct RecvBuffer {
    buf: Vec<u8>,
}

pub(crate) struct ConnectionInner {
    socket: Socket,
    out: Mutex<OutBuffer>,
    /// The single reader slot of the read protocol.
    reader: Mutex<Option<ThreadId>>,
    /// Bytes received but not yet forming a complete message. Only the
    /// reader touches this, under its own lock.
    recv: Mutex<RecvBuffer>,
    /// Received descriptors not yet claimed by a decoded message, in
    /// arrival order.
    in_fds: Mutex<VecDeque<OwnedFd>>,
    pub(crate) store: Mutex<ObjectStore>,
    default_queue: Arc<QueueInner>,
    fatal: Mutex<Option<FatalError>>,
}

impl ConnectionInner {
    fn fatal(&self) -> Option<FatalError> {
        self.fatal.lock().clone()
    }

    /// Latches the connection into its fatal state. The first error
    /// wins; later ones are reported as the original.
    fn latch(&self, error: FatalError) -> FatalError {
        let mut slot = self.fatal.lock();
        match &*slot {
            Some(first) => first.clone(),
            None => {
                log::error!("connection entered fatal state: {error}");
                *slot = Some(error.clone());
                error
            }
        }
    }

    pub(crate) fn flush(&self) -> Result<FlushStatus, FatalError> {
        if let Some(error) = self.fatal() {
            return Err(error);
        }

        let mut out = self.out.lock();
        while !out.bytes.is_empty() {
            match self.socket.send(&out.bytes, &out.fds) {
                Ok(written) => {
                    out.bytes.drain(..written);
                    // Ancillary data is delivered with the first bytes
                    // the kernel accepts.
                    out.fds.clear();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::Partial);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.latch(FatalError::Transport(e.kind()))),
            }
        }
        Ok(FlushStatus::Complete)
    }

    /// Encodes a request from `source` and appends it to the outgoing
    /// buffer. If the request constructs an object, the child id is
    /// allocated and its proxy registered before any bytes exist,
    /// since the server may reference the id as soon as it processes
    /// the request. The whole sequence runs under the store lock so id
    /// allocation, registration and buffer append are atomic with
    /// respect to concurrent marshals.
    pub(crate) fn marshal(
        &self,
        source: &ProxyInner,
        opcode: u16,
        mut args: Vec<Argument>,
        explicit_interface: Option<&'static Interface>,
    ) -> Result<Option<Proxy>, MarshalError> {
        if self.fatal().is_some() {
            return Err(MarshalError::Defunct);
        }
        if !source.alive.load(Ordering::Acquire) {
            return Err(MarshalError::Destroyed(source.id));
        }
        let desc = source
            .interface
            .request(opcode)
            .ok_or(MarshalError::UnknownOpcode {
                interface: source.interface.name,
                opcode,
            })?;

        let mut store = self.store.lock();

        let child = if desc.constructs() {
            let interface = explicit_interface
                .or(desc.child_interface)
                .ok_or(MarshalError::MissingInterface)?;
            let id = store.alloc_id()?;
            for arg in &mut args {
                if let Argument::NewId(placeholder) = arg {
                    *placeholder = id;
                }
            }
            let inner = ProxyInner::new(
                id,
                interface,
                source.conn.clone(),
                source.queue.lock().clone(),
            );
            store.insert(Arc::clone(&inner));
            Some(Proxy::from_inner(inner))
        } else {
            None
        };

        let size = MessageHeader::SIZE + arg::body_size(&args);
        let result = self.encode_and_append(source.id, opcode, desc.signature, args, size);
        if let Err(error) = result {
            if let Some(child) = &child {
                store.forget(child.id());
            }
            return Err(error);
        }

        log::trace!(
            "-> {}@{}.{}",
            source.interface.name,
            source.id,
            desc.name
        );
        Ok(child)
    }

    fn encode_and_append(
        &self,
        object_id: ObjectId,
        opcode: u16,
        signature: &'static [ArgKind],
        args: Vec<Argument>,
        size: usize,
    ) -> Result<(), MarshalError> {
        if size > MAX_MESSAGE_SIZE {
            return Err(MarshalError::TooLarge);
        }

        let mut scratch = [0u8; MAX_MESSAGE_SIZE];
        let mut encoder = MessageEncoder::new(&mut scratch);
        let header = MessageHeader {
            object_id,
            opcode,
            size: size as u16,
        };
        encoder
            .write(&header)
            .map_err(|e| MarshalError::Args(e.into()))?;

        let mut out_fds = Vec::new();
        arg::encode_args(args, signature, &mut encoder, &mut out_fds)?;
        let written = encoder.position() as usize;
        debug_assert_eq!(written, size);

        let mut out = self.out.lock();
        out.bytes.extend_from_slice(&scratch[..written]);
        out.fds.append(&mut out_fds);
        Ok(())
    }

    fn prepare_read(&self, queue: &Arc<QueueInner>) -> Result<(), PrepareReadError> {
        if let Some(error) = self.fatal() {
            return Err(PrepareReadError::Defunct(error));
        }
        if !queue.events.lock().is_empty() {
            return Err(PrepareReadError::PendingEvents);
        }

        let mut reader = self.reader.lock();
        match *reader {
            Some(owner) if owner != thread::current().id() => Err(PrepareReadError::ReaderBusy),
            _ => {
                *reader = Some(thread::current().id());
                Ok(())
            }
        }
    }

    fn cancel_read(&self) {
        let mut reader = self.reader.lock();
        if *reader == Some(thread::current().id()) {
            *reader = None;
        }
    }

    fn read_events(&self) -> Result<(), ReadEventsError> {
        if *self.reader.lock() != Some(thread::current().id()) {
            return Err(ReadEventsError::NotReader);
        }

        let result = self.read_and_route();
        *self.reader.lock() = None;

        result.map_err(|error| ReadEventsError::Fatal(self.latch(error)))
    }

    fn read_and_route(&self) -> Result<(), FatalError> {
        let mut recv = self.recv.lock();

        // Drain whatever the socket holds right now, without blocking.
        // A close concurrent with the peer's final events must not
        // discard what is already buffered, so EOF only breaks the
        // drain here and is reported below.
        let mut scratch = [0u8; MAX_MESSAGE_SIZE];
        let mut peer_closed = false;
        loop {
            let read = {
                let mut fds = self.in_fds.lock();
                self.socket.recv(&mut scratch, &mut fds)
            };
            match read {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => recv.buf.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(FatalError::Transport(e.kind())),
            }
        }

        // Decode and route every complete message.
        let mut routed = 0;
        while recv.buf.len() >= MessageHeader::SIZE {
            let Ok(header) = MessageHeader::decode(&recv.buf) else {
                return Err(FatalError::Transport(io::ErrorKind::InvalidData));
            };
            let size = header.size as usize;
            if size < MessageHeader::SIZE || size > MAX_MESSAGE_SIZE {
                log::error!(
                    "peer lost framing: message size {size} for object {}",
                    header.object_id
                );
                return Err(FatalError::Protocol(ProtocolError {
                    code: display_error::IMPLEMENTATION,
                    object_id: header.object_id,
                    interface: String::new(),
                }));
            }
            if recv.buf.len() < size {
                break;
            }
            self.route(header, &recv.buf[MessageHeader::SIZE..size])?;
            recv.buf.drain(..size);
            routed += 1;
        }

        // Everything routable was delivered; surface the hangup once
        // nothing more came with it (the next read finds it again).
        if peer_closed && routed == 0 {
            return Err(FatalError::Transport(io::ErrorKind::UnexpectedEof));
        }
        Ok(())
    }

    /// Routes one decoded message to the queue its target is assigned
    /// to. Events for destroyed objects are dropped (their fds still
    /// consumed); events for ids that were never live are a protocol
    /// violation.
    fn route(&self, header: MessageHeader, body: &[u8]) -> Result<(), FatalError> {
        let mut store = self.store.lock();

        let target = match store.lookup(header.object_id) {
            Lookup::Live(target) => target,
            Lookup::Zombie(interface) => {
                let Some(desc) = interface.event(header.opcode) else {
                    return Err(self.invalid_method(header, interface.name));
                };
                let mut fds = self.in_fds.lock();
                for _ in 0..desc.fd_count() {
                    fds.pop_front();
                }
                log::debug!(
                    "discarding {}.{} for destroyed object {}",
                    interface.name,
                    desc.name,
                    header.object_id
                );
                return Ok(());
            }
            Lookup::Unknown => {
                log::error!("event for unknown object {}", header.object_id);
                return Err(FatalError::Protocol(ProtocolError {
                    code: display_error::INVALID_OBJECT,
                    object_id: header.object_id,
                    interface: String::new(),
                }));
            }
        };

        let Some(desc) = target.interface.event(header.opcode) else {
            return Err(self.invalid_method(header, target.interface.name));
        };

        let mut decoder = MessageDecoder::new(body);
        let args = {
            let mut fds = self.in_fds.lock();
            arg::decode_args(desc.signature, &mut decoder, &mut fds)
        }
        .map_err(|error| {
            log::error!(
                "malformed {}.{} for object {}: {error}",
                target.interface.name,
                desc.name,
                header.object_id
            );
            FatalError::Protocol(ProtocolError {
                code: display_error::IMPLEMENTATION,
                object_id: header.object_id,
                interface: target.interface.name.to_owned(),
            })
        })?;

        log::trace!(
            "<- {}@{}.{}",
            target.interface.name,
            header.object_id,
            desc.name
        );

        if target.id == DISPLAY_ID {
            return self.handle_display_event(&mut store, header.opcode, &args);
        }

        // Events can construct server-side objects; register them on
        // the target's queue before anything can reference them.
        for (kind, arg) in desc.signature.iter().zip(&args) {
            if *kind == ArgKind::NewId {
                let Some(child_interface) = desc.child_interface else {
                    return Err(self.invalid_method(header, target.interface.name));
                };
                let &Argument::NewId(new_id) = arg else {
                    continue;
                };
                let child = ProxyInner::new(
                    new_id,
                    child_interface,
                    target.conn.clone(),
                    target.queue.lock().clone(),
                );
                store.insert(child);
            }
        }

        match target.queue.lock().upgrade() {
            Some(queue) => {
                target.event_queued.store(true, Ordering::Release);
                queue.events.lock().push_back(QueuedEvent {
                    target: Arc::clone(&target),
                    opcode: header.opcode,
                    args,
                });
            }
            None => log::warn!(
                "dropping {}.{} for object {}: its event queue is gone",
                target.interface.name,
                desc.name,
                header.object_id
            ),
        }
        Ok(())
    }

    fn invalid_method(&self, header: MessageHeader, interface: &str) -> FatalError {
        log::error!(
            "opcode {} is not an event of {interface} (object {})",
            header.opcode,
            header.object_id
        );
        FatalError::Protocol(ProtocolError {
            code: display_error::INVALID_METHOD,
            object_id: header.object_id,
            interface: interface.to_owned(),
        })
    }

    /// The display's own events never reach a queue: `error` latches
    /// the connection, `delete_id` retires zombie bookkeeping.
    fn handle_display_event(
        &self,
        store: &mut ObjectStore,
        opcode: u16,
        args: &[Argument],
    ) -> Result<(), FatalError> {
        match opcode {
            protocol::DISPLAY_EVT_ERROR => {
                let (
                    Argument::Object(object_id),
                    Argument::Uint(code),
                    Argument::Str(message),
                ) = (&args[0], &args[1], &args[2])
                else {
                    return Err(FatalError::Transport(io::ErrorKind::InvalidData));
                };
                let interface = store.interface_name(*object_id).unwrap_or("").to_owned();
                log::error!(
                    "server error on {interface}@{object_id}: {} (code {code})",
                    message.as_deref().unwrap_or("")
                );
                Err(FatalError::Protocol(ProtocolError {
                    code: *code,
                    object_id: *object_id,
                    interface,
                }))
            }
            protocol::DISPLAY_EVT_DELETE_ID => {
                let &Argument::Uint(id) = &args[0] else {
                    return Err(FatalError::Transport(io::ErrorKind::InvalidData));
                };
                store.retire(id);
                Ok(())
            }
            // The opcode was validated against the display's event
            // table before we got here.
            _ => Ok(()),
        }
    }

    fn dispatch_pending(&self, queue: &Arc<QueueInner>) -> Result<usize, FatalError> {
        if let Some(error) = self.fatal() {
            return Err(error);
        }

        let mut count = 0;
        loop {
            // Pop under the lock, invoke outside it: a listener may
            // itself marshal, flush or read.
            let event = queue.events.lock().pop_front();
            let Some(event) = event else { break };

            if !event.target.alive.load(Ordering::Acquire) {
                continue;
            }
            let listener = event.target.listener.lock().clone();
            let Some(listener) = listener else {
                log::trace!(
                    "no listener for {}@{}; event {} discarded",
                    event.target.interface.name,
                    event.target.id,
                    event.opcode
                );
                continue;
            };

            let proxy = Proxy::from_inner(Arc::clone(&event.target));
            count += 1;
            if let Err(error) = listener.event(&proxy, event.opcode, &event.args) {
                // The pass still drains the already-queued events; the
                // connection is unusable afterwards.
                self.latch(FatalError::Listener(error.to_string()));
            }
        }
        Ok(count)
    }

    fn dispatch_queue(&self, queue: &Arc<QueueInner>) -> Result<usize, FatalError> {
        loop {
            let count = self.dispatch_pending(queue)?;
            if count > 0 {
                return Ok(count);
            }

            match self.prepare_read(queue) {
                Ok(()) => {}
                Err(PrepareReadError::PendingEvents) => continue,
                Err(PrepareReadError::ReaderBusy) => {
                    // Another thread is on the socket; let it finish
                    // routing and try again.
                    thread::yield_now();
                    continue;
                }
                Err(PrepareReadError::Defunct(error)) => return Err(error),
            }

            // Get our requests out before waiting for answers.
            if let Err(error) = self.flush() {
                self.cancel_read();
                return Err(error);
            }
            if let Err(e) = self.socket.wait_readable() {
                self.cancel_read();
                return Err(self.latch(FatalError::Transport(e.kind())));
            }
            match self.read_events() {
                Ok(()) => {}
                Err(ReadEventsError::Fatal(error)) => return Err(error),
                Err(ReadEventsError::NotReader) => {
                    unreachable!("read was prepared by this thread")
                }
            }
        }
    }
}

/// Errors establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// `XDG_RUNTIME_DIR` is not set and the display name is relative.
    #[error("XDG_RUNTIME_DIR is not set in the environment")]
    NoXdgRuntimeDir,
    /// `WAYLAND_SOCKET` does not contain a descriptor number.
    #[error("WAYLAND_SOCKET is set but does not contain a file descriptor number")]
    BadSocketVar,
    /// Connecting to the socket failed.
    #[error("failed to connect to the compositor socket: {0}")]
    Connect(#[from] io::Error),
}

/// The permanent error state of a connection.
///
/// Once any of these is latched, every operation except dropping the
/// connection fails with it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalError {
    /// The descriptor is closed or broken.
    #[error("transport failure: {0:?}")]
    Transport(io::ErrorKind),
    /// The peer violated the protocol, or reported that this client
    /// did. There is no way to regain framing sync afterwards.
    #[error("fatal protocol error: {0}")]
    Protocol(ProtocolError),
    /// A listener signalled an unrecoverable condition.
    #[error("listener signalled an unrecoverable condition: {0}")]
    Listener(String),
}

/// Details of a fatal protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// The interface-scoped error code.
    pub code: u32,
    /// The object the error concerns.
    pub object_id: ObjectId,
    /// The interface name of that object, when known.
    pub interface: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code {} on {}@{}",
            self.code, self.interface, self.object_id
        )
    }
}

/// Outcome of a [`flush`](Connection::flush).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Everything buffered reached the kernel.
    Complete,
    /// The transport would block; the remainder stays buffered. Retry
    /// when the descriptor becomes writable.
    Partial,
}

/// Why [`prepare_read`](Connection::prepare_read) did not take the read
/// intent. The first two are transient retry signals, not failures.
#[derive(Debug, Error)]
pub enum PrepareReadError {
    /// Another thread holds the read intent. Dispatch your queue's
    /// pending events and retry; never wait inside this layer.
    #[error("another thread already holds the read intent")]
    ReaderBusy,
    /// The queue still holds undispatched events; dispatch them first.
    #[error("the event queue still holds undispatched events")]
    PendingEvents,
    /// The connection is in its fatal state.
    #[error(transparent)]
    Defunct(FatalError),
}

/// Errors from [`read_events`](Connection::read_events).
#[derive(Debug, Error)]
pub enum ReadEventsError {
    /// The calling thread has not prepared a read. Caller bug.
    #[error("the calling thread has not prepared a read")]
    NotReader,
    /// The connection failed while reading or routing.
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Errors from [`roundtrip`](Connection::roundtrip).
#[derive(Debug, Error)]
pub enum RoundtripError {
    /// The connection failed while waiting for the acknowledgement.
    #[error(transparent)]
    Fatal(#[from] FatalError),
    /// The sync request could not be marshaled.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
}
