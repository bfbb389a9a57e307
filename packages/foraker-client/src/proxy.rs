//! Client-side proxies for remote objects.
//!
//! A [`Proxy`] is a cheap cloneable handle for one object living on the
//! server. It carries the object's id, its interface descriptor, the
//! event queue its events are delivered to, and an optional listener.

use std::{
    any::Any,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use foraker_core::{
    Argument, Interface, ObjectId,
    arg::ArgError,
    id_manager::IdManagerError,
};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{connection::ConnectionInner, queue::QueueInner};

/// What a listener returns. `Err` signals an unrecoverable condition:
/// the connection is latched into its fatal state, but the current
/// dispatch pass still drains the already-queued events.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A listener bound to a proxy, invoked with each decoded event.
///
/// Any `Fn(&Proxy, u16, &[Argument]) -> ListenerResult + Send + Sync`
/// closure implements this. Generated stubs that route many proxies
/// through one shared dispatcher implement it on their dispatcher type
/// and register it with [`Proxy::add_dispatcher`].
pub trait EventHandler: Send + Sync {
    /// Handles one event: the target proxy, the event opcode scoped to
    /// the proxy's interface, and the decoded arguments.
    fn event(&self, proxy: &Proxy, opcode: u16, args: &[Argument]) -> ListenerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Proxy, u16, &[Argument]) -> ListenerResult + Send + Sync,
{
    fn event(&self, proxy: &Proxy, opcode: u16, args: &[Argument]) -> ListenerResult {
        self(proxy, opcode, args)
    }
}

pub(crate) struct ProxyInner {
    pub(crate) id: ObjectId,
    pub(crate) interface: &'static Interface,
    pub(crate) conn: Weak<ConnectionInner>,
    pub(crate) queue: Mutex<Weak<QueueInner>>,
    pub(crate) listener: Mutex<Option<Arc<dyn EventHandler>>>,
    pub(crate) user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    pub(crate) alive: AtomicBool,
    /// Set once the first event for this proxy is routed to a queue;
    /// after that the listener binding may no longer be replaced.
    pub(crate) event_queued: AtomicBool,
}

impl ProxyInner {
    pub(crate) fn new(
        id: ObjectId,
        interface: &'static Interface,
        conn: Weak<ConnectionInner>,
        queue: Weak<QueueInner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            interface,
            conn,
            queue: Mutex::new(queue),
            listener: Mutex::new(None),
            user_data: Mutex::new(None),
            alive: AtomicBool::new(true),
            event_queued: AtomicBool::new(false),
        })
    }
}

/// Client-side handle for one remote object.
#[derive(Clone)]
pub struct Proxy {
    pub(crate) inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn from_inner(inner: Arc<ProxyInner>) -> Self {
        Self { inner }
    }

    /// The object id, unique among live objects on this connection.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// The interface descriptor this proxy speaks.
    #[must_use]
    pub fn interface(&self) -> &'static Interface {
        self.inner.interface
    }

    /// The interface's protocol name.
    #[must_use]
    pub fn class(&self) -> &'static str {
        self.inner.interface.name
    }

    /// The interface version of this proxy.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.interface.version
    }

    /// Whether this proxy has not been destroyed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Encodes a request and appends it to the connection's outgoing
    /// buffer. Nothing is written to the socket until
    /// [`flush`](crate::Connection::flush).
    ///
    /// If the request's signature constructs a new object with a
    /// statically known interface, the child proxy is created (bound to
    /// this proxy's queue) and returned before the bytes can reach the
    /// wire, so its id is valid by the time the server processes the
    /// request. Pass `Argument::NewId(0)` as the placeholder; the
    /// runtime fills in the allocated id.
    ///
    /// # Errors
    ///
    /// Fails if the arguments do not match the declared signature
    /// (caller misuse), the id space is exhausted, the proxy was
    /// destroyed, or the connection is defunct.
    pub fn marshal(
        &self,
        opcode: u16,
        args: Vec<Argument>,
    ) -> Result<Option<Proxy>, MarshalError> {
        self.conn()?.marshal(&self.inner, opcode, args, None)
    }

    /// Like [`marshal`](Self::marshal), for constructor requests whose
    /// new object's interface is only known at run time (e.g. registry
    /// binds). `interface` overrides the signature's static child
    /// interface.
    ///
    /// # Errors
    ///
    /// As [`marshal`](Self::marshal); additionally fails if the request
    /// does not construct an object.
    pub fn marshal_constructor(
        &self,
        opcode: u16,
        args: Vec<Argument>,
        interface: &'static Interface,
    ) -> Result<Proxy, MarshalError> {
        let child = self
            .conn()?
            .marshal(&self.inner, opcode, args, Some(interface))?;
        child.ok_or(MarshalError::NotConstructor {
            interface: self.inner.interface.name,
            opcode,
        })
    }

    /// Binds a listener to this proxy.
    ///
    /// The binding may be replaced until the first event for the proxy
    /// has been queued; after that point replacing it would race
    /// dispatch of events recorded under the old binding.
    ///
    /// # Errors
    ///
    /// Fails with [`ListenerError::InUse`] if a listener is already
    /// bound and an event has already been queued for this proxy.
    pub fn add_listener(&self, handler: impl EventHandler + 'static) -> Result<(), ListenerError> {
        self.add_dispatcher(Arc::new(handler))
    }

    /// Binds a pre-built, possibly shared dispatcher to this proxy.
    /// Same contract as [`add_listener`](Self::add_listener).
    ///
    /// # Errors
    ///
    /// Fails with [`ListenerError::InUse`] under the same conditions as
    /// [`add_listener`](Self::add_listener).
    pub fn add_dispatcher(&self, dispatcher: Arc<dyn EventHandler>) -> Result<(), ListenerError> {
        let mut slot = self.inner.listener.lock();
        if slot.is_some() && self.inner.event_queued.load(Ordering::Acquire) {
            return Err(ListenerError::InUse);
        }
        *slot = Some(dispatcher);
        Ok(())
    }

    /// Whether a listener is currently bound.
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    /// Reassigns future event delivery to `queue`. Events already
    /// sitting in the previously assigned queue stay there.
    pub fn set_queue(&self, queue: &crate::EventQueue) {
        *self.inner.queue.lock() = Arc::downgrade(&queue.inner);
    }

    /// Attaches opaque caller data to this proxy.
    pub fn set_user_data(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.inner.user_data.lock() = Some(data);
    }

    /// The caller data attached with
    /// [`set_user_data`](Self::set_user_data), if any.
    #[must_use]
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.user_data.lock().clone()
    }

    /// Destroys this proxy, releasing its id from the object store.
    ///
    /// Events already queued for it are discarded at dispatch time, and
    /// events still in flight from the server are dropped on arrival.
    /// Callers must not destroy a proxy concurrently with dispatch of
    /// its own events.
    pub fn destroy(&self) {
        self.inner.alive.store(false, Ordering::Release);
        if let Some(conn) = self.inner.conn.upgrade() {
            conn.store.lock().remove(self.inner.id, self.inner.interface);
        }
    }

    fn conn(&self) -> Result<Arc<ConnectionInner>, MarshalError> {
        self.inner.conn.upgrade().ok_or(MarshalError::Defunct)
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inner.interface.name, self.inner.id)
    }
}

/// Errors raised while marshaling a request.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// The connection has been dropped or latched into its fatal state.
    #[error("the connection is defunct")]
    Defunct,
    /// The proxy was already destroyed.
    #[error("object {0} has been destroyed")]
    Destroyed(ObjectId),
    /// The opcode is not a request of the proxy's interface.
    #[error("opcode {opcode} is not a request of {interface}")]
    UnknownOpcode {
        /// The proxy's interface name.
        interface: &'static str,
        /// The offending opcode.
        opcode: u16,
    },
    /// `marshal_constructor` was called for a request that does not
    /// construct an object.
    #[error("request {opcode} of {interface} does not construct an object")]
    NotConstructor {
        /// The proxy's interface name.
        interface: &'static str,
        /// The offending opcode.
        opcode: u16,
    },
    /// The request constructs an object but neither the signature nor
    /// the caller supplied its interface.
    #[error("constructor request carries no interface; use marshal_constructor")]
    MissingInterface,
    /// The encoded message would exceed the maximum message size.
    #[error("message exceeds the maximum message size")]
    TooLarge,
    /// The argument list does not match the declared signature.
    #[error(transparent)]
    Args(#[from] ArgError),
    /// The client id space is exhausted.
    #[error(transparent)]
    IdExhausted(#[from] IdManagerError),
}

/// Error raised when binding a listener.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// A listener is already bound and at least one event has been
    /// queued under it.
    #[error("a listener is already bound and events are queued under it")]
    InUse,
}
