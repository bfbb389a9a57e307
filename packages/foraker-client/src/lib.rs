//! Client-side runtime for the Foraker Wayland implementation.
//!
//! This crate owns the connection lifecycle, the registry of
//! remote-object proxies, and the multi-queue event dispatch protocol.
//! It is a generic transport plus object-identity layer: the semantic
//! interfaces it speaks are [pure data](foraker_core::interface)
//! supplied by generated stubs.
//!
//! The runtime spawns no threads of its own. Any number of caller
//! threads may use a [`Connection`] concurrently; socket reads are
//! arbitrated by the non-blocking
//! [`prepare_read`](Connection::prepare_read) /
//! [`read_events`](Connection::read_events) /
//! [`cancel_read`](Connection::cancel_read) protocol, and dispatching a
//! queue never blocks dispatch of other queues.
//!
//! Log output goes through the [`log`] facade; install whatever sink
//! fits the application.

pub mod connection;
pub mod protocol;
pub mod proxy;
pub mod queue;
mod socket;
mod store;

pub use foraker_core as core;

pub use connection::{
    ConnectError, Connection, FatalError, FlushStatus, PrepareReadError, ProtocolError,
    ReadEventsError, RoundtripError,
};
pub use proxy::{EventHandler, ListenerError, ListenerResult, MarshalError, Proxy};
pub use queue::EventQueue;
