//! Core wire-format and object-identity primitives for the Foraker
//! Wayland client runtime.
//!
//! Nothing in this crate performs I/O. It provides the binary codec for
//! the wire protocol, the runtime-tagged argument model, the pure-data
//! interface descriptors, and the client-side object id allocator that
//! the transport crates build on.

pub mod arg;
pub mod id_manager;
pub mod interface;
pub mod wire;

pub use arg::{ArgKind, Argument};
pub use interface::{Interface, MessageDesc};
pub use wire::serde::ObjectId;
