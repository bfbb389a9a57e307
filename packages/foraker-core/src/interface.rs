//! Pure-data interface descriptors.
//!
//! The runtime never interprets the semantic meaning of an interface's
//! requests or events; generated stubs supply these tables and the
//! transport only consults opcodes and signatures.

use crate::arg::ArgKind;

/// A description of one remote-object interface: its name, version and
/// the signatures of its requests and events.
#[derive(Debug)]
pub struct Interface {
    /// The protocol name of the interface, e.g. `wl_display`.
    pub name: &'static str,
    /// The highest version of the interface this descriptor covers.
    pub version: u32,
    /// Request descriptors, indexed by opcode.
    pub requests: &'static [MessageDesc],
    /// Event descriptors, indexed by opcode.
    pub events: &'static [MessageDesc],
}

impl Interface {
    /// Looks up the request descriptor for `opcode`.
    #[must_use]
    pub fn request(&self, opcode: u16) -> Option<&'static MessageDesc> {
        self.requests.get(opcode as usize)
    }

    /// Looks up the event descriptor for `opcode`.
    #[must_use]
    pub fn event(&self, opcode: u16) -> Option<&'static MessageDesc> {
        self.events.get(opcode as usize)
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        // Descriptors are 'static singletons.
        std::ptr::eq(self, other)
    }
}

/// The signature of one request or event.
#[derive(Debug)]
pub struct MessageDesc {
    /// The protocol name of the message, e.g. `sync`.
    pub name: &'static str,
    /// The interface version that introduced this message.
    pub since: u32,
    /// Ordered argument kinds.
    pub signature: &'static [ArgKind],
    /// For messages that construct a new object with a statically known
    /// type, the interface of that object.
    pub child_interface: Option<&'static Interface>,
}

impl MessageDesc {
    /// Whether this message constructs a new object (its signature
    /// carries a new-object id).
    #[must_use]
    pub fn constructs(&self) -> bool {
        self.signature.contains(&ArgKind::NewId)
    }

    /// The number of file descriptors this message transfers over the
    /// side channel.
    #[must_use]
    pub fn fd_count(&self) -> usize {
        self.signature.iter().filter(|k| **k == ArgKind::Fd).count()
    }
}
