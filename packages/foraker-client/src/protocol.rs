//! Interface descriptors for the core protocol objects.
//!
//! The runtime itself needs the display singleton (synchronization and
//! error/delete bookkeeping) and its callback; the registry is included
//! because every client binds its globals through it. Everything else
//! is supplied by generated stubs.

use foraker_core::{ArgKind, Interface, MessageDesc};

/// `wl_display.sync` request opcode.
pub const DISPLAY_REQ_SYNC: u16 = 0;
/// `wl_display.get_registry` request opcode.
pub const DISPLAY_REQ_GET_REGISTRY: u16 = 1;
/// `wl_display.error` event opcode.
pub const DISPLAY_EVT_ERROR: u16 = 0;
/// `wl_display.delete_id` event opcode.
pub const DISPLAY_EVT_DELETE_ID: u16 = 1;
/// `wl_callback.done` event opcode.
pub const CALLBACK_EVT_DONE: u16 = 0;
/// `wl_registry.bind` request opcode.
pub const REGISTRY_REQ_BIND: u16 = 0;
/// `wl_registry.global` event opcode.
pub const REGISTRY_EVT_GLOBAL: u16 = 0;
/// `wl_registry.global_remove` event opcode.
pub const REGISTRY_EVT_GLOBAL_REMOVE: u16 = 1;

/// Error codes carried by `wl_display.error`. The runtime reports
/// peer-side framing violations under the same namespace.
pub mod display_error {
    /// The event referenced an object the client never knew about.
    pub const INVALID_OBJECT: u32 = 0;
    /// The opcode is not a message of the object's interface.
    pub const INVALID_METHOD: u32 = 1;
    /// The server could not allocate.
    pub const NO_MEMORY: u32 = 2;
    /// Implementation error not covered by the codes above, including
    /// lost framing and malformed message bodies.
    pub const IMPLEMENTATION: u32 = 3;
}

/// The display singleton, bound to object id 1 on every connection.
pub static WL_DISPLAY: Interface = Interface {
    name: "wl_display",
    version: 1,
    requests: &[
        MessageDesc {
            name: "sync",
            since: 1,
            signature: &[ArgKind::NewId],
            child_interface: Some(&WL_CALLBACK),
        },
        MessageDesc {
            name: "get_registry",
            since: 1,
            signature: &[ArgKind::NewId],
            child_interface: Some(&WL_REGISTRY),
        },
    ],
    events: &[
        MessageDesc {
            name: "error",
            since: 1,
            signature: &[ArgKind::Object, ArgKind::Uint, ArgKind::Str],
            child_interface: None,
        },
        MessageDesc {
            name: "delete_id",
            since: 1,
            signature: &[ArgKind::Uint],
            child_interface: None,
        },
    ],
};

/// The one-shot acknowledgement object created by `wl_display.sync`.
pub static WL_CALLBACK: Interface = Interface {
    name: "wl_callback",
    version: 1,
    requests: &[],
    events: &[MessageDesc {
        name: "done",
        since: 1,
        signature: &[ArgKind::Uint],
        child_interface: None,
    }],
};

/// The global registry. Its `bind` request is the dynamically-typed
/// constructor: the bound interface is passed to
/// [`marshal_constructor`](crate::Proxy::marshal_constructor) at run
/// time.
pub static WL_REGISTRY: Interface = Interface {
    name: "wl_registry",
    version: 1,
    requests: &[MessageDesc {
        name: "bind",
        since: 1,
        signature: &[ArgKind::Uint, ArgKind::Str, ArgKind::Uint, ArgKind::NewId],
        child_interface: None,
    }],
    events: &[
        MessageDesc {
            name: "global",
            since: 1,
            signature: &[ArgKind::Uint, ArgKind::Str, ArgKind::Uint],
            child_interface: None,
        },
        MessageDesc {
            name: "global_remove",
            since: 1,
            signature: &[ArgKind::Uint],
            child_interface: None,
        },
    ],
};
