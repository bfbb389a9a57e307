//! Event queues: ordered buffers of decoded-but-undispatched events.
//!
//! A queue may be shared by many proxies; a proxy feeds exactly one
//! queue at a time. Events for one proxy are dispatched in arrival
//! order; nothing is guaranteed across proxies on different queues.

use std::{collections::VecDeque, sync::Arc};

use foraker_core::Argument;
use parking_lot::Mutex;

use crate::proxy::ProxyInner;

/// A decoded event waiting to be dispatched.
pub(crate) struct QueuedEvent {
    pub(crate) target: Arc<ProxyInner>,
    pub(crate) opcode: u16,
    pub(crate) args: Vec<Argument>,
}

pub(crate) struct QueueInner {
    pub(crate) events: Mutex<VecDeque<QueuedEvent>>,
}

impl QueueInner {
    pub(crate) fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
        }
    }
}

/// An ordered, thread-safe buffer of decoded events awaiting dispatch.
///
/// Created by [`Connection::new_queue`](crate::Connection::new_queue);
/// the connection's default queue is created with it. Dropping the last
/// handle to a queue discards its undispatched events; proxies still
/// assigned to it have their subsequent events dropped with a warning.
#[derive(Clone)]
pub struct EventQueue {
    pub(crate) inner: Arc<QueueInner>,
}

impl EventQueue {
    pub(crate) fn new(inner: Arc<QueueInner>) -> Self {
        Self { inner }
    }

    /// The number of events currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.events.lock().len()
    }

    /// Whether the queue currently holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.events.lock().is_empty()
    }
}
