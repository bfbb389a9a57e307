//! The per-connection store of live objects.
//!
//! Maps object ids to proxy records and remembers destroyed ids as
//! zombies until the server acknowledges the deletion, so that events
//! already in flight for a destroyed object can be discarded instead of
//! being treated as a protocol violation.

use std::{collections::BTreeMap, sync::Arc};

use foraker_core::{
    Interface, ObjectId,
    id_manager::{IdManager, IdManagerError},
};

use crate::proxy::ProxyInner;

/// Result of resolving the target of an incoming event.
pub(crate) enum Lookup {
    /// The object is live.
    Live(Arc<ProxyInner>),
    /// The object was destroyed client-side; events for it are dropped.
    Zombie(&'static Interface),
    /// The id was never allocated, or was already retired by the
    /// server. A protocol violation.
    Unknown,
}

pub(crate) struct ObjectStore {
    objects: BTreeMap<ObjectId, Arc<ProxyInner>>,
    zombies: BTreeMap<ObjectId, &'static Interface>,
    id_manager: IdManager,
}

impl ObjectStore {
    pub(crate) fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            zombies: BTreeMap::new(),
            id_manager: IdManager::new(),
        }
    }

    /// Allocates the next client-side id.
    pub(crate) fn alloc_id(&self) -> Result<ObjectId, IdManagerError> {
        self.id_manager.alloc_id()
    }

    /// Registers a live object. Server-created objects land here too,
    /// with ids from the server range.
    pub(crate) fn insert(&mut self, proxy: Arc<ProxyInner>) {
        self.objects.insert(proxy.id, proxy);
    }

    pub(crate) fn lookup(&self, id: ObjectId) -> Lookup {
        if let Some(proxy) = self.objects.get(&id) {
            return Lookup::Live(proxy.clone());
        }
        match self.zombies.get(&id) {
            Some(interface) => Lookup::Zombie(interface),
            None => Lookup::Unknown,
        }
    }

    /// The interface name of a live or zombie object, for error
    /// reporting.
    pub(crate) fn interface_name(&self, id: ObjectId) -> Option<&'static str> {
        if let Some(proxy) = self.objects.get(&id) {
            return Some(proxy.interface.name);
        }
        self.zombies.get(&id).map(|interface| interface.name)
    }

    /// Removes a destroyed object, remembering it as a zombie so that
    /// in-flight events for it can still be matched and discarded.
    pub(crate) fn remove(&mut self, id: ObjectId, interface: &'static Interface) {
        if self.objects.remove(&id).is_some() {
            self.zombies.insert(id, interface);
        }
    }

    /// Rolls back a registration that never made it onto the wire.
    pub(crate) fn forget(&mut self, id: ObjectId) {
        self.objects.remove(&id);
    }

    /// Server acknowledged the deletion of `id`; the zombie bookkeeping
    /// can go.
    pub(crate) fn retire(&mut self, id: ObjectId) {
        if self.zombies.remove(&id).is_none() {
            log::warn!("server deleted id {id} which is not a destroyed object");
        }
    }
}
