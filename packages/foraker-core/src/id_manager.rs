//! Allocation of client-side object ids.
//!
//! Ids are unique within one connection for as long as the protocol
//! could still reference them, so the allocator is strictly monotonic
//! and never hands an id out twice. Id 0 is reserved as the null
//! object reference, and ids at `0xff00_0000` and above belong to the
//! server-side range and are never produced here.
//!
//! # Example
//!
//! ```
//! use foraker_core::id_manager::IdManager;
//!
//! let id_manager = IdManager::new();
//! let id1 = id_manager.alloc_id().unwrap();
//! let id2 = id_manager.alloc_id().unwrap();
//! assert!(id2 > id1);
//! ```

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::wire::serde::ObjectId;

/// The lowest id the client may allocate.
pub const CLIENT_MIN_ID: u32 = 0x0000_0001;
/// The highest id the client may allocate; everything above belongs to
/// the server.
pub const CLIENT_MAX_ID: u32 = 0xfeff_ffff;

#[derive(Debug)]
struct IdManagerInner {
    next: u32,
}

impl IdManagerInner {
    const fn new() -> Self {
        Self {
            next: CLIENT_MIN_ID,
        }
    }

    fn peek_next_id(&self) -> Result<u32, IdManagerError> {
        if self.next > CLIENT_MAX_ID {
            return Err(IdManagerError::OutOfClientIds(self.next));
        }
        Ok(self.next)
    }

    fn alloc_id(&mut self) -> Result<u32, IdManagerError> {
        let id = self.peek_next_id()?;
        self.next += 1;
        Ok(id)
    }
}

/// A thread-safe, strictly monotonic allocator for client object ids.
#[derive(Debug, Clone)]
pub struct IdManager(Arc<Mutex<IdManagerInner>>);

impl IdManager {
    /// Creates a new `IdManager`. The first id allocated is
    /// [`CLIENT_MIN_ID`].
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(IdManagerInner::new())))
    }

    /// Allocates the next id.
    ///
    /// # Errors
    ///
    /// Returns an error if the client id range is exhausted. Running a
    /// connection out of four billion ids is caller misuse, not a
    /// recoverable condition.
    pub fn alloc_id(&self) -> Result<ObjectId, IdManagerError> {
        self.0.lock().unwrap().alloc_id()
    }
}

impl Default for IdManager {
    fn default() -> Self {
        Self::new()
    }
}

/// An error that may occur when allocating a new client id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdManagerError {
    /// All client ids have been exhausted.
    #[error(
        "all client ids have been exhausted (next id {0} is outside {CLIENT_MIN_ID:#x}..={CLIENT_MAX_ID:#x})"
    )]
    OutOfClientIds(ObjectId),
}
