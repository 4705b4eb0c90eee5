//! Registry of live server sessions.
//!
//! Slots come from a slab, so indices are reused once a session ends. Each
//! entry carries a generation; a `SessionId` only matches the entry it was
//! issued for, never a later occupant of the same slot.

use crate::session::SessionControl;
use slab::Slab;
use std::net::SocketAddr;
use std::sync::Mutex;
use tracing::debug;

/// Identifier of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId {
    index: usize,
    generation: u64,
}

impl SessionId {
    /// Slab slot of this session.
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    peer: SocketAddr,
    control: SessionControl,
}

#[derive(Debug, Default)]
struct Slots {
    entries: Slab<Entry>,
    next_generation: u64,
}

/// Arena of live sessions with O(1) insert and remove.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<Slots>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its identifier.
    pub fn insert(&self, peer: SocketAddr, control: SessionControl) -> SessionId {
        let mut slots = self.lock();
        let generation = slots.next_generation;
        slots.next_generation += 1;
        let index = slots.entries.insert(Entry {
            generation,
            peer,
            control,
        });
        SessionId { index, generation }
    }

    /// Remove a session.
    ///
    /// Returns `false` if the slot is empty or now belongs to a newer session.
    pub fn remove(&self, id: SessionId) -> bool {
        let mut slots = self.lock();
        let current = slots
            .entries
            .get(id.index)
            .is_some_and(|entry| entry.generation == id.generation);
        if current {
            slots.entries.remove(id.index);
        }
        current
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Stop every registered session.
    ///
    /// Sessions deregister themselves as they wind down. Returns how many
    /// were stopped by this call.
    pub fn stop_all(&self) -> usize {
        let slots = self.lock();
        let mut stopped = 0;
        for (index, entry) in slots.entries.iter() {
            if entry.control.stop() {
                debug!(peer = %entry.peer, slot = index, "Stopping session");
                stopped += 1;
            }
        }
        stopped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        // Entries stay consistent even if a holder panicked.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
