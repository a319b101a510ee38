//! Accepted connections of one server.
//!
//! The registry has a fixed capacity chosen at server creation, which bounds
//! the multiplex set. Closed connections are not shifted out immediately: they
//! become a sentinel slot until the next [`compact`](ClientRegistry::compact).

use crate::context::Context;
use crate::error::{Error, Result};
use crate::net::handle::Handle;
use crate::net::socket;
use crate::reactor::validity::is_valid;

use tracing::{debug, trace};

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// An open connection being watched.
    Live(Handle),
    /// The peer is gone. The registry still owns the descriptor and closes it
    /// on the next compaction.
    Closed(Handle),
    /// The descriptor was closed behind the registry's back; nothing to close.
    Invalid,
}

impl Slot {
    pub fn live(self) -> Option<Handle> {
        match self {
            Slot::Live(handle) => Some(handle),
            _ => None,
        }
    }
}

/// What one compaction pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    /// Slots removed from the registry.
    pub removed: usize,
    /// Descriptors closed by this pass.
    pub closed: usize,
}

#[derive(Debug)]
pub struct ClientRegistry {
    slots: Vec<Slot>,
    capacity: usize,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds a connection, failing when the registry is full.
    pub fn append(&mut self, handle: Handle) -> Result<usize> {
        if self.slots.len() == self.capacity {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        self.slots.push(Slot::Live(handle));

        Ok(self.slots.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn get(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Live connections with their indices, in registry order.
    pub fn live(&self) -> impl Iterator<Item = (usize, Handle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.live().map(|handle| (index, handle)))
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.live().map(|(_, handle)| handle).collect()
    }

    /// Turns a live entry into the closed sentinel without shifting the array.
    ///
    /// Returns the handle that was marked, if the slot was live.
    pub fn mark_closed(&mut self, index: usize) -> Option<Handle> {
        let slot = self.slots.get_mut(index)?;
        let handle = slot.live()?;

        *slot = Slot::Closed(handle);

        Some(handle)
    }

    /// Drops a live entry whose descriptor is no longer ours to close.
    pub fn mark_invalid(&mut self, index: usize) -> Option<Handle> {
        let slot = self.slots.get_mut(index)?;
        let handle = slot.live()?;

        *slot = Slot::Invalid;

        Some(handle)
    }

    /// Removes sentinel entries and live entries that no longer pass
    /// [`is_valid`], preserving the order of the rest. Closed entries are
    /// closed here, exactly once.
    pub fn compact(&mut self, context: &Context) -> Compaction {
        self.compact_with(is_valid, |handle| {
            if let Err(err) = socket::close(context, handle) {
                debug!(handle = %handle, error = %err, "closing a finished connection failed");
            }
        })
    }

    pub(crate) fn compact_with(
        &mut self,
        mut probe: impl FnMut(Handle) -> bool,
        mut close: impl FnMut(Handle),
    ) -> Compaction {
        let before = self.slots.len();
        let mut closed = 0;

        self.slots.retain(|slot| match *slot {
            Slot::Live(handle) => probe(handle),
            Slot::Closed(handle) => {
                close(handle);
                closed += 1;
                false
            }
            Slot::Invalid => false,
        });

        let compaction = Compaction {
            removed: before - self.slots.len(),
            closed,
        };

        if compaction.removed > 0 {
            trace!(
                removed = compaction.removed,
                closed = compaction.closed,
                remaining = self.slots.len(),
                "registry compacted"
            );
        }

        compaction
    }

    /// Empties the registry, returning every descriptor it still owns.
    pub(crate) fn take_owned(&mut self) -> Vec<Handle> {
        self.slots
            .drain(..)
            .filter_map(|slot| match slot {
                Slot::Live(handle) | Slot::Closed(handle) => Some(handle),
                Slot::Invalid => None,
            })
            .collect()
    }
}
