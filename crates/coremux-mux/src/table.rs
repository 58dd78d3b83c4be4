use std::sync::{Arc, Weak};

use coremux_frame::{EndpointId, MAX_SLOTS};

use crate::error::{MuxError, Result};

/// Fixed-capacity map from endpoint identifier to endpoint configuration.
///
/// Identifiers are slot indices. Slots hold non-owning references: a slot
/// whose configuration has been dropped by its owner reads as empty and can
/// be claimed again.
///
/// The table does no locking of its own. Mutation takes `&mut self`, so the
/// owner decides how writers are serialized; [`Multiplexer`] keeps it behind
/// a reader/writer lock.
///
/// [`Multiplexer`]: crate::Multiplexer
pub struct SlotTable<C> {
    slots: Box<[Option<Weak<C>>]>,
}

impl<C> SlotTable<C> {
    /// Create a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_SLOTS {
            return Err(MuxError::InvalidConfig(format!(
                "slot table capacity must be in 1..={MAX_SLOTS}, got {capacity}"
            )));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the lowest-numbered empty slot for `config`.
    pub fn allocate_slot(&mut self, config: &Arc<C>) -> Result<EndpointId> {
        let index = self
            .slots
            .iter()
            .position(|slot| !is_live(slot))
            .ok_or(MuxError::ResourceExhausted {
                capacity: self.slots.len(),
            })?;
        self.slots[index] = Some(Arc::downgrade(config));
        // Capacity never exceeds MAX_SLOTS, so every index fits.
        Ok(index as EndpointId)
    }

    /// Store `config` at `id`, replacing whatever was there.
    pub fn set_slot(&mut self, id: EndpointId, config: &Arc<C>) -> Result<()> {
        let index = self.index(id)?;
        self.slots[index] = Some(Arc::downgrade(config));
        Ok(())
    }

    /// Configuration stored at `id`, or `None` if the slot is empty.
    pub fn get_slot(&self, id: EndpointId) -> Result<Option<Arc<C>>> {
        let index = self.index(id)?;
        Ok(self.slots[index].as_ref().and_then(Weak::upgrade))
    }

    /// Vacate the slot at `id`.
    pub fn clear_slot(&mut self, id: EndpointId) -> Result<()> {
        let index = self.index(id)?;
        self.slots[index] = None;
        Ok(())
    }

    /// Vacate `id` only if it still holds `config`. Returns whether it did.
    pub fn release_slot(&mut self, id: EndpointId, config: &Arc<C>) -> Result<bool> {
        let index = self.index(id)?;
        let held = self.slots[index]
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(config)));
        if held {
            self.slots[index] = None;
        }
        Ok(held)
    }

    /// Number of slots holding a live configuration.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| is_live(slot)).count()
    }

    /// Identifiers of all slots holding a live configuration, ascending.
    pub fn occupied_ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| is_live(slot))
            .map(|(index, _)| index as EndpointId)
    }

    fn index(&self, id: EndpointId) -> Result<usize> {
        let index = usize::from(id);
        if index >= self.slots.len() {
            return Err(MuxError::NotFound {
                id,
                capacity: self.slots.len(),
            });
        }
        Ok(index)
    }
}

fn is_live<C>(slot: &Option<Weak<C>>) -> bool {
    slot.as_ref().is_some_and(|weak| weak.strong_count() > 0)
}

impl<C> std::fmt::Debug for SlotTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied_ids().collect::<Vec<_>>())
            .finish()
    }
}
