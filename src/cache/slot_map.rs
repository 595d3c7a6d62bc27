//! Direct-mapped slot table for the cache device.
//!
//! Each cache-device block ("slot") records which backing block currently
//! occupies it. A backing block can only ever live in the one slot its
//! address hashes to; collisions are settled by the placement policy, never
//! by probing.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::block::{BlockAddr, SlotIndex};

/// How a block address is reduced to a slot index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotHashing {
    /// `addr % capacity`. Works for any capacity.
    #[default]
    Modulo,
    /// `addr & (capacity - 1)`. Requires a power-of-two capacity.
    Mask,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotMapError {
    #[error("cache device holds no complete block")]
    Empty,

    #[error("mask slot hashing needs a power-of-two slot count, got {0}")]
    NotPowerOfTwo(u64),
}

/// One entry per cache-device block.
#[derive(Debug)]
pub struct SlotMap {
    slots: Vec<Mutex<Option<BlockAddr>>>,
    hashing: SlotHashing,
}

/// Exclusive hold on one slot entry.
///
/// Cache membership of every block hashing to this slot can only change
/// while a guard for it is alive.
pub struct SlotGuard<'a> {
    slot: SlotIndex,
    occupant: MutexGuard<'a, Option<BlockAddr>>,
}

impl SlotGuard<'_> {
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub fn occupant(&self) -> Option<BlockAddr> {
        *self.occupant
    }

    pub fn set_occupant(&mut self, occupant: Option<BlockAddr>) {
        *self.occupant = occupant;
    }
}

impl SlotMap {
    /// Create an all-empty map of `capacity` slots.
    pub fn new(capacity: u64, hashing: SlotHashing) -> Result<Self, SlotMapError> {
        if capacity == 0 {
            return Err(SlotMapError::Empty);
        }
        if hashing == SlotHashing::Mask && !capacity.is_power_of_two() {
            return Err(SlotMapError::NotPowerOfTwo(capacity));
        }
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Ok(Self { slots, hashing })
    }

    /// Number of slots.
    pub fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    pub fn hashing(&self) -> SlotHashing {
        self.hashing
    }

    /// The single candidate slot for `addr`.
    pub fn slot_of(&self, addr: BlockAddr) -> SlotIndex {
        let capacity = self.capacity();
        match self.hashing {
            SlotHashing::Modulo => SlotIndex(addr.0 % capacity),
            SlotHashing::Mask => SlotIndex(addr.0 & (capacity - 1)),
        }
    }

    /// Lock a slot entry.
    pub fn lock(&self, slot: SlotIndex) -> SlotGuard<'_> {
        // slot_of only yields in-range indices
        let occupant = self.slots[slot.0 as usize].lock();
        SlotGuard { slot, occupant }
    }

    /// Current occupant of `slot`.
    pub fn occupant(&self, slot: SlotIndex) -> Option<BlockAddr> {
        self.lock(slot).occupant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_mapping() {
        let map = SlotMap::new(3, SlotHashing::Modulo).unwrap();
        assert_eq!(map.slot_of(BlockAddr(0)), SlotIndex(0));
        assert_eq!(map.slot_of(BlockAddr(4)), SlotIndex(1));
        assert_eq!(map.slot_of(BlockAddr(8)), SlotIndex(2));
    }

    #[test]
    fn test_single_slot_takes_everything() {
        let map = SlotMap::new(1, SlotHashing::Modulo).unwrap();
        for addr in 0..4 {
            assert_eq!(map.slot_of(BlockAddr(addr)), SlotIndex(0));
        }
    }

    #[test]
    fn test_mask_matches_modulo_for_power_of_two() {
        let modulo = SlotMap::new(8, SlotHashing::Modulo).unwrap();
        let mask = SlotMap::new(8, SlotHashing::Mask).unwrap();
        for addr in 0..100 {
            assert_eq!(modulo.slot_of(BlockAddr(addr)), mask.slot_of(BlockAddr(addr)));
        }
    }

    #[test]
    fn test_mask_rejects_non_power_of_two() {
        assert_eq!(
            SlotMap::new(6, SlotHashing::Mask).unwrap_err(),
            SlotMapError::NotPowerOfTwo(6)
        );
        assert_eq!(
            SlotMap::new(0, SlotHashing::Modulo).unwrap_err(),
            SlotMapError::Empty
        );
    }

    #[test]
    fn test_occupant_updates() {
        let map = SlotMap::new(2, SlotHashing::Modulo).unwrap();
        assert_eq!(map.occupant(SlotIndex(1)), None);
        {
            let mut guard = map.lock(SlotIndex(1));
            guard.set_occupant(Some(BlockAddr(7)));
        }
        assert_eq!(map.occupant(SlotIndex(1)), Some(BlockAddr(7)));
        assert_eq!(map.occupant(SlotIndex(0)), None);
    }
}
