//! Data mover: copies a promoted block into its cache slot.

use std::sync::Arc;

use tracing::debug;

use crate::cache::block::{BlockAddr, BlockStats, BLOCK_SIZE};
use crate::cache::slot_map::SlotGuard;
use crate::transfer::device::{Device, DeviceError};

/// Performs backing → cache copies and the membership bookkeeping that
/// goes with them.
#[derive(Debug, Clone)]
pub struct DataMover {
    backing: Arc<Device>,
    cache: Arc<Device>,
}

impl DataMover {
    pub fn new(backing: Arc<Device>, cache: Arc<Device>) -> Self {
        Self { backing, cache }
    }

    /// Copy `candidate` into the slot held by `slot` and hand it the slot.
    ///
    /// The slot guard must stay held for the whole call; it is what makes the
    /// copy, the two flag flips and the occupant update look atomic to other
    /// requests on this slot. Returns the evicted occupant, if any.
    ///
    /// On error the bookkeeping is left untouched. The cache slot may hold a
    /// partial copy at that point, which is why callers treat it as fatal.
    pub fn promote(
        &self,
        stats: &BlockStats,
        slot: &mut SlotGuard<'_>,
        candidate: BlockAddr,
    ) -> Result<Option<BlockAddr>, DeviceError> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.backing.read_exact_at(candidate.byte_offset(), &mut buf)?;
        self.cache.write_all_at(slot.slot().byte_offset(), &buf)?;

        let evicted = slot.occupant();
        stats.transfer_membership(evicted, candidate);
        slot.set_occupant(Some(candidate));

        debug!(
            block = candidate.0,
            slot = slot.slot().0,
            evicted = evicted.map(|b| b.0),
            "Promoted block"
        );

        Ok(evicted)
    }
}
