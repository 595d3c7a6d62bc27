//! Block addressing and the per-block statistics store.
//!
//! Every logical block of the backing store has one [`BlockRecord`] holding
//! its running read/write counters and whether it is mirrored in the cache
//! device. Records are guarded individually so unrelated blocks never contend.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Tiering granularity in bytes. All placement decisions are made per block.
pub const BLOCK_SIZE: usize = 4096;

/// [`BLOCK_SIZE`] as a byte offset quantity.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Index of a logical block on the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockAddr(pub u64);

impl BlockAddr {
    /// Block containing the given byte offset.
    pub fn containing(offset: u64) -> Self {
        BlockAddr(offset / BLOCK_SIZE_U64)
    }

    /// Byte offset of the first byte of this block on the backing store.
    pub fn byte_offset(self) -> u64 {
        self.0 * BLOCK_SIZE_U64
    }
}

impl std::fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a block-sized slot on the cache device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub u64);

impl SlotIndex {
    /// Byte offset of this slot on the cache device.
    pub fn byte_offset(self) -> u64 {
        self.0 * BLOCK_SIZE_U64
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access history and cache membership of one logical block.
///
/// The counters are floating point because writes inflate `write_count`
/// in proportion to the read count rather than by one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub read_count: f64,
    pub write_count: f64,
    /// True iff the block's data is mirrored in the slot it hashes to.
    pub cached: bool,
}

impl BlockRecord {
    /// Total (weighted) accesses.
    pub fn access_count(&self) -> f64 {
        self.read_count + self.write_count
    }
}

/// The Block Statistics Store: one lock-guarded record per backing block.
#[derive(Debug)]
pub struct BlockStats {
    records: Vec<Mutex<BlockRecord>>,
    write_amplification: f64,
}

impl BlockStats {
    /// Create zeroed records for `blocks` backing blocks.
    pub fn new(blocks: u64, write_amplification: f64) -> Self {
        let records = (0..blocks).map(|_| Mutex::new(BlockRecord::default())).collect();
        Self {
            records,
            write_amplification,
        }
    }

    /// Number of tracked blocks.
    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lock the record for `addr`.
    ///
    /// Panics when `addr` is outside the backing store: callers range-check
    /// requests before they reach the store, so this is a broken invariant.
    pub fn lock(&self, addr: BlockAddr) -> MutexGuard<'_, BlockRecord> {
        let index = usize::try_from(addr.0).unwrap_or(usize::MAX);
        match self.records.get(index) {
            Some(record) => record.lock(),
            None => panic!(
                "block {addr} outside backing store of {} blocks",
                self.records.len()
            ),
        }
    }

    /// Copy of the record for `addr`.
    pub fn get(&self, addr: BlockAddr) -> BlockRecord {
        *self.lock(addr)
    }

    /// Count one read. Returns the updated record.
    pub fn record_read(&self, addr: BlockAddr) -> BlockRecord {
        let mut record = self.lock(addr);
        record.read_count += 1.0;
        *record
    }

    /// Count one write: the write counter grows by a fraction of the read
    /// counter, so heavily read blocks lose their read dominance quickly
    /// once they start being written. Never touches `cached`.
    pub fn record_write(&self, addr: BlockAddr) -> BlockRecord {
        let mut record = self.lock(addr);
        record.write_count += self.write_amplification * record.read_count;
        *record
    }

    /// Move cache membership from `evicted` (if any) to `admitted`.
    ///
    /// Both records are held for the flip; they are locked in address order.
    pub(crate) fn transfer_membership(&self, evicted: Option<BlockAddr>, admitted: BlockAddr) {
        match evicted {
            Some(old) if old != admitted => {
                let (first, second) = if old < admitted {
                    (old, admitted)
                } else {
                    (admitted, old)
                };
                let mut a = self.lock(first);
                let mut b = self.lock(second);
                let (old_rec, new_rec) = if first == old {
                    (&mut *a, &mut *b)
                } else {
                    (&mut *b, &mut *a)
                };
                old_rec.cached = false;
                new_rec.cached = true;
            }
            _ => self.lock(admitted).cached = true,
        }
    }
}
