//! Tier manager (pager): the read/write entry points of the tiered file.
//!
//! The pager owns all tiering state for the life of the process:
//! - The per-block statistics store
//! - The slot map of the cache device
//! - Shared handles to both devices
//!
//! Reads are split into block units. Each unit is served from the cache
//! device when its block is resident, otherwise from the backing store, and
//! then drives the placement policy, which may promote the block. Writes go
//! straight to the backing store and only update statistics.
//!
//! Nothing here is persisted; a fresh pager starts with an empty cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, trace};

use crate::cache::block::{BlockAddr, BlockRecord, BlockStats, SlotIndex, BLOCK_SIZE_U64};
use crate::cache::policy::{score, Decision, PlacementPolicy};
use crate::cache::slot_map::{SlotMap, SlotMapError};
use crate::config::Config;
use crate::transfer::device::{Device, DeviceError};
use crate::transfer::mover::DataMover;

#[derive(Error, Debug)]
pub enum TierError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("invalid cache layout: {0}")]
    SlotMap(#[from] SlotMapError),

    #[error("request of {len} bytes at offset {offset} exceeds the {size}-byte file")]
    OutOfRange { offset: u64, len: usize, size: u64 },
}

/// Activity counters.
#[derive(Debug, Default)]
pub struct PagerStats {
    cache_hits: AtomicU64,
    backing_reads: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// Point-in-time copy of [`PagerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Block units served from the cache device.
    pub cache_hits: u64,
    /// Block units served from the backing store.
    pub backing_reads: u64,
    pub promotions: u64,
    /// Promotions that displaced a resident block.
    pub evictions: u64,
    /// Write requests.
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl PagerStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            backing_reads: self.backing_reads.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// The central tier manager.
pub struct Pager {
    /// Per-block statistics, one record per backing block.
    stats: BlockStats,

    /// Occupancy of the cache device.
    slots: SlotMap,

    /// Admission policy.
    policy: PlacementPolicy,

    /// Promotion engine.
    mover: DataMover,

    backing: Arc<Device>,
    cache: Arc<Device>,

    counters: PagerStats,
}

impl Pager {
    /// Build the tiering state over two opened devices.
    pub fn new(backing: Device, cache: Device, config: &Config) -> Result<Self, TierError> {
        let backing_blocks = backing.capacity_blocks();
        let cache_slots = cache.capacity_blocks();
        let slots = SlotMap::new(cache_slots, config.slots.hashing)?;
        let stats = BlockStats::new(backing_blocks, config.policy.write_amplification);

        let backing = Arc::new(backing);
        let cache = Arc::new(cache);
        let mover = DataMover::new(backing.clone(), cache.clone());

        info!(
            backing_blocks,
            cache_slots,
            hashing = ?config.slots.hashing,
            "Tiering state initialized"
        );

        Ok(Self {
            stats,
            slots,
            policy: PlacementPolicy::new(config.policy.clone()),
            mover,
            backing,
            cache,
            counters: PagerStats::default(),
        })
    }

    /// Size of the exported file: whole backing blocks only.
    pub fn file_size(&self) -> u64 {
        self.stats.len() * BLOCK_SIZE_U64
    }

    pub fn backing_blocks(&self) -> u64 {
        self.stats.len()
    }

    pub fn cache_slots(&self) -> u64 {
        self.slots.capacity()
    }

    pub fn policy(&self) -> &PlacementPolicy {
        &self.policy
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<(), TierError> {
        let size = self.file_size();
        let in_range = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= size);
        if in_range {
            Ok(())
        } else {
            Err(TierError::OutOfRange { offset, len, size })
        }
    }

    /// Fill `buf` from the file starting at `offset`.
    ///
    /// Callers normally pass whole, aligned blocks; partial units at either
    /// end are still served. Returns the number of bytes read.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, TierError> {
        self.check_range(offset, buf.len())?;

        let end = offset + buf.len() as u64;
        let mut pos = offset;
        let mut done = 0usize;
        while pos < end {
            let addr = BlockAddr::containing(pos);
            let unit_end = (addr.byte_offset() + BLOCK_SIZE_U64).min(end);
            let n = (unit_end - pos) as usize;
            self.read_unit(addr, pos - addr.byte_offset(), &mut buf[done..done + n])?;
            done += n;
            pos = unit_end;
        }

        self.counters
            .bytes_read
            .fetch_add(done as u64, Ordering::Relaxed);
        Ok(done)
    }

    /// Serve one block unit and run the promotion check for it.
    ///
    /// The slot lock is held throughout, so the cached flag, the device the
    /// bytes come from, and any promotion on this slot are all consistent.
    fn read_unit(&self, addr: BlockAddr, within: u64, out: &mut [u8]) -> Result<(), TierError> {
        let slot_index = self.slots.slot_of(addr);
        let mut slot = self.slots.lock(slot_index);

        let cached = self.stats.lock(addr).cached;
        if cached {
            self.cache
                .read_exact_at(slot_index.byte_offset() + within, out)?;
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.backing.read_exact_at(addr.byte_offset() + within, out)?;
            self.counters.backing_reads.fetch_add(1, Ordering::Relaxed);
        }

        let record = self.stats.record_read(addr);
        if record.cached || !self.policy.is_eligible(&record) {
            return Ok(());
        }

        let incumbent = slot.occupant().map(|o| self.stats.get(o));
        match self.policy.decide(&record, incumbent.as_ref()) {
            Decision::Promote => {
                let evicted = self.mover.promote(&self.stats, &mut slot, addr)?;
                self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                if evicted.is_some() {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
            Decision::NoOp => {
                trace!(
                    block = addr.0,
                    slot = slot_index.0,
                    candidate = ?score(&record),
                    incumbent = ?incumbent.as_ref().and_then(score),
                    "Incumbent kept its slot"
                );
            }
        }
        Ok(())
    }

    /// Write `data` at `offset` to the backing store only.
    ///
    /// A cached copy of any touched block is left as it is; it stays in the
    /// cache until a later contest evicts it.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<usize, TierError> {
        self.check_range(offset, data.len())?;
        self.backing.write_all_at(offset, data)?;

        if !data.is_empty() {
            let first = BlockAddr::containing(offset);
            let last = BlockAddr::containing(offset + data.len() as u64 - 1);
            for block in first.0..=last.0 {
                self.stats.record_write(BlockAddr(block));
            }
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data.len())
    }

    /// Copy of a block's statistics.
    pub fn record(&self, addr: BlockAddr) -> BlockRecord {
        self.stats.get(addr)
    }

    pub fn is_cached(&self, addr: BlockAddr) -> bool {
        let _slot = self.slots.lock(self.slots.slot_of(addr));
        self.stats.get(addr).cached
    }

    pub fn slot_of(&self, addr: BlockAddr) -> SlotIndex {
        self.slots.slot_of(addr)
    }

    pub fn occupant(&self, slot: SlotIndex) -> Option<BlockAddr> {
        self.slots.occupant(slot)
    }

    /// Blocks whose cached flag disagrees with the slot map.
    ///
    /// Each block is checked under its slot lock. Empty when the tiering
    /// state is coherent.
    pub fn coherence_violations(&self) -> Vec<BlockAddr> {
        let mut violations = Vec::new();
        for index in 0..self.stats.len() {
            let addr = BlockAddr(index);
            let slot = self.slots.lock(self.slots.slot_of(addr));
            let cached = self.stats.get(addr).cached;
            if cached != (slot.occupant() == Some(addr)) {
                violations.push(addr);
            }
        }
        violations
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }
}

/// Thread-safe handle to the pager. All locking is internal.
pub type SharedPager = Arc<Pager>;
