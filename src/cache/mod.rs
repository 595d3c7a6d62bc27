//! Block placement and admission/eviction.
//!
//! This module contains the core tiering data structures and algorithms:
//! - [`block`]: block addressing, BlockRecord, the per-block statistics store
//! - [`slot_map`]: direct-mapped occupancy table of the cache device
//! - [`policy`]: admission policy (read-dominance score + thresholds)
//! - [`pager`]: request orchestrator driving reads, writes and promotion

pub mod block;
pub mod pager;
pub mod policy;
pub mod slot_map;
