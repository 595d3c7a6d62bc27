//! blockfs-tier: dynamic storage tiering for loopback block devices.
//!
//! Exports a single large file through FUSE. The file's blocks live on a
//! slow backing device; blocks that prove to be read-dominated are promoted
//! into a small, fast cache device:
//!   cache device (hot) ← block device (authoritative)
//!
//! Placement uses only per-block running read/write counters.

pub mod cache;
pub mod config;
pub mod fs;
pub mod transfer;
