//! Filesystem presentation.
//!
//! - [`export`]: the single-file namespace and its access rules
//! - [`fuse`]: kernel binding through `fuser`

pub mod export;
pub mod fuse;
