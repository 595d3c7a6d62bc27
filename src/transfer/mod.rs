//! Data transfer between tiers.
//!
//! - [`device`]: size discovery and positioned I/O on both devices
//! - [`mover`]: backing store → cache device promotion copies

pub mod device;
pub mod mover;
