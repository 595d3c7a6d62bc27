//! Placement policy: decides whether a backing block earns a cache slot.
//!
//! A block is ranked by how read-dominated its access history is:
//!
//! ```text
//! score(block) = (reads - writes) / (reads + writes)
//! ```
//!
//! A block becomes a promotion candidate once it has seen enough traffic,
//! is overwhelmingly read, and is not under heavy write pressure. It then
//! takes its slot only if it strictly beats whatever occupies the slot now.

use crate::cache::block::BlockRecord;
use crate::config::PolicyConfig;

/// Outcome of a slot contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Copy the candidate into its slot, evicting the incumbent.
    Promote,
    /// Leave the slot as it is.
    NoOp,
}

/// Read/write dominance of a block, or `None` for a block never accessed.
pub fn score(record: &BlockRecord) -> Option<f64> {
    let total = record.access_count();
    if total > 0.0 {
        Some((record.read_count - record.write_count) / total)
    } else {
        None
    }
}

/// The placement policy engine.
#[derive(Debug, Clone)]
pub struct PlacementPolicy {
    config: PolicyConfig,
}

impl PlacementPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Whether `record` may contest its slot at all.
    pub fn is_eligible(&self, record: &BlockRecord) -> bool {
        if record.access_count() < self.config.min_access_count {
            return false;
        }
        if record.write_count > self.config.max_write_count {
            return false;
        }
        match score(record) {
            Some(s) => s >= self.config.min_read_write_ratio,
            None => false,
        }
    }

    /// Contest between an eligible, uncached candidate and the current
    /// occupant of its slot (`None` when the slot is empty).
    ///
    /// Ties keep the incumbent. An incumbent with no accesses (possible only
    /// when thresholds are zero) has no score and loses to any scored
    /// candidate.
    pub fn decide(&self, candidate: &BlockRecord, incumbent: Option<&BlockRecord>) -> Decision {
        let Some(candidate_score) = score(candidate) else {
            return Decision::NoOp;
        };
        let Some(incumbent) = incumbent else {
            return Decision::Promote;
        };
        match score(incumbent) {
            Some(incumbent_score) if candidate_score <= incumbent_score => Decision::NoOp,
            _ => Decision::Promote,
        }
    }
}
