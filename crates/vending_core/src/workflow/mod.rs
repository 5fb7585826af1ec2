//! Long-running lifecycle workflows.
//!
//! Each workflow is an explicit state enum plus a runner that performs the
//! state's effect against the ports and feeds the result back in. All record
//! writes are conditional, so every runner tolerates duplicate triggers.

pub mod burial;
pub mod decommission;
pub mod member_purge;
pub mod suspension;

use crate::store::UpdateOutcome;

/// Whether a guarded terminal mark was written or was already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    Applied,
    /// The guard failed; another run already wrote the mark or moved the record on.
    AlreadyApplied,
}

impl From<&UpdateOutcome> for MarkResult {
    fn from(outcome: &UpdateOutcome) -> Self {
        if outcome.is_applied() {
            Self::Applied
        } else {
            Self::AlreadyApplied
        }
    }
}
