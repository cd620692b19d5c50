#![forbid(unsafe_code)]

use engage_kernel_contracts::state::EngageState;
use engage_kernel_contracts::{ContractViolation, MonotonicTimeNs};

use crate::tracker::PersonTracker;

/// Projects the tracker into an immutable `EngageState`.
///
/// Unobserved features stay `None` in the snapshot; nothing is defaulted to zero here.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateAggregator;

impl StateAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn build_snapshot(
        &self,
        tracker: &PersonTracker,
        waiting: bool,
        timestamp: MonotonicTimeNs,
    ) -> Result<EngageState, ContractViolation> {
        EngageState::v1(
            timestamp,
            tracker.snapshot_features(),
            tracker.robot_group().cloned(),
            waiting,
        )
    }
}
