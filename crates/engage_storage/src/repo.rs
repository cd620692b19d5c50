#![forbid(unsafe_code)]

use engage_kernel_contracts::decision::DecisionStateRecord;
use engage_kernel_contracts::MonotonicTimeNs;

use crate::ledger::{DecisionStateId, DecisionStateLedger, DecisionStateRow, StorageError};

/// Typed repository interface for retained decision-state records.
pub trait DecisionStateRepo {
    fn append_decision_state_row(
        &mut self,
        record: DecisionStateRecord,
        stored_at: MonotonicTimeNs,
    ) -> Result<DecisionStateId, StorageError>;
    fn decision_state_row(&self, id: DecisionStateId) -> Result<&DecisionStateRow, StorageError>;
    fn latest_decision_state_row(&self) -> Option<&DecisionStateRow>;
    fn decision_state_rows(&self) -> &[DecisionStateRow];
}

impl DecisionStateRepo for DecisionStateLedger {
    fn append_decision_state_row(
        &mut self,
        record: DecisionStateRecord,
        stored_at: MonotonicTimeNs,
    ) -> Result<DecisionStateId, StorageError> {
        self.append(record, stored_at)
    }

    fn decision_state_row(&self, id: DecisionStateId) -> Result<&DecisionStateRow, StorageError> {
        self.get(id)
    }

    fn latest_decision_state_row(&self) -> Option<&DecisionStateRow> {
        self.latest()
    }

    fn decision_state_rows(&self) -> &[DecisionStateRow] {
        self.rows()
    }
}
