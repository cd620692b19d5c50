#![forbid(unsafe_code)]

use std::fmt::Write as _;

use engage_kernel_contracts::decision::DecisionStateRecord;
use engage_kernel_contracts::state::EngageState;
use engage_kernel_contracts::{ContractViolation, MonotonicTimeNs, Validate};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{table} has no row {key}")]
    NotFound { table: &'static str, key: String },
    #[error("{table} row {key} no longer matches its stored digest")]
    DigestMismatch { table: &'static str, key: String },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

const TABLE: &str = "decision_states";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecisionStateId(pub u64);

impl std::fmt::Display for DecisionStateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ds_{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionStateRow {
    pub id: DecisionStateId,
    pub stored_at: MonotonicTimeNs,
    pub record: DecisionStateRecord,
    /// Lowercase hex SHA-256 of the serialized snapshot.
    pub state_digest: String,
}

/// Lowercase hex SHA-256 of the JSON form of `state`.
pub fn state_digest(state: &EngageState) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(state)?;
    let mut out = String::with_capacity(64);
    for b in Sha256::digest(&bytes) {
        let _ = write!(out, "{b:02x}");
    }
    Ok(out)
}

/// Append-only in-memory table of completed decision cycles.
///
/// Rows are only ever handed out by shared reference; nothing edits a stored row. Ids are
/// assigned monotonically and never reused, also after old rows are pruned.
#[derive(Debug, Clone)]
pub struct DecisionStateLedger {
    rows: Vec<DecisionStateRow>,
    next_id: u64,
    max_rows: Option<usize>,
}

impl DecisionStateLedger {
    pub fn new_in_memory() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
            max_rows: None,
        }
    }

    /// Keeps only the newest `max_rows` rows.
    pub fn with_max_rows(max_rows: usize) -> Self {
        Self {
            max_rows: Some(max_rows.max(1)),
            ..Self::new_in_memory()
        }
    }

    pub fn append(
        &mut self,
        record: DecisionStateRecord,
        stored_at: MonotonicTimeNs,
    ) -> Result<DecisionStateId, StorageError> {
        record.validate()?;
        let state_digest = state_digest(&record.state)?;
        let id = DecisionStateId(self.next_id);
        self.next_id += 1;
        self.rows.push(DecisionStateRow {
            id,
            stored_at,
            record,
            state_digest,
        });
        if let Some(max) = self.max_rows {
            if self.rows.len() > max {
                let excess = self.rows.len() - max;
                self.rows.drain(..excess);
            }
        }
        Ok(id)
    }

    /// Returns the row after re-checking its digest.
    pub fn get(&self, id: DecisionStateId) -> Result<&DecisionStateRow, StorageError> {
        let row = self
            .rows
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .and_then(|i| self.rows.get(i))
            .ok_or(StorageError::NotFound {
                table: TABLE,
                key: id.to_string(),
            })?;
        if state_digest(&row.record.state)? != row.state_digest {
            return Err(StorageError::DigestMismatch {
                table: TABLE,
                key: id.to_string(),
            });
        }
        Ok(row)
    }

    pub fn latest(&self) -> Option<&DecisionStateRow> {
        self.rows.last()
    }

    pub fn rows(&self) -> &[DecisionStateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn rows_mut_for_test(&mut self) -> &mut Vec<DecisionStateRow> {
        &mut self.rows
    }
}

impl Default for DecisionStateLedger {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

#[cfg(test)]
mod tests {
    use engage_kernel_contracts::decision::{Action, Decision};

    use super::*;

    fn record(ts: u64) -> DecisionStateRecord {
        DecisionStateRecord::v1(
            EngageState::empty(MonotonicTimeNs(ts), false),
            Decision::general(Action::Nothing).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn digest_is_stable_hex() {
        let s = EngageState::empty(MonotonicTimeNs(1), false);
        let a = state_digest(&s).unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, state_digest(&s).unwrap());
        assert_ne!(a, state_digest(&s.with_waiting(true)).unwrap());
    }

    #[test]
    fn tampered_row_fails_digest_check() {
        let mut l = DecisionStateLedger::new_in_memory();
        let id = l.append(record(1), MonotonicTimeNs(1)).unwrap();
        l.rows_mut_for_test()[0].record.state = EngageState::empty(MonotonicTimeNs(2), false);
        assert!(matches!(
            l.get(id),
            Err(StorageError::DigestMismatch { .. })
        ));
    }
}
