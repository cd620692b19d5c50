#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use engage_kernel_contracts::decision::{Action, Decision, DecisionStateRecord};
use engage_kernel_contracts::person::{PersonFeatures, PersonId};
use engage_kernel_contracts::state::EngageState;
use engage_kernel_contracts::MonotonicTimeNs;
use engage_storage::ledger::{DecisionStateId, DecisionStateLedger, StorageError};
use engage_storage::repo::DecisionStateRepo;

fn person(id: &str) -> PersonId {
    PersonId::new(id).unwrap()
}

fn targeted_record(ts: u64, target: &str) -> DecisionStateRecord {
    let mut persons = BTreeMap::new();
    persons.insert(
        person(target),
        PersonFeatures {
            engagement_value: Some(0.8),
            ..PersonFeatures::default()
        },
    );
    let state = EngageState::v1(MonotonicTimeNs(ts), persons, None, false).unwrap();
    DecisionStateRecord::v1(
        state,
        Decision::v1(Action::ElicitTarget, Some(person(target))).unwrap(),
    )
    .unwrap()
}

#[test]
fn at_ds_db_01_rows_are_retrievable_by_id_and_latest() {
    let mut s = DecisionStateLedger::new_in_memory();
    let first = s
        .append_decision_state_row(targeted_record(10, "A"), MonotonicTimeNs(11))
        .unwrap();
    let second = s
        .append_decision_state_row(targeted_record(20, "B"), MonotonicTimeNs(21))
        .unwrap();

    assert!(first < second);
    let row = s.decision_state_row(first).unwrap();
    assert_eq!(row.record.decision.target(), Some(&person("A")));
    assert_eq!(row.stored_at, MonotonicTimeNs(11));
    assert_eq!(
        s.latest_decision_state_row().map(|r| r.id),
        Some(second)
    );
    assert_eq!(s.decision_state_rows().len(), 2);
    assert_eq!(
        row.record.message().timestamp,
        MonotonicTimeNs(10)
    );
}

#[test]
fn at_ds_db_02_unknown_id_is_not_found() {
    let s = DecisionStateLedger::new_in_memory();
    assert!(matches!(
        s.decision_state_row(DecisionStateId(99)),
        Err(StorageError::NotFound { .. })
    ));
    assert!(s.latest_decision_state_row().is_none());
}

#[test]
fn at_ds_db_03_later_appends_leave_earlier_rows_untouched() {
    let mut s = DecisionStateLedger::new_in_memory();
    let id = s
        .append_decision_state_row(targeted_record(10, "A"), MonotonicTimeNs(10))
        .unwrap();
    let before = s.decision_state_row(id).unwrap().clone();
    s.append_decision_state_row(targeted_record(20, "A"), MonotonicTimeNs(20))
        .unwrap();
    assert_eq!(s.decision_state_row(id).unwrap(), &before);
    assert_eq!(s.len(), 2);
}

#[test]
fn at_ds_db_04_pruning_keeps_newest_rows_and_monotonic_ids() {
    let mut s = DecisionStateLedger::with_max_rows(2);
    let ids: Vec<DecisionStateId> = (1..=3)
        .map(|i| {
            s.append_decision_state_row(targeted_record(i, "A"), MonotonicTimeNs(i))
                .unwrap()
        })
        .collect();
    assert_eq!(s.len(), 2);
    assert!(matches!(
        s.decision_state_row(ids[0]),
        Err(StorageError::NotFound { .. })
    ));
    assert!(s.decision_state_row(ids[2]).is_ok());
    assert_eq!(ids[2], DecisionStateId(3));
}
