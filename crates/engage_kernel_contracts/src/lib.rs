#![forbid(unsafe_code)]

pub mod common;
pub mod decision;
pub mod explain;
pub mod person;
pub mod state;

pub use common::{
    validate_non_negative, validate_unit_interval, ContractViolation, MonotonicTimeNs,
    ReasonCodeId, SchemaVersion, Validate,
};
