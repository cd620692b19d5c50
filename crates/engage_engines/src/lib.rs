#![forbid(unsafe_code)]

pub mod decision;
pub mod discretize;
pub mod explain;
pub mod explainability;
pub mod language;
pub mod observation;
