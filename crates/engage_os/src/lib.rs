#![forbid(unsafe_code)]

pub mod aggregator;
pub mod cycle;
pub mod experiment;
pub mod explain_service;
pub mod robot;
pub mod tracker;
