//! Runtime glue that wires configs, completion signals, failure reporting,
//! and telemetry.

pub mod config;
pub mod failures;
pub mod signal;
pub mod telemetry;
