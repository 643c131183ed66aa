//! Master-side topology reconciliation
//!
//! This module provides:
//! - Label parsing and the fold of a snapshot into service groups
//! - Status and version derivation per group
//! - Container lifecycle transition detection
//! - `ReconciliationEngine`, applying a snapshot to the store

pub mod labels;

mod derive;
mod engine;
mod grouping;
mod transitions;

#[cfg(test)]
pub(crate) mod tests;

pub use derive::{extract_version, service_status};
pub use engine::ReconciliationEngine;
pub use grouping::{group_containers, service_key, ServiceGroup};
pub use transitions::{activity_for, detect_transition, ENTITY_CONTAINER};
