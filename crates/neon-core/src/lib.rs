//! Core library for the Neon fleet monitor
//!
//! This crate provides the core functionality for:
//! - Host and container sampling on the agent
//! - Agent synchronization with the master (buffering, retry, token lifecycle)
//! - Agent authentication on the master
//! - Reconciliation of container snapshots into a service topology
//! - The master HTTP API
//! - Health checks and observability

pub mod api;
pub mod auth;
pub mod collector;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod shutdown;
pub mod store;
pub mod sync;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, MasterMetrics, StructuredLogger};
