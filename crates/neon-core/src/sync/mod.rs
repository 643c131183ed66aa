//! Agent synchronization with the master
//!
//! This module provides:
//! - Bounded drop-oldest buffer for samples the master has not accepted
//! - Explicit bearer token state
//! - HTTP transport with retry/backoff and re-registration on 401
//! - The scheduler driving the metrics, containers and heartbeat cycles

mod buffer;
mod client;
mod scheduler;
mod token;


pub use buffer::{BufferStats, ReportBuffer, DEFAULT_BUFFER_SIZE};
pub use client::{
    backoff_delay, ClientConfig, MasterClient, MasterClientBuilder, Transport, TransportError,
    AGENT_SECRET_HEADER, CONTAINERS_PATH, HEARTBEAT_PATH, METRICS_PATH, REGISTER_PATH,
};
pub use scheduler::{
    ContainersOutcome, HeartbeatOutcome, MetricsOutcome, Scheduler, SchedulerBuilder,
    SchedulerConfig, TOKEN_REFRESH_MARGIN_SECS,
};
pub use token::{HeldToken, TokenState};
