//! Host and container sampling
//!
//! This module provides the agent's view of the machine it runs on:
//! - `MetricSampler` produces static `ServerInfo` and periodic `ServerMetrics`
//! - `ContainerRuntime` is the capability seam over the container engine
//! - `collect_containers` turns runtime listings into wire `ContainerInfo`

mod containers;
mod docker;
mod system;


pub use containers::{collect_containers, format_ports, parse_started_at, short_id};
pub use docker::DockerRuntime;
pub use system::{pick_interface_counters, summarize_disks, DiskUsage, SystemSampler};

use crate::models::{ContainerHealth, ServerInfo, ServerMetrics};
use std::collections::HashMap;
use thiserror::Error;

pub use async_trait::async_trait;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("container runtime request failed: {0}")]
    Runtime(String),
    #[error("system sampling failed: {0}")]
    Sampling(String),
}

/// Container entry as listed by the runtime, before inspection
#[derive(Debug, Clone, Default)]
pub struct RuntimeContainer {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub image_id: Option<String>,
    pub state: String,
    pub ports: Vec<RuntimePort>,
    pub labels: HashMap<String, String>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimePort {
    pub private_port: u16,
    pub public_port: Option<u16>,
}

/// State details only available through an inspect call
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub started_at: Option<String>,
    pub exit_code: Option<i64>,
    pub health: Option<ContainerHealth>,
}

/// Host OS as seen by the container engine
#[derive(Debug, Clone)]
pub struct HostOsInfo {
    pub os_name: String,
    pub os_kernel: String,
    pub os_arch: String,
    pub docker_version: String,
}

/// Capability interface over the container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<(), CollectorError>;

    /// List all containers, including stopped ones
    async fn list_containers(&self) -> Result<Vec<RuntimeContainer>, CollectorError>;

    async fn inspect_container(&self, id: &str) -> Result<RuntimeState, CollectorError>;

    async fn image_tags(&self, image_id: &str) -> Result<Vec<String>, CollectorError>;

    async fn host_info(&self) -> Result<HostOsInfo, CollectorError>;
}

/// Source of host information and periodic samples
#[async_trait]
pub trait MetricSampler: Send + Sync {
    async fn server_info(&self, server_name: &str) -> Result<ServerInfo, CollectorError>;

    async fn sample(&self) -> Result<ServerMetrics, CollectorError>;
}
