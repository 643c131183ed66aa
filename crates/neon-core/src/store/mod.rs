//! Persistence contracts used by the master
//!
//! The reconciliation engine and the HTTP handlers only rely on
//! find/upsert/delete-by-set semantics. `MemoryStore` is the bundled
//! implementation.

mod memory;

pub use memory::MemoryStore;

use crate::models::{
    ActivityType, ContainerEvent, ContainerHealth, ContainerInfo, ContainerStatus,
    DependencyType, ServerInfo, ServerMetrics, ServiceStatus, ServiceType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: i64,
    pub name: String,
    pub info: ServerInfo,
    pub agent_version: String,
    pub status: ServerStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_metrics_at: Option<DateTime<Utc>>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

/// Identity of a service within one server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKey {
    Compose { project: String, service: String },
    /// A container without compose labels is its own service
    Standalone { container_id: String },
}

impl ServiceKey {
    pub fn compose_project(&self) -> Option<&str> {
        match self {
            ServiceKey::Compose { project, .. } => Some(project),
            ServiceKey::Standalone { .. } => None,
        }
    }

    pub fn compose_service(&self) -> Option<&str> {
        match self {
            ServiceKey::Compose { service, .. } => Some(service),
            ServiceKey::Standalone { .. } => None,
        }
    }
}

/// Fields rewritten on every sync
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAttributes {
    pub name: String,
    pub description: Option<String>,
    pub service_type: Option<ServiceType>,
    pub version: Option<String>,
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub id: i64,
    pub server_id: i64,
    pub key: ServiceKey,
    pub attributes: ServiceAttributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub id: i64,
    pub server_id: i64,
    pub container_id: String,
    pub service_id: Option<i64>,
    pub name: String,
    pub image: String,
    pub image_id: Option<String>,
    pub image_tags: Vec<String>,
    pub status: ContainerStatus,
    pub health: Option<ContainerHealth>,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ports: String,
    pub labels: HashMap<String, String>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewDependency {
    pub service_id: i64,
    pub depends_on_id: i64,
    pub dependency_type: DependencyType,
    pub inferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub id: i64,
    pub dependency: NewDependency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub entity_type: String,
    pub event_type: ContainerEvent,
    pub message: String,
    pub server_id: i64,
    /// Row id of the container record
    pub container_id: Option<i64>,
    pub service_id: Option<i64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub activity: NewActivity,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or refresh the server with this unique name and mark it online
    async fn upsert_server(
        &self,
        name: &str,
        info: &ServerInfo,
        agent_version: &str,
    ) -> Result<ServerRecord, StoreError>;

    async fn get_server(&self, server_id: i64) -> Result<Option<ServerRecord>, StoreError>;

    async fn mark_server_online(
        &self,
        server_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Append samples, skipping timestamps already stored; returns how many were inserted
    ///
    /// The server's current cpu/memory/disk fields are taken from the last sample.
    async fn insert_metrics(
        &self,
        server_id: i64,
        samples: &[ServerMetrics],
    ) -> Result<usize, StoreError>;

    async fn find_service(
        &self,
        server_id: i64,
        key: &ServiceKey,
    ) -> Result<Option<ServiceRecord>, StoreError>;

    async fn create_service(
        &self,
        server_id: i64,
        key: &ServiceKey,
        attributes: &ServiceAttributes,
    ) -> Result<ServiceRecord, StoreError>;

    async fn update_service(
        &self,
        service_id: i64,
        attributes: &ServiceAttributes,
    ) -> Result<ServiceRecord, StoreError>;

    async fn list_services(&self, server_id: i64) -> Result<Vec<ServiceRecord>, StoreError>;

    /// Delete the server's services not in `keep`, along with their dependency edges
    async fn delete_services_except(
        &self,
        server_id: i64,
        keep: &HashSet<i64>,
    ) -> Result<usize, StoreError>;

    async fn list_containers(&self, server_id: i64) -> Result<Vec<ContainerRecord>, StoreError>;

    async fn upsert_container(
        &self,
        server_id: i64,
        service_id: i64,
        container: &ContainerInfo,
    ) -> Result<ContainerRecord, StoreError>;

    /// Delete the server's containers whose container id is not in `keep`
    async fn delete_containers_except(
        &self,
        server_id: i64,
        keep: &HashSet<String>,
    ) -> Result<usize, StoreError>;

    /// Delete every dependency edge whose dependent service belongs to the server
    async fn delete_dependencies(&self, server_id: i64) -> Result<usize, StoreError>;

    async fn create_dependency(
        &self,
        dependency: NewDependency,
    ) -> Result<DependencyRecord, StoreError>;

    async fn list_dependencies(&self, server_id: i64)
        -> Result<Vec<DependencyRecord>, StoreError>;
}

/// Append-only sink for lifecycle events
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, activity: NewActivity) -> Result<ActivityRecord, StoreError>;
}
