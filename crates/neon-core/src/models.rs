//! Wire models shared between the agent and the master

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Static host information, collected once per agent process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub hostname: String,
    pub cpu_cores: u32,
    pub total_memory_gb: f64,
    pub total_disk_gb: f64,
    pub os_name: String,
    pub os_version: String,
    pub os_kernel: String,
    pub os_arch: String,
    pub docker_version: Option<String>,
}

/// One periodic host sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Deserializes leniently: any state other than the four below reads as exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Exited,
    Paused,
    Restarting,
}

impl ContainerStatus {
    /// Map a runtime state string; anything unrecognised is treated as exited
    pub fn from_runtime_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            _ => ContainerStatus::Exited,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
    Healthy,
    Unhealthy,
    Starting,
}

impl ContainerHealth {
    pub fn from_runtime_health(health: &str) -> Option<Self> {
        match health.to_ascii_lowercase().as_str() {
            "healthy" => Some(ContainerHealth::Healthy),
            "unhealthy" => Some(ContainerHealth::Unhealthy),
            "starting" => Some(ContainerHealth::Starting),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ContainerStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = String::deserialize(deserializer)?;
        Ok(ContainerStatus::from_runtime_state(&state))
    }
}

/// Unknown health values (`none`, empty, anything new) read as unset
fn lenient_health<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<ContainerHealth>, D::Error> {
    let health = Option::<String>::deserialize(deserializer)?;
    Ok(health.as_deref().and_then(ContainerHealth::from_runtime_health))
}

/// Container snapshot as reported by an agent
///
/// The full list is re-sent every containers cycle; it is never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub container_id: String,
    pub name: String,
    pub image: String,
    pub image_id: Option<String>,
    #[serde(default)]
    pub image_tags: Vec<String>,
    pub status: ContainerStatus,
    #[serde(default, deserialize_with = "lenient_health")]
    pub health: Option<ContainerHealth>,
    pub ports: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub networks: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
}

impl ContainerInfo {
    /// Label value, treating empty strings as absent
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Response envelope shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub server_name: String,
    pub server_info: ServerInfo,
    pub agent_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub server_id: i64,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub timestamp: DateTime<Utc>,
    pub agent_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub server_time: DateTime<Utc>,
    /// Seconds until the bearer token expires
    pub token_expires_in: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsReport {
    #[serde(default)]
    pub metrics: Vec<ServerMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersReport {
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Application,
    Database,
    Website,
    Agent,
    Infrastructure,
}

impl ServiceType {
    /// Case-insensitive parse; unknown values yield None
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "application" => Some(ServiceType::Application),
            "database" => Some(ServiceType::Database),
            "website" => Some(ServiceType::Website),
            "agent" => Some(ServiceType::Agent),
            "infrastructure" => Some(ServiceType::Infrastructure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Requires,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Info,
    Warning,
}

/// Container lifecycle transition detected between two syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerEvent {
    Stopped,
    Crashed,
    Restart,
    ManualRestart,
}

impl ContainerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerEvent::Stopped => "stopped",
            ContainerEvent::Crashed => "crashed",
            ContainerEvent::Restart => "restart",
            ContainerEvent::ManualRestart => "manual_restart",
        }
    }

    pub fn activity_type(&self) -> ActivityType {
        match self {
            ContainerEvent::Stopped | ContainerEvent::ManualRestart => ActivityType::Info,
            ContainerEvent::Crashed | ContainerEvent::Restart => ActivityType::Warning,
        }
    }
}

/// Outcome of one container reconciliation, returned to the reporting agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub containers: usize,
    pub services: usize,
    pub dependencies: usize,
    pub restarts: usize,
    pub deleted_containers: usize,
    pub deleted_services: usize,
}

/// Round to two decimals, the precision used on the wire for percent and GB values
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
