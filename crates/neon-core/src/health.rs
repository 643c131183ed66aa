//! Component health shared by the agent and the master
//!
//! Each binary registers the components it runs (see [`components`]).
//! Work loops report every outcome with `record_success`/`record_failure`;
//! a failure streak of `UNHEALTHY_AFTER_FAILURES` turns a component
//! unhealthy. Standing conditions that are not failures of a unit of work,
//! such as a missing container runtime, are reported with `mark_degraded`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const UNHEALTHY_AFTER_FAILURES: u32 = 5;

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Degraded components still serve traffic
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    // agent
    pub const COLLECTOR: &str = "collector";
    pub const CONTAINER_RUNTIME: &str = "container_runtime";
    pub const TRANSPORT: &str = "transport";
    pub const BUFFER: &str = "buffer";
    // master
    pub const STORE: &str = "store";
    pub const RECONCILER: &str = "reconciler";
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.record_success(name).await;
    }

    /// Clear the failure streak and any degraded condition
    pub async fn record_success(&self, name: &str) {
        self.components.write().await.insert(
            name.to_string(),
            ComponentHealth::with(ComponentStatus::Healthy, None, 0),
        );
    }

    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let failures = components
            .get(name)
            .map_or(0, |h| h.consecutive_failures)
            .saturating_add(1);
        let status = if failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        components.insert(
            name.to_string(),
            ComponentHealth::with(status, Some(message.into()), failures),
        );
    }

    /// Degrade without counting a failure; an unhealthy component stays unhealthy
    pub async fn mark_degraded(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let failures = components.get(name).map_or(0, |h| h.consecutive_failures);
        let status = components
            .get(name)
            .map_or(ComponentStatus::Degraded, |h| h.status.max(ComponentStatus::Degraded));
        components.insert(
            name.to_string(),
            ComponentHealth::with(status, Some(message.into()), failures),
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Startup not complete".to_string()),
            };
        }

        let components = self.components.read().await;
        let mut unhealthy: Vec<&str> = components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        unhealthy.sort_unstable();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn agent_registry() -> HealthRegistry {
        let registry = HealthRegistry::new();
        for name in [
            components::COLLECTOR,
            components::CONTAINER_RUNTIME,
            components::TRANSPORT,
            components::BUFFER,
        ] {
            registry.register(name).await;
        }
        registry
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_transport_failure_streak() {
        let registry = agent_registry().await;

        for _ in 0..UNHEALTHY_AFTER_FAILURES - 1 {
            registry
                .record_failure(components::TRANSPORT, "connection refused")
                .await;
        }
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::TRANSPORT].consecutive_failures,
            UNHEALTHY_AFTER_FAILURES - 1
        );

        registry
            .record_failure(components::TRANSPORT, "connection refused")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.record_success(components::TRANSPORT).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components[components::TRANSPORT].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_missing_runtime_degrades_without_failures() {
        let registry = agent_registry().await;
        registry
            .mark_degraded(components::CONTAINER_RUNTIME, "Docker unavailable")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::CONTAINER_RUNTIME].consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn test_mark_degraded_keeps_unhealthy() {
        let registry = agent_registry().await;
        for _ in 0..UNHEALTHY_AFTER_FAILURES {
            registry.record_failure(components::BUFFER, "send failed").await;
        }
        registry
            .mark_degraded(components::BUFFER, "Buffer full, evicting oldest samples")
            .await;

        let buffer = &registry.health().await.components[components::BUFFER];
        assert_eq!(buffer.status, ComponentStatus::Unhealthy);
        assert_eq!(buffer.consecutive_failures, UNHEALTHY_AFTER_FAILURES);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register(components::STORE).await;
        registry.register(components::RECONCILER).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        for _ in 0..UNHEALTHY_AFTER_FAILURES {
            registry
                .record_failure(components::STORE, "Store unavailable")
                .await;
        }
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Unhealthy: store"));
    }
}
