//! Observability infrastructure for the agent and the master
//!
//! Provides:
//! - Prometheus metrics (buffer depth, send failures, cycle latency, sync
//!   latency, activities emitted)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static AGENT_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();
static MASTER_METRICS: OnceLock<MasterMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    cycle_latency_seconds: HistogramVec,
    buffered_samples: IntGauge,
    dropped_samples: IntCounter,
    send_failures: IntCounterVec,
    registrations: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram_vec!(
                "neon_agent_cycle_latency_seconds",
                "Time spent running one scheduler cycle",
                &["cycle"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            buffered_samples: register_int_gauge!(
                "neon_agent_buffered_samples",
                "Metric samples waiting in the local buffer"
            )
            .expect("Failed to register buffered_samples"),

            dropped_samples: register_int_counter!(
                "neon_agent_dropped_samples_total",
                "Metric samples discarded by buffer eviction or terminal send failures"
            )
            .expect("Failed to register dropped_samples"),

            send_failures: register_int_counter_vec!(
                "neon_agent_send_failures_total",
                "Failed calls to the master, by endpoint",
                &["endpoint"]
            )
            .expect("Failed to register send_failures"),

            registrations: register_int_counter!(
                "neon_agent_registrations_total",
                "Successful registrations with the master"
            )
            .expect("Failed to register registrations"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        AGENT_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        AGENT_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, cycle: &str, duration_secs: f64) {
        self.inner()
            .cycle_latency_seconds
            .with_label_values(&[cycle])
            .observe(duration_secs);
    }

    pub fn set_buffered_samples(&self, count: usize) {
        self.inner().buffered_samples.set(count as i64);
    }

    pub fn add_dropped_samples(&self, count: usize) {
        self.inner().dropped_samples.inc_by(count as u64);
    }

    pub fn inc_send_failures(&self, endpoint: &str) {
        self.inner()
            .send_failures
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn inc_registrations(&self) {
        self.inner().registrations.inc();
    }
}

struct MasterMetricsInner {
    sync_latency_seconds: Histogram,
    container_syncs: IntCounter,
    activities: IntCounterVec,
    registrations: IntCounter,
    samples_ingested: IntCounter,
}

impl MasterMetricsInner {
    fn new() -> Self {
        Self {
            sync_latency_seconds: register_histogram!(
                "neon_master_sync_latency_seconds",
                "Time spent reconciling one container report",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sync_latency_seconds"),

            container_syncs: register_int_counter!(
                "neon_master_container_syncs_total",
                "Container reports reconciled"
            )
            .expect("Failed to register container_syncs"),

            activities: register_int_counter_vec!(
                "neon_master_activities_total",
                "Lifecycle activities emitted, by event type",
                &["event_type"]
            )
            .expect("Failed to register activities"),

            registrations: register_int_counter!(
                "neon_master_registrations_total",
                "Agent registrations accepted"
            )
            .expect("Failed to register registrations"),

            samples_ingested: register_int_counter!(
                "neon_master_samples_ingested_total",
                "Metric samples stored"
            )
            .expect("Failed to register samples_ingested"),
        }
    }
}

/// Master metrics handle, sharing one global registry entry like `AgentMetrics`
#[derive(Clone)]
pub struct MasterMetrics {
    _private: (),
}

impl Default for MasterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterMetrics {
    pub fn new() -> Self {
        MASTER_METRICS.get_or_init(MasterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MasterMetricsInner {
        MASTER_METRICS.get_or_init(MasterMetricsInner::new)
    }

    pub fn observe_sync_latency(&self, duration_secs: f64) {
        self.inner().sync_latency_seconds.observe(duration_secs);
        self.inner().container_syncs.inc();
    }

    pub fn inc_activity(&self, event_type: &str) {
        self.inner()
            .activities
            .with_label_values(&[event_type])
            .inc();
    }

    pub fn inc_registrations(&self) {
        self.inner().registrations.inc();
    }

    pub fn add_samples_ingested(&self, count: usize) {
        self.inner().samples_ingested.inc_by(count as u64);
    }
}

/// Structured logger for lifecycle events
///
/// Provides consistent JSON-formatted logging for registration, sync and
/// process lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            "Neon process started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Neon process shutting down"
        );
    }

    pub fn log_registered(&self, server_id: i64) {
        info!(
            event = "agent_registered",
            node = %self.node_name,
            server_id = server_id,
            "Registered with master"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_sync(
        &self,
        server_id: i64,
        containers: usize,
        services: usize,
        dependencies: usize,
        restarts: usize,
        deleted_containers: usize,
        deleted_services: usize,
    ) {
        info!(
            event = "sync_completed",
            node = %self.node_name,
            server_id = server_id,
            containers = containers,
            services = services,
            dependencies = dependencies,
            restarts = restarts,
            deleted_containers = deleted_containers,
            deleted_services = deleted_services,
            "Container sync completed"
        );
    }

    /// Log the buffer state after a metrics cycle
    pub fn log_sync_status(&self, connected: bool, buffered_items: usize) {
        if connected {
            info!(
                event = "master_sync",
                node = %self.node_name,
                connected = true,
                buffered_items = buffered_items,
                "Synced with master"
            );
        } else {
            warn!(
                event = "master_sync",
                node = %self.node_name,
                connected = false,
                buffered_items = buffered_items,
                "Master unreachable, buffering locally"
            );
        }
    }
}
