//! Periodic collection and reporting
//!
//! Three independent cycles share one loop:
//! - metrics: sample the host, send together with anything buffered
//! - containers: snapshot the container runtime and report the full list
//! - heartbeat: keep the registration alive and refresh the token early
//!
//! Every cycle first makes sure the agent is registered. A failure in one
//! cycle never stops the others.

use super::buffer::ReportBuffer;
use super::client::{Transport, TransportError};
use crate::collector::{collect_containers, ContainerRuntime, MetricSampler};
use crate::health::{components, HealthRegistry};
use crate::models::{ServerInfo, ServerMetrics, SyncSummary};
use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Re-register when the token has less than this much lifetime left
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub server_name: String,
    pub metrics_interval: Duration,
    pub containers_interval: Duration,
    pub heartbeat_interval: Duration,
    pub buffer_enabled: bool,
    pub buffer_max_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            metrics_interval: Duration::from_secs(300),
            containers_interval: Duration::from_secs(900),
            heartbeat_interval: Duration::from_secs(60),
            buffer_enabled: true,
            buffer_max_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsOutcome {
    /// Delivered, including previously buffered samples
    Sent { samples: usize },
    /// Kept locally for the next cycle
    Buffered { buffered: usize },
    /// Discarded: buffering disabled or the master refused the batch
    Dropped { samples: usize },
    SamplingFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainersOutcome {
    Synced(SyncSummary),
    /// No usable container runtime
    Disabled,
    CollectionFailed,
    NotRegistered,
    SendFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Alive { expires_in: u64 },
    /// The token was close to expiry and a new one was obtained
    Refreshed,
    Failed,
}

pub struct Scheduler {
    config: SchedulerConfig,
    sampler: Arc<dyn MetricSampler>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    transport: Arc<dyn Transport>,
    buffer: Mutex<ReportBuffer>,
    server_info: RwLock<Option<ServerInfo>>,
    containers_enabled: AtomicBool,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn containers_enabled(&self) -> bool {
        self.containers_enabled.load(Ordering::SeqCst)
    }

    pub async fn buffered_samples(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Probe the runtime, register, and run the first metrics and containers cycles
    pub async fn start(&self) {
        self.probe_runtime().await;

        if let Err(e) = self.register().await {
            warn!(error = %e, "Initial registration failed, will retry on the next cycle");
        }

        self.metrics_cycle().await;
        if self.containers_enabled() {
            self.containers_cycle().await;
        }

        if let Some(health) = &self.health {
            health.set_ready(true).await;
        }
    }

    /// Run until shutdown; an in-flight cycle always completes
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        self.start().await;

        let mut metrics_ticker = ticker(self.config.metrics_interval);
        let mut heartbeat_ticker = ticker(self.config.heartbeat_interval);
        let mut containers_ticker = self
            .containers_enabled()
            .then(|| ticker(self.config.containers_interval));

        info!(
            metrics_interval_secs = self.config.metrics_interval.as_secs(),
            containers_interval_secs = containers_ticker
                .as_ref()
                .map(|_| self.config.containers_interval.as_secs()),
            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
            "Scheduler running"
        );

        loop {
            tokio::select! {
                _ = metrics_ticker.tick() => {
                    self.metrics_cycle().await;
                }
                _ = next_tick(&mut containers_ticker) => {
                    self.containers_cycle().await;
                }
                _ = heartbeat_ticker.tick() => {
                    self.heartbeat_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
            }
        }
    }

    async fn probe_runtime(&self) {
        let Some(runtime) = &self.runtime else {
            self.containers_enabled.store(false, Ordering::SeqCst);
            return;
        };

        match runtime.ping().await {
            Ok(()) => {
                info!("Container runtime available");
                self.containers_enabled.store(true, Ordering::SeqCst);
                self.report_success(components::CONTAINER_RUNTIME).await;
            }
            Err(e) => {
                warn!(error = %e, "Container runtime unavailable, container sync disabled");
                self.containers_enabled.store(false, Ordering::SeqCst);
                if let Some(health) = &self.health {
                    health
                        .mark_degraded(components::CONTAINER_RUNTIME, e.to_string())
                        .await;
                }
            }
        }
    }

    /// Static host info, collected on first use and reused for every registration
    async fn server_info(&self) -> Result<ServerInfo> {
        if let Some(info) = self.server_info.read().await.as_ref() {
            return Ok(info.clone());
        }

        let info = self
            .sampler
            .server_info(&self.config.server_name)
            .await
            .context("Failed to collect server info")?;
        *self.server_info.write().await = Some(info.clone());
        Ok(info)
    }

    async fn register(&self) -> Result<i64> {
        let info = self.server_info().await?;
        let registration = self.transport.register(&info).await.map_err(|e| {
            self.metrics.inc_send_failures("register");
            e
        });

        match registration {
            Ok(registration) => {
                self.metrics.inc_registrations();
                self.logger.log_registered(registration.server_id);
                self.report_success(components::TRANSPORT).await;
                Ok(registration.server_id)
            }
            Err(e) => {
                self.report_failure(components::TRANSPORT, &e).await;
                Err(e).context("Registration with master failed")
            }
        }
    }

    /// Register if no token is held; false when the agent stays unregistered
    async fn ensure_registered(&self) -> bool {
        if self.transport.is_registered().await {
            return true;
        }

        match self.register().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Not registered with master");
                false
            }
        }
    }

    pub async fn metrics_cycle(&self) -> MetricsOutcome {
        let start = std::time::Instant::now();
        let outcome = self.run_metrics_cycle().await;
        self.metrics
            .observe_cycle_latency("metrics", start.elapsed().as_secs_f64());
        outcome
    }

    async fn run_metrics_cycle(&self) -> MetricsOutcome {
        let sample = match self.sampler.sample().await {
            Ok(sample) => {
                self.report_success(components::COLLECTOR).await;
                sample
            }
            Err(e) => {
                error!(error = %e, "Failed to sample host metrics");
                self.report_failure(components::COLLECTOR, &e).await;
                return MetricsOutcome::SamplingFailed;
            }
        };

        debug!(
            cpu_percent = sample.cpu_percent,
            memory_percent = sample.memory_percent,
            "Collected metrics"
        );

        if !self.ensure_registered().await {
            return self.keep_for_later(vec![sample]).await;
        }

        let mut batch = self.buffer.lock().await.flush();
        if !batch.is_empty() {
            info!(buffered = batch.len(), "Sending buffered samples with the new sample");
        }
        batch.push(sample);

        match self.transport.send_metrics(&batch).await {
            Ok(()) => {
                self.report_success(components::TRANSPORT).await;
                self.metrics.set_buffered_samples(0);
                self.logger.log_sync_status(true, 0);
                MetricsOutcome::Sent {
                    samples: batch.len(),
                }
            }
            Err(e) => {
                self.metrics.inc_send_failures("metrics");
                self.report_failure(components::TRANSPORT, &e).await;
                if e.is_transient() || matches!(e, TransportError::NotRegistered) {
                    self.keep_for_later(batch).await
                } else {
                    warn!(
                        error = %e,
                        samples = batch.len(),
                        "Master refused metrics, dropping batch"
                    );
                    self.metrics.add_dropped_samples(batch.len());
                    MetricsOutcome::Dropped {
                        samples: batch.len(),
                    }
                }
            }
        }
    }

    async fn keep_for_later(&self, samples: Vec<ServerMetrics>) -> MetricsOutcome {
        if !self.config.buffer_enabled {
            debug!(samples = samples.len(), "Buffering disabled, dropping samples");
            self.metrics.add_dropped_samples(samples.len());
            return MetricsOutcome::Dropped {
                samples: samples.len(),
            };
        }

        let (buffered, full) = {
            let mut buffer = self.buffer.lock().await;
            let evicted = buffer.add_all(samples);
            if evicted > 0 {
                self.metrics.add_dropped_samples(evicted);
            }
            (buffer.len(), buffer.len() >= buffer.capacity())
        };

        self.metrics.set_buffered_samples(buffered);
        self.logger.log_sync_status(false, buffered);
        if let Some(health) = &self.health {
            if full {
                health
                    .mark_degraded(components::BUFFER, "Buffer full, evicting oldest samples")
                    .await;
            } else {
                health.record_success(components::BUFFER).await;
            }
        }

        MetricsOutcome::Buffered { buffered }
    }

    pub async fn containers_cycle(&self) -> ContainersOutcome {
        let start = std::time::Instant::now();
        let outcome = self.run_containers_cycle().await;
        self.metrics
            .observe_cycle_latency("containers", start.elapsed().as_secs_f64());
        outcome
    }

    async fn run_containers_cycle(&self) -> ContainersOutcome {
        let runtime = match &self.runtime {
            Some(runtime) if self.containers_enabled() => runtime,
            _ => return ContainersOutcome::Disabled,
        };

        let containers = match collect_containers(runtime.as_ref()).await {
            Ok(containers) => {
                self.report_success(components::CONTAINER_RUNTIME).await;
                containers
            }
            Err(e) => {
                error!(error = %e, "Failed to collect containers");
                self.report_failure(components::CONTAINER_RUNTIME, &e).await;
                return ContainersOutcome::CollectionFailed;
            }
        };
        debug!(containers = containers.len(), "Collected containers");

        if !self.ensure_registered().await {
            return ContainersOutcome::NotRegistered;
        }

        match self.transport.send_containers(&containers).await {
            Ok(summary) => {
                self.report_success(components::TRANSPORT).await;
                info!(
                    containers = summary.containers,
                    services = summary.services,
                    restarts = summary.restarts,
                    deleted_containers = summary.deleted_containers,
                    "Container report accepted"
                );
                ContainersOutcome::Synced(summary)
            }
            Err(e) => {
                self.metrics.inc_send_failures("containers");
                self.report_failure(components::TRANSPORT, &e).await;
                warn!(error = %e, "Failed to send containers");
                ContainersOutcome::SendFailed
            }
        }
    }

    pub async fn heartbeat_cycle(&self) -> HeartbeatOutcome {
        if !self.ensure_registered().await {
            return HeartbeatOutcome::Failed;
        }

        let expires_in = match self.transport.heartbeat().await {
            Ok(expires_in) => expires_in,
            Err(e) => {
                self.metrics.inc_send_failures("heartbeat");
                self.report_failure(components::TRANSPORT, &e).await;
                warn!(error = %e, "Heartbeat failed");
                return HeartbeatOutcome::Failed;
            }
        };
        self.report_success(components::TRANSPORT).await;

        let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if !self
            .transport
            .token_state()
            .await
            .expires_within(margin, chrono::Utc::now())
        {
            debug!(token_expires_in = expires_in, "Heartbeat acknowledged");
            return HeartbeatOutcome::Alive { expires_in };
        }

        info!(token_expires_in = expires_in, "Token expiring soon, re-registering");
        self.transport.clear_registration().await;
        match self.register().await {
            Ok(_) => HeartbeatOutcome::Refreshed,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Token refresh failed");
                HeartbeatOutcome::Failed
            }
        }
    }

    async fn report_success(&self, component: &str) {
        if let Some(health) = &self.health {
            health.record_success(component).await;
        }
    }

    async fn report_failure(&self, component: &str, error: &(dyn std::fmt::Display + Sync)) {
        if let Some(health) = &self.health {
            health.record_failure(component, error.to_string()).await;
        }
    }
}

/// Interval whose first tick fires one period from now
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Builder for Scheduler
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    sampler: Option<Arc<dyn MetricSampler>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    transport: Option<Arc<dyn Transport>>,
    health: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            sampler: None,
            runtime: None,
            transport: None,
            health: None,
        }
    }

    pub fn sampler(mut self, sampler: Arc<dyn MetricSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let sampler = self
            .sampler
            .ok_or_else(|| anyhow::anyhow!("sampler is required"))?;
        let transport = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("transport is required"))?;
        for (name, period) in [
            ("metrics_interval", self.config.metrics_interval),
            ("containers_interval", self.config.containers_interval),
            ("heartbeat_interval", self.config.heartbeat_interval),
        ] {
            if period < Duration::from_secs(1) {
                anyhow::bail!("{name} must be at least one second");
            }
        }

        Ok(Scheduler {
            buffer: Mutex::new(ReportBuffer::new(self.config.buffer_max_size)),
            logger: StructuredLogger::new(self.config.server_name.clone()),
            containers_enabled: AtomicBool::new(self.runtime.is_some()),
            config: self.config,
            sampler,
            runtime: self.runtime,
            transport,
            server_info: RwLock::new(None),
            health: self.health,
            metrics: AgentMetrics::new(),
        })
    }
}
