//! Neon Agent - host and container reporter
//!
//! Runs on each monitored host, sampling system metrics and the container
//! inventory and reporting both to the master.

use anyhow::{Context, Result};
use neon_core::{
    collector::{ContainerRuntime, DockerRuntime, SystemSampler},
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    shutdown,
    sync::{MasterClientBuilder, SchedulerBuilder},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::load()?;
    info!(
        server_name = %config.server_name,
        master_url = %config.master_url,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    for component in [
        components::COLLECTOR,
        components::CONTAINER_RUNTIME,
        components::TRANSPORT,
        components::BUFFER,
    ] {
        health_registry.register(component).await;
    }

    let logger = StructuredLogger::new(&config.server_name);
    logger.log_startup(AGENT_VERSION);

    let runtime: Option<Arc<dyn ContainerRuntime>> = match DockerRuntime::connect() {
        Ok(docker) => Some(Arc::new(docker)),
        Err(e) => {
            warn!(error = %e, "Docker unavailable, container reporting disabled");
            None
        }
    };

    let mut sampler = SystemSampler::new();
    if let Some(runtime) = &runtime {
        sampler = sampler.with_runtime(runtime.clone());
    }

    let client = MasterClientBuilder::new()
        .master_url(&config.master_url)
        .server_name(&config.server_name)
        .agent_secret(&config.agent_secret)
        .agent_version(AGENT_VERSION)
        .retry_attempts(config.retry_attempts)
        .retry_delay(config.retry_delay())
        .request_timeout(config.request_timeout())
        .build()
        .context("Failed to build master client")?;

    let mut builder = SchedulerBuilder::new(config.scheduler_config())
        .sampler(Arc::new(sampler))
        .transport(Arc::new(client))
        .health(health_registry.clone());
    if let Some(runtime) = runtime {
        builder = builder.runtime(runtime);
    }
    let scheduler = Arc::new(builder.build().context("Invalid scheduler configuration")?);

    let (shutdown_tx, _) = broadcast::channel(1);

    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let reason = shutdown::wait_for_signal().await;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
