//! Neon Master - fleet ingestion service
//!
//! Authenticates agents, stores their metrics and reconciles their
//! container snapshots into a service topology.

use anyhow::{Context, Result};
use chrono::Duration;
use neon_core::{
    api::{self, AppState},
    auth::{RegistrationGuard, TokenService},
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    shutdown,
    store::MemoryStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const MASTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::MasterConfig::load()?;
    info!(bind_addr = %config.bind_addr, issuer = %config.token_issuer, "Master configured");

    let tokens = TokenService::new(
        config.jwt_secret.as_bytes(),
        &config.token_issuer,
        Duration::try_seconds(config.token_ttl_secs).context("token_ttl_secs out of range")?,
    )
    .context("Failed to initialize token service")?;

    let guard = RegistrationGuard::new(config.agent_secret.clone());
    if !guard.is_configured() {
        warn!("No agent secret configured, all registrations will be rejected");
    }

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::RECONCILER).await;

    let logger = StructuredLogger::new("neon-master");
    logger.log_startup(MASTER_VERSION);

    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(
        store.clone(),
        store,
        tokens,
        guard,
        health_registry.clone(),
    ));

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let server = tokio::spawn(api::serve(
        config.bind_addr,
        api::create_router(state),
        shutdown::recv(shutdown_rx),
    ));

    let reason = shutdown::wait_for_signal().await;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    server.await.context("API server task failed")??;
    info!("Shutdown complete");
    Ok(())
}
