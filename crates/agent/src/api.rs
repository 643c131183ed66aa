//! HTTP API for health checks and Prometheus metrics

use neon_core::{api::health_router, health::HealthRegistry, shutdown};
use std::net::SocketAddr;
use tokio::sync::broadcast;

/// Start the local API server
pub async fn serve(
    port: u16,
    health_registry: HealthRegistry,
    shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    neon_core::api::serve(addr, health_router(health_registry), shutdown::recv(shutdown_rx)).await
}
