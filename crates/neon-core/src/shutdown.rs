//! Process shutdown signals

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Wait for SIGINT or SIGTERM and return which one arrived
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for SIGINT only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        reason = ctrl_c() => reason,
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            "SIGTERM received"
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received SIGINT");
            "SIGINT received"
        }
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending().await
        }
    }
}

/// Future resolving once the broadcast fires or its sender is dropped
pub async fn recv(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
}
