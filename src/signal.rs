//! Signal handling for graceful shutdown.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (Ok(mut sigint), Ok(mut sigterm), Ok(mut sigquit)) = handlers else {
        warn!("Failed to install Unix signal handlers, falling back to Ctrl-C");
        ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = sigint.recv() => info!(message = "Signal received.", signal = "SIGINT"),
        _ = sigterm.recv() => info!(message = "Signal received.", signal = "SIGTERM"),
        _ = sigquit.recv() => info!(message = "Signal received.", signal = "SIGQUIT"),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "Ctrl-C"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `shutdown` once a termination signal arrives.
pub fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });
}
