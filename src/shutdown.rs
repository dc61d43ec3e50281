//! Graceful shutdown signaling, grounded in `order-watcher/src/shutdown.rs`:
//! SIGINT/SIGTERM on Unix, ctrl-c elsewhere, both driving a shared
//! [`CancellationToken`] that every pipeline observes at its suspension points.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns a task that waits for a shutdown signal and then cancels `token`.
/// Returns immediately; the signal wait happens in the background.
pub fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, cancelling pipelines");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
