//! Shutdown signal wiring.

use tokio::sync::watch;
use tracing::info;

/// Registers SIGINT and SIGTERM listeners that publish `true` on the returned
/// channel. Signals are registered before this returns, so a signal arriving
/// right after the call is never missed. Must be called from within a tokio
/// runtime.
#[cfg(unix)]
pub fn install() -> watch::Receiver<bool> {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::warn;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listeners = [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ];
    for (kind, name) in listeners {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(signal = name, error = %e, "Failed to register signal handler");
                continue;
            }
        };
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if stream.recv().await.is_some() {
                info!(signal = name, "Received shutdown signal, stopping the current run");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    shutdown_rx
}

/// Registers a Ctrl+C listener that publishes `true` on the returned channel.
#[cfg(not(unix))]
pub fn install() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping the current run");
            let _ = shutdown_tx.send(true);
        }
    });
    shutdown_rx
}
