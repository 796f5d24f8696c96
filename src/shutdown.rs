//! Graceful shutdown
//!
//! Waits for SIGTERM/SIGINT and fans the signal out to the HTTP server and the
//! deposit monitor through a broadcast channel.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self { shutdown_tx }
    }

    /// Get a receiver for shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast shutdown without waiting for a signal.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("[SHUTDOWN] no subscribers left");
        }
    }

    /// Block until CTRL+C or SIGTERM, then broadcast.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("[SHUTDOWN] CTRL+C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    warn!("[SHUTDOWN] SIGTERM handler unavailable: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("[SHUTDOWN] Received CTRL+C"),
            _ = terminate => info!("[SHUTDOWN] Received SIGTERM"),
        }
        self.trigger();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once shutdown is broadcast (or the sender is gone).
pub async fn recv_shutdown(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut a = coordinator.subscribe();
        let b = coordinator.subscribe();
        assert!(a.try_recv().is_err());

        coordinator.trigger();
        assert!(a.recv().await.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(1), recv_shutdown(b))
            .await
            .unwrap();
    }
}
