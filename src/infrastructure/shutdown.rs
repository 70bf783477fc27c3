//! Graceful Shutdown
//!
//! Coordinates termination across the server, the health checker, and the
//! bucket refill task: one broadcast signal, an in-flight request counter,
//! and a bounded drain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// Shutdown coordinator shared by all long-running components.
#[derive(Clone)]
pub struct ShutdownController {
    initiated: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    signal_tx: broadcast::Sender<()>,
    drained: Arc<Notify>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (signal_tx, _) = broadcast::channel(1);
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            signal_tx,
            drained: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to the shutdown broadcast. Background tasks select on the
    /// returned receiver to stop between work items.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.signal_tx.subscribe()
    }

    /// Initiate shutdown. Idempotent; only the first call broadcasts.
    pub fn shutdown(&self) {
        if !self.initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.signal_tx.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Track one in-flight request; the guard decrements on drop.
    pub fn request_guard(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            controller: self.clone(),
        }
    }

    fn request_ended(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutdown() {
            self.drained.notify_waiters();
        }
    }

    /// Wait for in-flight requests to finish, bounded by `timeout`.
    /// Returns false if the deadline passed with requests still active.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        if self.in_flight() == 0 {
            return true;
        }

        tokio::select! {
            _ = self.drained.notified() => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    in_flight = self.in_flight(),
                    "drain deadline reached with requests still active"
                );
                false
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight request.
pub struct RequestGuard {
    controller: ShutdownController,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.controller.request_ended();
    }
}

/// Resolve when SIGINT or SIGTERM arrives, then trigger shutdown.
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    controller.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_controller_idle() {
        let controller = ShutdownController::new();
        assert!(!controller.is_shutdown());
        assert_eq!(controller.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let controller = ShutdownController::new();
        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_shutdown());
    }

    #[test]
    fn test_request_guard_tracks_in_flight() {
        let controller = ShutdownController::new();
        {
            let _a = controller.request_guard();
            let _b = controller.request_guard();
            assert_eq!(controller.in_flight(), 2);
        }
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_signal() {
        let controller = ShutdownController::new();
        let mut rx1 = controller.subscribe();
        let mut rx2 = controller.subscribe();

        controller.shutdown();

        tokio::time::timeout(Duration::from_millis(100), rx1.recv())
            .await
            .expect("rx1 missed signal")
            .unwrap();
        tokio::time::timeout(Duration::from_millis(100), rx2.recv())
            .await
            .expect("rx2 missed signal")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_immediate_when_idle() {
        let controller = ShutdownController::new();
        controller.shutdown();
        assert!(controller.wait_for_drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_guard_drop() {
        let controller = ShutdownController::new();
        let guard = controller.request_guard();
        controller.shutdown();

        let waiter = controller.clone();
        let handle =
            tokio::spawn(async move { waiter.wait_for_drain(Duration::from_millis(500)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_drain_times_out_with_active_request() {
        let controller = ShutdownController::new();
        let _guard = controller.request_guard();
        controller.shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
    }

    #[test]
    fn test_clones_share_state() {
        let controller = ShutdownController::new();
        let clone = controller.clone();

        let _guard = controller.request_guard();
        assert_eq!(clone.in_flight(), 1);

        clone.shutdown();
        assert!(controller.is_shutdown());
    }
}
