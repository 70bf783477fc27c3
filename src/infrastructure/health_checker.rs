//! Active Health Checker
//!
//! Periodically probes every registered backend over HTTP and updates its
//! liveness flag in the registry. Probes within a sweep run concurrently;
//! a sweep settles completely before the next one can be scheduled, so a
//! slow pool never accumulates overlapping sweeps.

use crate::domain::entities::Backend;
use crate::domain::registry::BackendRegistry;
use crate::infrastructure::shutdown::ShutdownController;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between sweeps
    pub interval: Duration,
    /// Timeout for each probe
    pub timeout: Duration,
    /// Probe path appended to the backend URL
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(3),
            path: "/health".to_string(),
        }
    }
}

/// Active health checker for the backend pool.
#[derive(Clone)]
pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(registry: Arc<BackendRegistry>, config: HealthCheckConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build health check client");
        Self {
            registry,
            config,
            client,
        }
    }

    /// Start the periodic check loop. The loop stops between sweeps when
    /// the shutdown signal fires; probes in the running sweep complete
    /// under their own timeout.
    pub fn start(&self, shutdown: &ShutdownController) {
        let checker = self.clone();
        let mut signal = shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(checker.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => checker.sweep().await,
                    _ = signal.recv() => {
                        tracing::info!("health checks stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Probe every backend once, concurrently, and settle before returning.
    pub async fn sweep(&self) {
        let probes = self
            .registry
            .all()
            .iter()
            .map(|backend| self.probe_and_mark(backend));
        join_all(probes).await;
    }

    async fn probe_and_mark(&self, backend: &Arc<Backend>) {
        let alive = self.probe(backend).await;
        let was = backend.set_healthy(alive);
        if was != alive {
            if alive {
                tracing::info!(backend = %backend.url(), "backend is now healthy");
            } else {
                tracing::warn!(backend = %backend.url(), "backend is now unhealthy");
            }
        }
    }

    /// One probe: `GET {backend}/health`, success iff a 2xx response
    /// arrives within the timeout.
    async fn probe(&self, backend: &Backend) -> bool {
        let Ok(url) = backend.url().join(&self.config.path) else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
