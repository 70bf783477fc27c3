//! loadgate - HTTP reverse proxy with balancing and rate limiting
//!
//! This is the composition root that wires together all the components.

mod adapters;
mod application;
mod config;
mod domain;
mod infrastructure;

use crate::adapters::inbound::{self, AppState};
use crate::adapters::outbound::{InMemoryConfigStore, PostgresConfigStore, PostgresSettings};
use crate::application::ProxyDispatcher;
use crate::config::{config_path, load_config, Algorithm, StoreType};
use crate::domain::entities::RateConfig;
use crate::domain::ports::ConfigStore;
use crate::domain::registry::BackendRegistry;
use crate::domain::services::Strategy;
use crate::infrastructure::{
    shutdown_signal, HealthCheckConfig, HealthChecker, ShutdownController, TokenBucket,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging
    let log_level = if std::env::var("DEBUG").is_ok() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    // Load configuration
    let path = config_path();
    let cfg = load_config(&path)?;
    tracing::info!(config = %path.display(), port = cfg.port, "starting loadgate");

    // ===== COMPOSITION ROOT =====

    // 1. Backend pool and balancing strategy
    let registry = Arc::new(BackendRegistry::new(&cfg.backends)?);
    let strategy = Arc::new(match cfg.balancing.algorithm {
        Algorithm::RoundRobin => Strategy::round_robin(registry.clone()),
        Algorithm::LeastConnections => Strategy::least_connections(registry.clone()),
    });
    tracing::info!(
        backends = registry.len(),
        algorithm = ?cfg.balancing.algorithm,
        "backend pool ready"
    );

    let shutdown = ShutdownController::new();

    // 2. Active health checks
    let health_checker = HealthChecker::new(
        registry.clone(),
        HealthCheckConfig {
            interval: Duration::from_secs(cfg.health_check_interval_secs),
            ..Default::default()
        },
    );
    health_checker.start(&shutdown);

    // 3. Rate limiter with its config store (optional)
    let (limiter, store) = if cfg.rate_limiting.enabled {
        let default_config = RateConfig {
            capacity: cfg.rate_limiting.default.capacity,
            refill_rate: cfg.rate_limiting.default.rate,
        };

        let store: Arc<dyn ConfigStore> = match (cfg.rate_limiting.store, &cfg.rate_limiting.postgres)
        {
            (StoreType::Postgres, None) => {
                anyhow::bail!("rate_limiting.postgres settings required for type=postgres")
            }
            (StoreType::Postgres, Some(pg)) => {
                let settings = PostgresSettings {
                    host: pg.host.clone(),
                    port: pg.port,
                    user: pg.user.clone(),
                    password: pg.password.clone(),
                    dbname: pg.dbname.clone(),
                };
                tracing::info!(host = %pg.host, dbname = %pg.dbname, "using postgres config store");
                Arc::new(PostgresConfigStore::connect(&settings).await?)
            }
            (StoreType::Inmemory, _) => {
                tracing::info!("using in-memory config store");
                Arc::new(InMemoryConfigStore::new())
            }
        };

        let limiter = Arc::new(TokenBucket::new(store.clone(), default_config));
        limiter.start_refill(&shutdown);
        (Some(limiter), Some(store))
    } else {
        (None, None)
    };

    // 4. Dispatcher and HTTP surface
    let dispatcher = Arc::new(ProxyDispatcher::new(strategy));
    let state = AppState {
        registry,
        dispatcher,
        limiter: limiter.clone(),
        shutdown: shutdown.clone(),
    };
    let router = inbound::build_router(state, store);

    // 5. Serve until SIGINT/SIGTERM, then drain and tear down
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let drain_timeout = Duration::from_secs(cfg.shutdown_timeout_secs);
    inbound::run(cfg.port, router, shutdown, drain_timeout).await?;

    if let Some(limiter) = limiter {
        if let Err(e) = limiter.stop().await {
            tracing::error!(error = %e, "config store shutdown error");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
