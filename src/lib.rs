//! loadgate Library
//!
//! Exposes the proxy components for use in integration tests and as a
//! library.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{build_router, AppState};
pub use adapters::outbound::{InMemoryConfigStore, PostgresConfigStore, PostgresSettings};
pub use application::ProxyDispatcher;
pub use config::{config_path, load_config, Algorithm, Config, StoreType};
pub use domain::entities::{Backend, RateConfig};
pub use domain::ports::{ConfigStore, StoreError};
pub use domain::registry::BackendRegistry;
pub use domain::services::{SelectError, Strategy};
pub use infrastructure::{HealthCheckConfig, HealthChecker, ShutdownController, TokenBucket};
