//! Infrastructure Layer
//!
//! Cross-cutting concerns: active health checks, rate limiting, shutdown.

pub mod health_checker;
pub mod rate_limiter;
pub mod shutdown;

pub use health_checker::{HealthCheckConfig, HealthChecker};
pub use rate_limiter::TokenBucket;
pub use shutdown::{shutdown_signal, RequestGuard, ShutdownController};
