//! Domain Entities - Core business objects
//!
//! These entities are shared by the balancing strategies, the health
//! checker, and the proxy dispatcher. Mutable per-backend fields use
//! atomics so readers never block writers.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// An upstream HTTP server that can receive proxied requests.
///
/// A backend is identified by its URL (scheme + authority). The liveness
/// flag is written by the health checker and the admin API; the connection
/// counter is maintained by the least-connections strategy.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    healthy: AtomicBool,
    active_connections: AtomicI64,
}

impl Backend {
    /// Create a backend from its URL. Backends start healthy with no
    /// active connections, matching their state at configuration time.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
            active_connections: AtomicI64::new(0),
        }
    }

    /// The backend's URL. Immutable after registration.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set the liveness flag, returning the previous value so callers can
    /// log boundary-crossing transitions.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Atomically claim one connection slot.
    pub fn acquire_connection(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Atomically release one connection slot.
    ///
    /// Returns false when the counter was already at zero, in which case
    /// nothing is decremented; a release without a matching acquire means
    /// the caller has an accounting bug.
    pub fn release_connection(&self) -> bool {
        let mut current = self.active_connections.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match self.active_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Rate-limit parameters for one client: bucket capacity and refill rate
/// in tokens per second. Immutable; updates replace the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    pub capacity: i64,
    pub refill_rate: f64,
}
