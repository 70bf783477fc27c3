//! Config Store Port
//!
//! Defines the interface for per-client rate-limit configuration storage.
//! Implementations may keep configs in process memory or in PostgreSQL.

use crate::domain::entities::RateConfig;
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Storage for per-client rate-limit configuration.
///
/// This is an outbound port: the rate limiter and the client-management
/// handlers call it without knowing where configs live. Absence of a
/// client is not an error; callers decide how to fall back.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the config for a client, or `None` when the client is unknown.
    async fn get(&self, client_id: &str) -> Result<Option<RateConfig>, StoreError>;

    /// Insert or replace the config for a client.
    async fn upsert(&self, client_id: &str, config: RateConfig) -> Result<(), StoreError>;

    /// Remove the config for a client. Deleting an unknown client succeeds.
    async fn delete(&self, client_id: &str) -> Result<(), StoreError>;

    /// Release any resources held by the store.
    async fn close(&self) -> Result<(), StoreError>;
}
