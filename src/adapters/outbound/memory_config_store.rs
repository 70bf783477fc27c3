//! In-Memory Config Store
//!
//! Process-local implementation of the config store port. Suitable for
//! single-instance deployments and tests.

use crate::domain::entities::RateConfig;
use crate::domain::ports::{ConfigStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Config store backed by a reader-writer-locked map.
#[derive(Default)]
pub struct InMemoryConfigStore {
    clients: RwLock<HashMap<String, RateConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored client configs.
    pub fn len(&self) -> usize {
        self.clients.read().expect("config store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, client_id: &str) -> Result<Option<RateConfig>, StoreError> {
        let clients = self.clients.read().expect("config store lock poisoned");
        Ok(clients.get(client_id).copied())
    }

    async fn upsert(&self, client_id: &str, config: RateConfig) -> Result<(), StoreError> {
        let mut clients = self.clients.write().expect("config store lock poisoned");
        clients.insert(client_id.to_string(), config);
        Ok(())
    }

    async fn delete(&self, client_id: &str) -> Result<(), StoreError> {
        let mut clients = self.clients.write().expect("config store lock poisoned");
        clients.remove(client_id);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
