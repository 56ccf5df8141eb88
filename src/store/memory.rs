// Copyright 2025 Cowboy AI, LLC.

//! In-memory saga store

use super::SagaInstanceStore;
use crate::errors::{SagaError, SagaResult};
use crate::identifiers::SagaKey;
use crate::instance::{SagaInstance, SagaStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Saga store backed by a map; for tests and single-process embedding
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    instances: Arc<RwLock<HashMap<SagaKey, SagaInstance>>>,
}

impl InMemorySagaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[async_trait]
impl SagaInstanceStore for InMemorySagaStore {
    async fn create(&self, instance: &SagaInstance) -> SagaResult<u64> {
        let key = instance.key();
        let mut instances = self.instances.write().await;
        if instances.contains_key(&key) {
            return Err(SagaError::DuplicateSagaId {
                saga_type: key.saga_type,
                saga_id: key.saga_id,
            });
        }

        let mut stored = instance.clone();
        stored.version = 1;
        instances.insert(key, stored);
        Ok(1)
    }

    async fn load(&self, key: &SagaKey) -> SagaResult<SagaInstance> {
        self.instances
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| SagaError::NotFound(key.to_string()))
    }

    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: u64,
    ) -> SagaResult<u64> {
        let key = instance.key();
        let mut instances = self.instances.write().await;
        let current = instances
            .get_mut(&key)
            .ok_or_else(|| SagaError::NotFound(key.to_string()))?;

        if current.version != expected_version {
            return Err(SagaError::VersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let version = expected_version + 1;
        *current = instance.clone();
        current.version = version;
        Ok(version)
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> SagaResult<Vec<SagaInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|instance| instance.is_overdue(now))
            .cloned()
            .collect())
    }

    async fn find_by_status(&self, statuses: &[SagaStatus]) -> SagaResult<Vec<SagaInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|instance| statuses.contains(&instance.status))
            .cloned()
            .collect())
    }
}
