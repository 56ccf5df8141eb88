// Copyright 2025 Cowboy AI, LLC.

//! NATS JetStream key/value saga store
//!
//! One KV entry per instance under `{saga_type}.{saga_id}`. Uniqueness uses
//! `create`, and compare-and-swap uses `update` guarded by the KV revision
//! of the entry the version check was made against.

use super::SagaInstanceStore;
use crate::config::KvStoreConfig;
use crate::errors::{SagaError, SagaResult};
use crate::identifiers::SagaKey;
use crate::instance::{SagaInstance, SagaStatus};
use crate::registry::SagaDefinitionRegistry;
use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fmt::Write as _;
use tracing::{debug, info};

/// Encode one key segment into the KV key alphabet
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte becomes
/// `=XX` so distinct segments never collide.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "={byte:02X}");
        }
    }
    encoded
}

/// KV key of a saga instance
pub fn encode_key(key: &SagaKey) -> String {
    format!(
        "{}.{}",
        encode_segment(&key.saga_type),
        encode_segment(&key.saga_id)
    )
}

fn storage(context: &str, err: impl std::fmt::Display) -> SagaError {
    SagaError::Storage(format!("{context}: {err}"))
}

/// Saga store backed by a JetStream KV bucket
#[derive(Clone)]
pub struct NatsKvSagaStore {
    kv: kv::Store,
    config: KvStoreConfig,
}

impl std::fmt::Debug for NatsKvSagaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsKvSagaStore")
            .field("bucket", &self.config.bucket_name)
            .finish()
    }
}

impl NatsKvSagaStore {
    /// Open the bucket, creating it if needed
    pub async fn new(client: Client, config: KvStoreConfig) -> SagaResult<Self> {
        let js = jetstream::new(client);

        let kv = match js.get_key_value(&config.bucket_name).await {
            Ok(kv) => kv,
            Err(_) => {
                let kv_config = kv::Config {
                    bucket: config.bucket_name.clone(),
                    history: config.history,
                    max_age: if config.ttl_seconds > 0 {
                        std::time::Duration::from_secs(config.ttl_seconds)
                    } else {
                        std::time::Duration::ZERO
                    },
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                };
                js.create_key_value(kv_config)
                    .await
                    .map_err(|e| storage("Failed to create KV bucket", e))?
            }
        };

        info!(bucket = %config.bucket_name, "Saga KV store ready");
        Ok(Self { kv, config })
    }

    /// Check that the bucket TTL cannot expire an instance of `registry`
    pub fn check_retention(&self, registry: &SagaDefinitionRegistry) -> SagaResult<()> {
        self.config.check_retention(registry)
    }

    /// Bucket configuration
    pub fn config(&self) -> &KvStoreConfig {
        &self.config
    }

    async fn entry(&self, key: &SagaKey) -> SagaResult<Option<kv::Entry>> {
        let entry = self
            .kv
            .entry(encode_key(key))
            .await
            .map_err(|e| storage("Failed to read saga entry", e))?;
        Ok(entry.filter(|e| e.operation == kv::Operation::Put))
    }

    fn decode(entry: &kv::Entry) -> SagaResult<SagaInstance> {
        Ok(serde_json::from_slice(&entry.value)?)
    }

    fn encode(instance: &SagaInstance, version: u64) -> SagaResult<Bytes> {
        let mut stored = instance.clone();
        stored.version = version;
        Ok(Bytes::from(serde_json::to_vec(&stored)?))
    }

    async fn scan<F>(&self, mut keep: F) -> SagaResult<Vec<SagaInstance>>
    where
        F: FnMut(&SagaInstance) -> bool + Send,
    {
        let mut keys = self
            .kv
            .keys()
            .await
            .map_err(|e| storage("Failed to list saga keys", e))?;

        let mut found = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| storage("Failed to list saga keys", e))?;
            let entry = self
                .kv
                .entry(key.as_str())
                .await
                .map_err(|e| storage("Failed to read saga entry", e))?;
            let Some(entry) = entry.filter(|e| e.operation == kv::Operation::Put) else {
                continue;
            };
            let instance = Self::decode(&entry)?;
            if keep(&instance) {
                found.push(instance);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl SagaInstanceStore for NatsKvSagaStore {
    async fn create(&self, instance: &SagaInstance) -> SagaResult<u64> {
        let key = instance.key();
        let value = Self::encode(instance, 1)?;

        match self.kv.create(encode_key(&key), value).await {
            Ok(revision) => {
                debug!(saga_key = %key, revision, "Created saga entry");
                Ok(1)
            }
            Err(err) if err.kind() == kv::CreateErrorKind::AlreadyExists => {
                Err(SagaError::DuplicateSagaId {
                    saga_type: key.saga_type,
                    saga_id: key.saga_id,
                })
            }
            Err(err) => Err(storage("Failed to create saga entry", err)),
        }
    }

    async fn load(&self, key: &SagaKey) -> SagaResult<SagaInstance> {
        let entry = self
            .entry(key)
            .await?
            .ok_or_else(|| SagaError::NotFound(key.to_string()))?;
        Self::decode(&entry)
    }

    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: u64,
    ) -> SagaResult<u64> {
        let key = instance.key();
        let entry = self
            .entry(&key)
            .await?
            .ok_or_else(|| SagaError::NotFound(key.to_string()))?;

        let current = Self::decode(&entry)?;
        if current.version != expected_version {
            return Err(SagaError::VersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let version = expected_version + 1;
        let value = Self::encode(instance, version)?;
        match self.kv.update(encode_key(&key), value, entry.revision).await {
            Ok(_) => Ok(version),
            Err(err) if err.kind() == kv::UpdateErrorKind::WrongLastRevision => {
                // Another writer slipped in between the read and the update
                let actual = self
                    .load(&key)
                    .await
                    .map(|i| i.version)
                    .unwrap_or(version);
                Err(SagaError::VersionConflict {
                    expected: expected_version,
                    actual,
                })
            }
            Err(err) => Err(storage("Failed to update saga entry", err)),
        }
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> SagaResult<Vec<SagaInstance>> {
        self.scan(|instance| instance.is_overdue(now)).await
    }

    async fn find_by_status(&self, statuses: &[SagaStatus]) -> SagaResult<Vec<SagaInstance>> {
        self.scan(|instance| statuses.contains(&instance.status)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("citizenship-application", "APP-2026-001", "citizenship-application.APP-2026-001" ; "plain")]
    #[test_case("order", "a.b", "order.a=2Eb" ; "dot in id")]
    #[test_case("order", "x y/z", "order.x=20y=2Fz" ; "space and slash")]
    #[test_case("t", "a=b", "t.a=3Db" ; "escape char")]
    fn test_encode_key(saga_type: &str, saga_id: &str, expected: &str) {
        assert_eq!(encode_key(&SagaKey::new(saga_type, saga_id)), expected);
    }

    #[test]
    fn test_encoding_is_injective_across_separator() {
        let a = encode_key(&SagaKey::new("a.b", "c"));
        let b = encode_key(&SagaKey::new("a", "b.c"));
        assert_ne!(a, b);
    }
}
