// Copyright 2025 Cowboy AI, LLC.

//! Engine configuration
//!
//! Every section has working defaults; a JSON document only needs to name
//! the values it overrides.

use crate::errors::{SagaError, SagaResult};
use crate::nats::NatsConfig;
use crate::registry::SagaDefinitionRegistry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Backoff used when a compare-and-swap loses a race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries
    pub max_retries: u32,

    /// Initial backoff in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Maximum backoff in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff_ms: 5,
            backoff_multiplier: 2.0,
            max_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, used by tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(attempt as i32 - 1);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Timeout supervisor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How often the supervisor scans for overdue sagas
    pub scan_interval_ms: u64,
    /// Also begin compensation for failed sagas nobody rolled back
    pub recover_stranded: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1_000,
            recover_stranded: true,
        }
    }
}

impl SupervisorConfig {
    /// Scan interval as a duration
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

/// JetStream key/value bucket used by the NATS store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvStoreConfig {
    /// KV bucket name
    pub bucket_name: String,
    /// History depth for KV entries
    pub history: i64,
    /// Bucket `max_age` in seconds (0 = no expiry)
    ///
    /// Expiry counts from an entry's last write, so a saga that waits longer
    /// than this between writes disappears mid-flight. Use
    /// [`KvStoreConfig::check_retention`] before serving a registry.
    pub ttl_seconds: u64,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            bucket_name: "saga_instances".to_string(),
            history: 5,
            ttl_seconds: 0,
        }
    }
}

impl KvStoreConfig {
    /// Reject a TTL that could expire an instance of any registered saga
    ///
    /// A saga may run until its saga timeout and then compensate every step
    /// with its full retry budget; the TTL must outlast both.
    pub fn check_retention(&self, registry: &SagaDefinitionRegistry) -> SagaResult<()> {
        if self.ttl_seconds == 0 {
            return Ok(());
        }
        let ttl_ms = self.ttl_seconds.saturating_mul(1_000);

        for saga_type in registry.saga_types() {
            let Some(definition) = registry.lookup(&saga_type) else {
                continue;
            };
            let Some(saga_timeout_ms) = definition.saga_timeout_ms else {
                return Err(SagaError::Configuration(format!(
                    "saga type {saga_type} has no saga timeout but the store expires entries after {}s",
                    self.ttl_seconds
                )));
            };
            let attempts = u64::from(definition.max_retries) + 1;
            let rollback_ms = (0..definition.steps.len())
                .map(|i| {
                    let step_ms = definition.step_timeout(i).num_milliseconds().max(0) as u64;
                    step_ms.saturating_mul(attempts)
                })
                .fold(0u64, u64::saturating_add);
            let needed_ms = saga_timeout_ms.saturating_add(rollback_ms);
            if ttl_ms <= needed_ms {
                return Err(SagaError::Configuration(format!(
                    "store TTL of {}s is shorter than the {needed_ms} ms saga type {saga_type} may need",
                    self.ttl_seconds
                )));
            }
        }
        Ok(())
    }
}

/// Subjects used by the NATS gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prefix of command and event subjects
    pub subject_prefix: String,
    /// Queue group shared by orchestrator replicas
    pub queue_group: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "saga".to_string(),
            queue_group: Some("saga-orchestrator".to_string()),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backoff for lost compare-and-swap races
    pub conflict_retry: RetryPolicy,
    /// Timeout supervisor
    pub supervisor: SupervisorConfig,
    /// Number of recently applied event ids remembered per saga
    pub applied_event_window: AppliedEventWindow,
    /// NATS connection
    pub nats: NatsConfig,
    /// NATS KV store
    pub store: KvStoreConfig,
    /// NATS gateway
    pub gateway: GatewayConfig,
}

/// Size of the duplicate-detection window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppliedEventWindow(pub usize);

impl Default for AppliedEventWindow {
    fn default() -> Self {
        Self(64)
    }
}

impl EngineConfig {
    /// Parse a JSON document
    pub fn from_json_str(document: &str) -> SagaResult<Self> {
        let config: Self = serde_json::from_str(document)
            .map_err(|e| SagaError::Configuration(format!("Invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON document from disk
    pub fn load(path: impl AsRef<Path>) -> SagaResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            SagaError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&document)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> SagaResult<()> {
        if self.supervisor.scan_interval_ms == 0 {
            return Err(SagaError::Configuration(
                "supervisor scan interval must be positive".to_string(),
            ));
        }
        if self.applied_event_window.0 == 0 {
            return Err(SagaError::Configuration(
                "applied event window must hold at least one id".to_string(),
            ));
        }
        if self.store.bucket_name.trim().is_empty() {
            return Err(SagaError::Configuration("KV bucket name must not be empty".to_string()));
        }
        self.nats.validate()
    }
}
