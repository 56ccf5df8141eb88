// Copyright 2025 Cowboy AI, LLC.

//! Durable, versioned storage of saga instances
//!
//! The store is the only shared mutable state in the engine. Every mutation
//! goes through [`SagaInstanceStore::compare_and_swap`]: the writer presents
//! the version it read and the write fails with
//! [`SagaError::VersionConflict`] if someone else got there first.
//! [`apply_with_retry`] wraps the load, decide, write cycle and re-decides on
//! a lost race.

mod instrumented;
mod memory;
mod nats_kv;

pub use instrumented::InstrumentedSagaStore;
pub use memory::InMemorySagaStore;
pub use nats_kv::{encode_key, NatsKvSagaStore};

use crate::config::RetryPolicy;
use crate::errors::{SagaError, SagaResult};
use crate::identifiers::SagaKey;
use crate::instance::{SagaInstance, SagaStatus};
use crate::transition::{Decision, DiscardReason, SagaTransitionOutput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Versioned saga instance storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SagaInstanceStore: Send + Sync {
    /// Persist a new instance at version 1
    async fn create(&self, instance: &SagaInstance) -> SagaResult<u64>;

    /// Load an instance by key
    async fn load(&self, key: &SagaKey) -> SagaResult<SagaInstance>;

    /// Replace the stored instance if its version still equals `expected_version`
    ///
    /// Returns the new version, `expected_version + 1`.
    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: u64,
    ) -> SagaResult<u64>;

    /// Active, unfrozen instances whose step or saga deadline precedes `now`
    async fn find_timed_out(&self, now: DateTime<Utc>) -> SagaResult<Vec<SagaInstance>>;

    /// Instances in any of the given statuses
    async fn find_by_status(&self, statuses: &[SagaStatus]) -> SagaResult<Vec<SagaInstance>>;
}

/// Outcome of [`apply_with_retry`]
#[derive(Debug)]
pub enum Applied {
    /// The decision was written; `instance` carries the new version
    Written {
        /// Instance as persisted
        instance: SagaInstance,
        /// Side effects to run now that the write succeeded
        output: SagaTransitionOutput,
    },
    /// Nothing was written
    Discarded(DiscardReason),
}

/// Load, decide and write, re-deciding on version conflicts
///
/// `decide` mutates a freshly loaded copy and is called again after every lost
/// race, so it must be free of side effects.
pub async fn apply_with_retry<S, F>(
    store: &S,
    key: &SagaKey,
    policy: &RetryPolicy,
    mut decide: F,
) -> SagaResult<Applied>
where
    S: SagaInstanceStore + ?Sized,
    F: FnMut(&mut SagaInstance) -> SagaResult<Decision> + Send,
{
    let mut conflicts = 0u32;
    loop {
        let mut instance = store.load(key).await?;
        let expected = instance.version;

        let output = match decide(&mut instance)? {
            Decision::Discard(reason) => return Ok(Applied::Discarded(reason)),
            Decision::Apply(output) => output,
        };
        instance.check_invariants()?;

        match store.compare_and_swap(&instance, expected).await {
            Ok(version) => {
                instance.version = version;
                debug!(
                    saga_type = %key.saga_type,
                    saga_id = %key.saga_id,
                    version,
                    "Saga instance written"
                );
                return Ok(Applied::Written { instance, output });
            }
            Err(err @ SagaError::VersionConflict { .. }) => {
                if conflicts >= policy.max_retries {
                    return Err(err);
                }
                conflicts += 1;
                warn!(
                    saga_type = %key.saga_type,
                    saga_id = %key.saga_id,
                    expected,
                    conflicts,
                    "Lost compare-and-swap race, reloading"
                );
                let delay = policy.backoff(conflicts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}
