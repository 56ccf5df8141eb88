// Copyright 2025 Cowboy AI, LLC.

//! Saga store decorator that records metrics

use super::SagaInstanceStore;
use crate::errors::SagaResult;
use crate::identifiers::SagaKey;
use crate::instance::{SagaInstance, SagaStatus};
use crate::metrics::{MetricsTimer, StoreMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Wraps any store and counts calls, errors, conflicts and latency
#[derive(Debug, Clone)]
pub struct InstrumentedSagaStore<S> {
    inner: S,
    metrics: StoreMetrics,
}

impl<S: SagaInstanceStore> InstrumentedSagaStore<S> {
    /// Wrap a store with a fresh metrics collector
    pub fn new(inner: S) -> Self {
        Self::with_metrics(inner, StoreMetrics::new())
    }

    /// Wrap a store, sharing an existing collector
    pub fn with_metrics(inner: S, metrics: StoreMetrics) -> Self {
        Self { inner, metrics }
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// Get the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn observe<T>(&self, operation: &'static str, result: SagaResult<T>) -> SagaResult<T> {
        match &result {
            Ok(_) => self.metrics.increment(&format!("{operation}.success")).await,
            Err(e) if e.is_version_conflict() => {
                self.metrics.increment(&format!("{operation}.conflict")).await
            }
            Err(e) if e.is_not_found() => self.metrics.increment(&format!("{operation}.miss")).await,
            Err(_) => self.metrics.increment(&format!("{operation}.error")).await,
        }
        result
    }
}

#[async_trait]
impl<S: SagaInstanceStore> SagaInstanceStore for InstrumentedSagaStore<S> {
    async fn create(&self, instance: &SagaInstance) -> SagaResult<u64> {
        let timer = MetricsTimer::new(&self.metrics, "store.create");
        let result = self.inner.create(instance).await;
        match result {
            Ok(_) => timer.record().await,
            Err(_) => timer.record_error().await,
        }
        self.observe("store.create", result).await
    }

    async fn load(&self, key: &SagaKey) -> SagaResult<SagaInstance> {
        let timer = MetricsTimer::new(&self.metrics, "store.load");
        let result = self.inner.load(key).await;
        match &result {
            Err(e) if !e.is_not_found() => timer.record_error().await,
            _ => timer.record().await,
        }
        self.observe("store.load", result).await
    }

    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: u64,
    ) -> SagaResult<u64> {
        let timer = MetricsTimer::new(&self.metrics, "store.cas");
        let result = self.inner.compare_and_swap(instance, expected_version).await;
        match &result {
            Err(e) if !e.is_version_conflict() => timer.record_error().await,
            _ => timer.record().await,
        }
        self.observe("store.cas", result).await
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> SagaResult<Vec<SagaInstance>> {
        let timer = MetricsTimer::new(&self.metrics, "store.find_timed_out");
        let result = self.inner.find_timed_out(now).await;
        match &result {
            Ok(found) => {
                timer.record().await;
                for _ in found {
                    self.metrics.increment("store.find_timed_out.found").await;
                }
            }
            Err(_) => timer.record_error().await,
        }
        result
    }

    async fn find_by_status(&self, statuses: &[SagaStatus]) -> SagaResult<Vec<SagaInstance>> {
        let timer = MetricsTimer::new(&self.metrics, "store.find_by_status");
        let result = self.inner.find_by_status(statuses).await;
        match &result {
            Ok(_) => timer.record().await,
            Err(_) => timer.record_error().await,
        }
        result
    }
}
