// Copyright 2025 Cowboy AI, LLC.

//! Metrics collection for saga store operations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Keep only the last measurements per operation
const MAX_SAMPLES: usize = 1000;

/// Counters, error counts and latency samples per store operation
#[derive(Debug, Clone, Default)]
pub struct StoreMetrics {
    counters: Arc<RwLock<HashMap<String, u64>>>,
    durations: Arc<RwLock<HashMap<String, Vec<Duration>>>>,
    errors: Arc<RwLock<HashMap<String, u64>>>,
}

impl StoreMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str) {
        let mut counters = self.counters.write().await;
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Record an error
    pub async fn record_error(&self, operation: &str) {
        let mut errors = self.errors.write().await;
        *errors.entry(operation.to_string()).or_insert(0) += 1;
    }

    /// Record operation duration
    pub async fn record_duration(&self, operation: &str, duration: Duration) {
        let mut durations = self.durations.write().await;
        let samples = durations.entry(operation.to_string()).or_default();
        samples.push(duration);
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(0..excess);
        }
    }

    /// Get counter value
    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).copied().unwrap_or(0)
    }

    /// Get error count
    pub async fn get_error_count(&self, operation: &str) -> u64 {
        self.errors.read().await.get(operation).copied().unwrap_or(0)
    }

    /// Get average duration for an operation
    pub async fn get_avg_duration(&self, operation: &str) -> Option<Duration> {
        let durations = self.durations.read().await;
        let samples = durations.get(operation).filter(|v| !v.is_empty())?;
        let sum: Duration = samples.iter().sum();
        Some(sum / samples.len() as u32)
    }

    /// Summarize everything recorded so far
    pub async fn summary(&self) -> MetricsSummary {
        let counters = self.counters.read().await.clone();
        let errors = self.errors.read().await.clone();

        let durations = self.durations.read().await;
        let stats = durations
            .iter()
            .filter_map(|(op, samples)| DurationStats::from_samples(samples).map(|s| (op.clone(), s)))
            .collect();

        MetricsSummary {
            counters,
            errors,
            durations: stats,
        }
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        self.counters.write().await.clear();
        self.durations.write().await.clear();
        self.errors.write().await.clear();
    }
}

/// Summary of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    /// Counter values
    pub counters: HashMap<String, u64>,
    /// Error counts
    pub errors: HashMap<String, u64>,
    /// Duration statistics
    pub durations: HashMap<String, DurationStats>,
}

/// Duration statistics for an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationStats {
    /// Number of measurements
    pub count: usize,
    /// Average duration
    pub avg: Duration,
    /// 50th percentile
    pub p50: Duration,
    /// 95th percentile
    pub p95: Duration,
    /// Minimum duration
    pub min: Duration,
    /// Maximum duration
    pub max: Duration,
}

impl DurationStats {
    fn from_samples(samples: &[Duration]) -> Option<Self> {
        let mut sorted = samples.to_vec();
        sorted.sort();
        let min = *sorted.first()?;
        let max = *sorted.last()?;
        let at = |p: f64| sorted[((sorted.len() as f64 - 1.0) * p) as usize];
        let sum: Duration = sorted.iter().sum();
        Some(Self {
            count: sorted.len(),
            avg: sum / sorted.len() as u32,
            p50: at(0.5),
            p95: at(0.95),
            min,
            max,
        })
    }
}

/// Timer for measuring operation duration
pub struct MetricsTimer<'a> {
    metrics: &'a StoreMetrics,
    operation: &'static str,
    start: Instant,
}

impl<'a> MetricsTimer<'a> {
    /// Start timing an operation
    pub fn new(metrics: &'a StoreMetrics, operation: &'static str) -> Self {
        Self {
            metrics,
            operation,
            start: Instant::now(),
        }
    }

    /// Record the duration and increment the operation counter
    pub async fn record(self) {
        self.metrics
            .record_duration(self.operation, self.start.elapsed())
            .await;
        self.metrics
            .increment(&format!("{}.count", self.operation))
            .await;
    }

    /// Record the duration as a failed operation
    pub async fn record_error(self) {
        self.metrics
            .record_duration(self.operation, self.start.elapsed())
            .await;
        self.metrics.record_error(self.operation).await;
    }
}
