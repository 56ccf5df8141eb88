// Copyright 2025 Cowboy AI, LLC.

//! Lifecycle notifications and operator alerts
//!
//! The engine reports what happened to each saga through a [`SagaObserver`].
//! Notifications are emitted only after the corresponding state change has
//! been persisted. Alerts are reserved for conditions that need a human:
//! frozen compensations and triggers for unknown saga types.

use crate::identifiers::{CorrelationId, SagaKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// What happened to a saga
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleKind {
    /// First step dispatched
    Started,
    /// A step command was dispatched
    StepDispatched {
        /// Step index
        step_index: usize,
        /// Dispatched action type
        action_type: String,
    },
    /// A step succeeded
    StepCompleted {
        /// Step index
        step_index: usize,
    },
    /// An optional step failed and was skipped
    StepSkipped {
        /// Step index
        step_index: usize,
        /// Failure reason
        reason: String,
    },
    /// A step is being retried
    StepRetried {
        /// Step index
        step_index: usize,
        /// Retry number, starting at 1
        attempt: u32,
        /// Failure that caused the retry
        reason: String,
    },
    /// Every step completed
    Completed,
    /// A mandatory step failed for good
    Failed {
        /// Step index
        step_index: usize,
        /// Failure reason
        reason: String,
    },
    /// A service rejected a step on business grounds
    Rejected {
        /// Step index
        step_index: usize,
        /// Rejection reason
        reason: String,
    },
    /// The saga deadline elapsed
    TimedOut,
    /// The saga was cancelled
    Cancelled {
        /// Why
        reason: String,
    },
    /// Rollback started
    CompensationStarted,
    /// A compensating command was dispatched
    CompensationDispatched {
        /// Step index
        step_index: usize,
        /// Dispatched compensation action type
        action_type: String,
    },
    /// A step was rolled back
    StepCompensated {
        /// Step index
        step_index: usize,
    },
    /// Rollback finished
    Compensated,
    /// Rollback is frozen awaiting an operator
    CompensationStuck {
        /// Step index
        step_index: usize,
        /// Last reported error
        reason: String,
    },
    /// An operator resumed a frozen rollback
    CompensationResumed {
        /// Step index
        step_index: usize,
    },
}

/// Lifecycle notification for one saga
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaNotification {
    /// Saga the notification is about
    pub key: SagaKey,
    /// Correlation id of the saga
    pub correlation_id: CorrelationId,
    /// Persisted version the notification follows
    pub version: u64,
    /// What happened
    pub kind: LifecycleKind,
    /// When
    pub at: DateTime<Utc>,
}

impl SagaNotification {
    /// Create a notification stamped now; the version is set after the write
    pub fn new(key: SagaKey, correlation_id: CorrelationId, kind: LifecycleKind) -> Self {
        Self {
            key,
            correlation_id,
            version: 0,
            kind,
            at: Utc::now(),
        }
    }
}

/// Condition that needs operator attention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaAlert {
    /// Compensation exhausted its retries; the saga is frozen
    CompensationFailed {
        /// Saga concerned
        key: SagaKey,
        /// Step whose compensation failed
        step_index: usize,
        /// Last reported error
        reason: String,
    },
    /// A trigger named a saga type nobody registered
    UnknownSagaType {
        /// Requested saga type
        saga_type: String,
        /// Business correlation key from the trigger
        saga_id: String,
    },
}

/// Receives lifecycle notifications and alerts
pub trait SagaObserver: Send + Sync {
    /// A saga changed state
    fn on_lifecycle(&self, notification: &SagaNotification);

    /// Something needs a human
    fn on_alert(&self, alert: &SagaAlert);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl SagaObserver for NoOpObserver {
    fn on_lifecycle(&self, _notification: &SagaNotification) {}
    fn on_alert(&self, _alert: &SagaAlert) {}
}

/// Logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SagaObserver for TracingObserver {
    fn on_lifecycle(&self, n: &SagaNotification) {
        let (saga_type, saga_id) = (&n.key.saga_type, &n.key.saga_id);
        match &n.kind {
            LifecycleKind::StepRetried {
                step_index,
                attempt,
                reason,
            } => tracing::warn!(
                saga_type = %saga_type,
                saga_id = %saga_id,
                step_index,
                attempt,
                reason = %reason,
                "Step retried"
            ),
            LifecycleKind::StepSkipped { step_index, reason } => tracing::warn!(
                saga_type = %saga_type,
                saga_id = %saga_id,
                step_index,
                reason = %reason,
                "Optional step skipped"
            ),
            LifecycleKind::Failed { step_index, reason }
            | LifecycleKind::Rejected { step_index, reason } => tracing::warn!(
                saga_type = %saga_type,
                saga_id = %saga_id,
                step_index,
                reason = %reason,
                version = n.version,
                "Saga failed"
            ),
            LifecycleKind::CompensationStuck { step_index, reason } => tracing::error!(
                saga_type = %saga_type,
                saga_id = %saga_id,
                step_index,
                reason = %reason,
                "Compensation stuck"
            ),
            kind => tracing::info!(
                saga_type = %saga_type,
                saga_id = %saga_id,
                version = n.version,
                kind = ?kind,
                "Saga lifecycle"
            ),
        }
    }

    fn on_alert(&self, alert: &SagaAlert) {
        match alert {
            SagaAlert::CompensationFailed {
                key,
                step_index,
                reason,
            } => tracing::error!(
                saga_type = %key.saga_type,
                saga_id = %key.saga_id,
                step_index,
                reason = %reason,
                "Compensation failed; operator intervention required"
            ),
            SagaAlert::UnknownSagaType { saga_type, saga_id } => tracing::error!(
                saga_type = %saga_type,
                saga_id = %saga_id,
                "Trigger for unknown saga type"
            ),
        }
    }
}

/// Keeps every notification and alert in memory
///
/// Handy in tests and for embedding the engine behind an admin view.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    notifications: Arc<Mutex<Vec<SagaNotification>>>,
    alerts: Arc<Mutex<Vec<SagaAlert>>>,
}

impl RecordingObserver {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded notifications
    pub fn notifications(&self) -> Vec<SagaNotification> {
        self.notifications
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Recorded notification kinds for one saga, in order
    pub fn kinds_for(&self, key: &SagaKey) -> Vec<LifecycleKind> {
        self.notifications()
            .into_iter()
            .filter(|n| &n.key == key)
            .map(|n| n.kind)
            .collect()
    }

    /// Snapshot of recorded alerts
    pub fn alerts(&self) -> Vec<SagaAlert> {
        self.alerts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl SagaObserver for RecordingObserver {
    fn on_lifecycle(&self, notification: &SagaNotification) {
        if let Ok(mut guard) = self.notifications.lock() {
            guard.push(notification.clone());
        }
    }

    fn on_alert(&self, alert: &SagaAlert) {
        if let Ok(mut guard) = self.alerts.lock() {
            guard.push(alert.clone());
        }
    }
}

/// Fans out to several observers
#[derive(Clone, Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn SagaObserver>>,
}

impl CompositeObserver {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn with(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SagaObserver for CompositeObserver {
    fn on_lifecycle(&self, notification: &SagaNotification) {
        for observer in &self.observers {
            observer.on_lifecycle(notification);
        }
    }

    fn on_alert(&self, alert: &SagaAlert) {
        for observer in &self.observers {
            observer.on_alert(alert);
        }
    }
}
