// Copyright 2025 Cowboy AI, LLC.

//! Inbound saga events
//!
//! Domain services answer step and compensation commands with outcome
//! events; the supervisor injects synthetic timeout events and operators
//! send cancellation requests. All of them share one envelope and enter the
//! engine through [`crate::orchestrator::SagaOrchestrator::handle_event`].

use crate::identifiers::{CorrelationId, SagaKey};
use crate::state_bag::StateBag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type of step outcome events
pub const STEP_OUTCOME: &str = "step_outcome";
/// Event type of compensation outcome events
pub const COMPENSATION_OUTCOME: &str = "compensation_outcome";
/// Event type of timeout and cancellation events
pub const SAGA_CONTROL: &str = "saga_control";

/// Every event type the orchestrator consumes
pub const ALL_EVENT_TYPES: [&str; 3] = [STEP_OUTCOME, COMPENSATION_OUTCOME, SAGA_CONTROL];

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaEventPayload {
    /// The step command succeeded
    StepSucceeded {
        /// Step the outcome belongs to
        step_index: usize,
        /// Attempt echoed from the command
        #[serde(default)]
        attempt: Option<u32>,
        /// Data merged into the saga state
        #[serde(default)]
        output: StateBag,
    },
    /// The step command failed; eligible for retry
    StepFailed {
        /// Step the outcome belongs to
        step_index: usize,
        /// Attempt echoed from the command
        #[serde(default)]
        attempt: Option<u32>,
        /// Reported error
        error: String,
    },
    /// The service rejected the request on business grounds; never retried
    StepRejected {
        /// Step the outcome belongs to
        step_index: usize,
        /// Attempt echoed from the command
        #[serde(default)]
        attempt: Option<u32>,
        /// Rejection reason
        reason: String,
    },
    /// No outcome arrived before the step deadline
    StepTimedOut {
        /// Overdue step
        step_index: usize,
        /// Attempt that timed out
        attempt: u32,
    },
    /// The compensating command succeeded
    CompensationSucceeded {
        /// Step being compensated
        step_index: usize,
        /// Compensation attempt echoed from the command
        #[serde(default)]
        attempt: Option<u32>,
    },
    /// The compensating command failed
    CompensationFailed {
        /// Step being compensated
        step_index: usize,
        /// Compensation attempt echoed from the command
        #[serde(default)]
        attempt: Option<u32>,
        /// Reported error
        error: String,
    },
    /// No compensation outcome arrived before the deadline
    CompensationTimedOut {
        /// Step being compensated
        step_index: usize,
        /// Compensation attempt that timed out
        attempt: u32,
    },
    /// The whole-saga deadline elapsed
    SagaTimedOut,
    /// Someone asked to stop the saga
    CancelRequested {
        /// Why
        reason: String,
    },
}

impl SagaEventPayload {
    /// Routing event type
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEventPayload::StepSucceeded { .. }
            | SagaEventPayload::StepFailed { .. }
            | SagaEventPayload::StepRejected { .. } => STEP_OUTCOME,
            SagaEventPayload::CompensationSucceeded { .. }
            | SagaEventPayload::CompensationFailed { .. } => COMPENSATION_OUTCOME,
            SagaEventPayload::StepTimedOut { .. }
            | SagaEventPayload::CompensationTimedOut { .. }
            | SagaEventPayload::SagaTimedOut
            | SagaEventPayload::CancelRequested { .. } => SAGA_CONTROL,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            SagaEventPayload::StepSucceeded { .. } => "StepSucceeded",
            SagaEventPayload::StepFailed { .. } => "StepFailed",
            SagaEventPayload::StepRejected { .. } => "StepRejected",
            SagaEventPayload::StepTimedOut { .. } => "StepTimedOut",
            SagaEventPayload::CompensationSucceeded { .. } => "CompensationSucceeded",
            SagaEventPayload::CompensationFailed { .. } => "CompensationFailed",
            SagaEventPayload::CompensationTimedOut { .. } => "CompensationTimedOut",
            SagaEventPayload::SagaTimedOut => "SagaTimedOut",
            SagaEventPayload::CancelRequested { .. } => "CancelRequested",
        }
    }

    /// Step the event refers to, if any
    pub fn step_index(&self) -> Option<usize> {
        match self {
            SagaEventPayload::StepSucceeded { step_index, .. }
            | SagaEventPayload::StepFailed { step_index, .. }
            | SagaEventPayload::StepRejected { step_index, .. }
            | SagaEventPayload::StepTimedOut { step_index, .. }
            | SagaEventPayload::CompensationSucceeded { step_index, .. }
            | SagaEventPayload::CompensationFailed { step_index, .. }
            | SagaEventPayload::CompensationTimedOut { step_index, .. } => Some(*step_index),
            SagaEventPayload::SagaTimedOut | SagaEventPayload::CancelRequested { .. } => None,
        }
    }

    /// Whether the compensation coordinator owns the event
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            SagaEventPayload::CompensationSucceeded { .. }
                | SagaEventPayload::CompensationFailed { .. }
                | SagaEventPayload::CompensationTimedOut { .. }
        )
    }
}

/// Envelope shared by every inbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaEventEnvelope {
    /// Delivery-independent identity; redeliveries keep it
    pub event_id: Uuid,
    /// Saga type
    pub saga_type: String,
    /// Business correlation key
    pub saga_id: String,
    /// Correlation id from the command, when echoed
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// When the producer emitted it
    pub occurred_at: DateTime<Utc>,
    /// What happened
    pub payload: SagaEventPayload,
}

impl SagaEventEnvelope {
    /// Wrap a payload for the saga identified by `key`
    pub fn new(key: &SagaKey, payload: SagaEventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            saga_type: key.saga_type.clone(),
            saga_id: key.saga_id.clone(),
            correlation_id: None,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Step success
    pub fn step_succeeded(key: &SagaKey, step_index: usize, output: StateBag) -> Self {
        Self::new(
            key,
            SagaEventPayload::StepSucceeded {
                step_index,
                attempt: None,
                output,
            },
        )
    }

    /// Step failure
    pub fn step_failed(key: &SagaKey, step_index: usize, error: impl Into<String>) -> Self {
        Self::new(
            key,
            SagaEventPayload::StepFailed {
                step_index,
                attempt: None,
                error: error.into(),
            },
        )
    }

    /// Business rejection of a step
    pub fn step_rejected(key: &SagaKey, step_index: usize, reason: impl Into<String>) -> Self {
        Self::new(
            key,
            SagaEventPayload::StepRejected {
                step_index,
                attempt: None,
                reason: reason.into(),
            },
        )
    }

    /// Synthetic step timeout
    pub fn step_timed_out(key: &SagaKey, step_index: usize, attempt: u32) -> Self {
        Self::new(key, SagaEventPayload::StepTimedOut { step_index, attempt })
    }

    /// Compensation success
    pub fn compensation_succeeded(key: &SagaKey, step_index: usize) -> Self {
        Self::new(
            key,
            SagaEventPayload::CompensationSucceeded {
                step_index,
                attempt: None,
            },
        )
    }

    /// Compensation failure
    pub fn compensation_failed(key: &SagaKey, step_index: usize, error: impl Into<String>) -> Self {
        Self::new(
            key,
            SagaEventPayload::CompensationFailed {
                step_index,
                attempt: None,
                error: error.into(),
            },
        )
    }

    /// Synthetic compensation timeout
    pub fn compensation_timed_out(key: &SagaKey, step_index: usize, attempt: u32) -> Self {
        Self::new(
            key,
            SagaEventPayload::CompensationTimedOut { step_index, attempt },
        )
    }

    /// Synthetic saga timeout
    pub fn saga_timed_out(key: &SagaKey) -> Self {
        Self::new(key, SagaEventPayload::SagaTimedOut)
    }

    /// Cancellation request
    pub fn cancel_requested(key: &SagaKey, reason: impl Into<String>) -> Self {
        Self::new(
            key,
            SagaEventPayload::CancelRequested {
                reason: reason.into(),
            },
        )
    }

    /// Echo the attempt a command carried
    pub fn with_attempt(mut self, value: u32) -> Self {
        match &mut self.payload {
            SagaEventPayload::StepSucceeded { attempt, .. }
            | SagaEventPayload::StepFailed { attempt, .. }
            | SagaEventPayload::StepRejected { attempt, .. }
            | SagaEventPayload::CompensationSucceeded { attempt, .. }
            | SagaEventPayload::CompensationFailed { attempt, .. } => *attempt = Some(value),
            SagaEventPayload::StepTimedOut { attempt, .. }
            | SagaEventPayload::CompensationTimedOut { attempt, .. } => *attempt = value,
            SagaEventPayload::SagaTimedOut | SagaEventPayload::CancelRequested { .. } => {}
        }
        self
    }

    /// Use a producer-assigned event id
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    /// Attach the correlation id
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Key of the saga the event addresses
    pub fn key(&self) -> SagaKey {
        SagaKey::new(self.saga_type.clone(), self.saga_id.clone())
    }

    /// Routing event type
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}
