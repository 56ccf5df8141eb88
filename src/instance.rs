// Copyright 2025 Cowboy AI, LLC.

//! Runtime state of a saga instance
//!
//! A [`SagaInstance`] is the single persisted record of one running (or
//! finished) saga. It is mutated only by the orchestrator and the
//! compensation coordinator, and every mutation is persisted through the
//! store's compare-and-swap.

use crate::definition::SagaDefinition;
use crate::errors::{SagaError, SagaResult};
use crate::identifiers::{CorrelationId, SagaInstanceId, SagaKey};
use crate::state_bag::StateBag;
use crate::state_machine::{transition, State, StateTransition, StateTransitions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Saga-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Instance persisted, first step not yet dispatched
    Created,
    /// A step is in flight
    Running,
    /// Every step completed or was skipped
    Completed,
    /// A mandatory step failed for good
    Failed,
    /// Rolling back completed steps
    Compensating,
    /// Rollback finished
    Compensated,
    /// Stopped on request
    Cancelled,
    /// Whole-saga deadline elapsed
    TimedOut,
}

impl State for SagaStatus {
    fn name(&self) -> &'static str {
        match self {
            SagaStatus::Created => "Created",
            SagaStatus::Running => "Running",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Cancelled => "Cancelled",
            SagaStatus::TimedOut => "TimedOut",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }
}

impl StateTransitions for SagaStatus {
    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            SagaStatus::Created => vec![SagaStatus::Running, SagaStatus::Cancelled],
            SagaStatus::Running => vec![
                SagaStatus::Completed,
                SagaStatus::Failed,
                SagaStatus::TimedOut,
                SagaStatus::Cancelled,
            ],
            SagaStatus::Failed | SagaStatus::TimedOut | SagaStatus::Cancelled => {
                vec![SagaStatus::Compensating]
            }
            SagaStatus::Compensating => vec![SagaStatus::Compensated],
            SagaStatus::Completed | SagaStatus::Compensated => vec![],
        }
    }
}

impl SagaStatus {
    /// Statuses in which the saga is waiting on an outcome event
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SagaStatus::Created | SagaStatus::Running | SagaStatus::Compensating
        )
    }

    /// Statuses from which a rollback may still start
    pub fn awaits_rollback(&self) -> bool {
        matches!(
            self,
            SagaStatus::Failed | SagaStatus::TimedOut | SagaStatus::Cancelled
        )
    }
}

/// Step-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// Not dispatched yet
    Pending,
    /// Command dispatched, awaiting outcome
    Running,
    /// Outcome succeeded
    Completed,
    /// Outcome failed for good
    Failed,
    /// Optional step that failed
    Skipped,
    /// Compensation dispatched, awaiting outcome
    Compensating,
    /// Undone (or nothing to undo)
    Compensated,
}

impl State for StepStatus {
    fn name(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Skipped => "Skipped",
            StepStatus::Compensating => "Compensating",
            StepStatus::Compensated => "Compensated",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::Skipped | StepStatus::Compensated
        )
    }
}

impl StateTransitions for StepStatus {
    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            StepStatus::Pending => vec![StepStatus::Running],
            // Running -> Running is a retry of the same step
            StepStatus::Running => vec![
                StepStatus::Running,
                StepStatus::Completed,
                StepStatus::Failed,
                StepStatus::Skipped,
            ],
            StepStatus::Completed => vec![StepStatus::Compensating, StepStatus::Compensated],
            StepStatus::Compensating => vec![StepStatus::Compensating, StepStatus::Compensated],
            StepStatus::Failed | StepStatus::Skipped | StepStatus::Compensated => vec![],
        }
    }
}

/// Per-step runtime record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStepState {
    /// Position in the definition
    pub step_index: usize,
    /// Step name from the definition
    pub step_name: String,
    /// Current status
    pub status: StepStatus,
    /// When the first attempt was dispatched
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a final outcome
    pub completed_at: Option<DateTime<Utc>>,
    /// When the in-flight attempt (step or compensation) is overdue
    pub deadline: Option<DateTime<Utc>>,
    /// Result payload merged into the saga state
    pub output: Option<StateBag>,
    /// Last error reported for the step or its compensation
    pub error_message: Option<String>,
    /// A compensating command ran successfully
    pub was_compensated: bool,
    /// Number of step dispatches
    pub attempts: u32,
    /// Number of compensation retries used
    pub compensation_attempts: u32,
}

impl SagaStepState {
    fn pending(step_index: usize, step_name: &str) -> Self {
        Self {
            step_index,
            step_name: step_name.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            deadline: None,
            output: None,
            error_message: None,
            was_compensated: false,
            attempts: 0,
            compensation_attempts: 0,
        }
    }

    /// Move to a new status, rejecting illegal moves
    pub fn set_status(&mut self, to: StepStatus) -> SagaResult<()> {
        if !self.status.can_transition_to(&to) {
            return Err(SagaError::InvalidTransition {
                from: format!("step {} {}", self.step_index, self.status.name()),
                to: to.name().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Free-form audit entry attached to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened
    pub at: DateTime<Utc>,
    /// Step concerned, if any
    pub step_index: Option<usize>,
    /// What happened
    pub message: String,
}

/// Parameters of the triggering command or event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaTrigger {
    /// Saga type to instantiate
    pub saga_type: String,
    /// Business correlation key
    pub saga_id: String,
    /// Initial workflow data
    pub initial_state: StateBag,
    /// Correlation id threaded through commands
    pub correlation_id: CorrelationId,
    /// Who started the saga
    pub initiator_id: Option<String>,
    /// Parent saga when started as a sub-saga
    pub parent_saga: Option<SagaKey>,
}

impl SagaTrigger {
    /// Create a trigger with an empty state bag
    pub fn new(saga_type: impl Into<String>, saga_id: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            saga_id: saga_id.into(),
            initial_state: StateBag::new(),
            correlation_id: CorrelationId::new(),
            initiator_id: None,
            parent_saga: None,
        }
    }

    /// Seed the state bag
    pub fn with_state(mut self, state: StateBag) -> Self {
        self.initial_state = state;
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the initiator
    pub fn with_initiator(mut self, initiator_id: impl Into<String>) -> Self {
        self.initiator_id = Some(initiator_id.into());
        self
    }

    /// Attach to a parent saga
    pub fn with_parent(mut self, parent: SagaKey) -> Self {
        self.parent_saga = Some(parent);
        self
    }

    /// Key of the saga this trigger creates
    pub fn key(&self) -> SagaKey {
        SagaKey::new(self.saga_type.clone(), self.saga_id.clone())
    }
}

/// Persisted state of one saga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Internal identity
    pub id: SagaInstanceId,
    /// Business correlation key
    pub saga_id: String,
    /// Saga type
    pub saga_type: String,
    /// Saga-level status
    pub status: SagaStatus,
    /// Index of the active step
    pub current_step_index: usize,
    /// One record per definition step, in definition order
    pub steps: Vec<SagaStepState>,
    /// Data produced by completed steps
    pub state: StateBag,
    /// Correlation id threaded through commands
    pub correlation_id: CorrelationId,
    /// Who started the saga
    pub initiator_id: Option<String>,
    /// Parent saga for sub-sagas
    pub parent_saga: Option<SagaKey>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the first step was dispatched
    pub started_at: Option<DateTime<Utc>>,
    /// When the saga reached Completed or Compensated
    pub completed_at: Option<DateTime<Utc>>,
    /// Whole-saga deadline
    pub timeout_at: Option<DateTime<Utc>>,
    /// Why the saga failed, timed out or was cancelled
    pub error_message: Option<String>,
    /// Retries used by the active step
    pub retry_count: u32,
    /// Retry budget per step
    pub max_retries: u32,
    /// Compensation is frozen until an operator resumes it
    pub requires_intervention: bool,
    /// Optimistic concurrency version
    pub version: u64,
    /// Ids of recently applied events, oldest first
    pub applied_events: VecDeque<Uuid>,
    /// Saga status changes
    pub transitions: Vec<StateTransition<SagaStatus>>,
    /// Step-level audit trail
    pub audit: Vec<AuditEntry>,
}

impl SagaInstance {
    /// Materialize a new instance from its definition
    pub fn new(definition: &SagaDefinition, trigger: SagaTrigger) -> Self {
        let steps = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| SagaStepState::pending(index, &step.name))
            .collect();

        Self {
            id: SagaInstanceId::new(),
            saga_id: trigger.saga_id,
            saga_type: definition.saga_type.clone(),
            status: SagaStatus::Created,
            current_step_index: 0,
            steps,
            state: trigger.initial_state,
            correlation_id: trigger.correlation_id,
            initiator_id: trigger.initiator_id,
            parent_saga: trigger.parent_saga,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: definition.max_retries,
            requires_intervention: false,
            version: 0,
            applied_events: VecDeque::new(),
            transitions: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// Storage and routing key
    pub fn key(&self) -> SagaKey {
        SagaKey::new(self.saga_type.clone(), self.saga_id.clone())
    }

    /// Move the saga to a new status, recording the transition
    pub fn set_status(&mut self, to: SagaStatus, reason: impl Into<String>) -> SagaResult<()> {
        let record = transition(&self.status, to, reason)?;
        self.status = to;
        self.transitions.push(record);
        Ok(())
    }

    /// Append an audit entry
    pub fn record(&mut self, step_index: Option<usize>, message: impl Into<String>) {
        self.audit.push(AuditEntry {
            at: Utc::now(),
            step_index,
            message: message.into(),
        });
    }

    /// Step record by index
    pub fn step(&self, index: usize) -> Option<&SagaStepState> {
        self.steps.get(index)
    }

    /// Mutable step record by index
    pub fn step_mut(&mut self, index: usize) -> SagaResult<&mut SagaStepState> {
        let len = self.steps.len();
        self.steps.get_mut(index).ok_or_else(|| {
            SagaError::InvariantViolation(format!("step index {index} out of range ({len} steps)"))
        })
    }

    /// The step currently in flight, forward or compensating
    pub fn active_step(&self) -> Option<&SagaStepState> {
        match self.status {
            SagaStatus::Running => self
                .steps
                .get(self.current_step_index)
                .filter(|s| s.status == StepStatus::Running),
            SagaStatus::Compensating => self
                .steps
                .iter()
                .rev()
                .find(|s| s.status == StepStatus::Compensating),
            _ => None,
        }
    }

    /// Whether any completed step still has to be rolled back
    pub fn needs_compensation(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.status, StepStatus::Completed | StepStatus::Compensating))
    }

    /// Whether the event id was applied recently
    pub fn has_applied(&self, event_id: &Uuid) -> bool {
        self.applied_events.contains(event_id)
    }

    /// Remember an applied event id, keeping at most `window` ids
    pub fn remember_event(&mut self, event_id: Uuid, window: usize) {
        self.applied_events.push_back(event_id);
        while self.applied_events.len() > window.max(1) {
            self.applied_events.pop_front();
        }
    }

    /// Whether the saga deadline or the in-flight attempt deadline has passed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if self.requires_intervention {
            return false;
        }
        match self.status {
            SagaStatus::Running => {
                self.timeout_at.is_some_and(|t| t <= now)
                    || self
                        .active_step()
                        .and_then(|s| s.deadline)
                        .is_some_and(|d| d <= now)
            }
            SagaStatus::Compensating => self
                .active_step()
                .and_then(|s| s.deadline)
                .is_some_and(|d| d <= now),
            _ => false,
        }
    }

    /// Whether the saga-level deadline has passed
    pub fn saga_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.is_some_and(|t| t <= now)
    }

    /// Check the structural invariants of the record
    pub fn check_invariants(&self) -> SagaResult<()> {
        let violation = |msg: String| Err(SagaError::InvariantViolation(format!("{}: {msg}", self.key())));

        if self.status == SagaStatus::Completed {
            if self.current_step_index != self.steps.len() {
                return violation(format!(
                    "completed saga has step index {} of {}",
                    self.current_step_index,
                    self.steps.len()
                ));
            }
        } else if self.current_step_index >= self.steps.len() {
            return violation(format!(
                "step index {} out of range for {} steps",
                self.current_step_index,
                self.steps.len()
            ));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.step_index != index {
                return violation(format!("step record {index} claims index {}", step.step_index));
            }
            if step.status == StepStatus::Completed {
                let blocked = self.steps[..index]
                    .iter()
                    .find(|prior| !matches!(prior.status, StepStatus::Completed | StepStatus::Skipped));
                if let Some(prior) = blocked {
                    return violation(format!(
                        "step {index} completed while step {} is {}",
                        prior.step_index,
                        prior.status.name()
                    ));
                }
            }
        }

        if self.status == SagaStatus::Compensating && !self.needs_compensation() {
            return violation("compensating with nothing left to compensate".to_string());
        }

        Ok(())
    }
}
