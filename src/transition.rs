// Copyright 2025 Cowboy AI, LLC.

//! Forward state machine of a saga
//!
//! Everything here is pure: a function receives a freshly loaded instance,
//! mutates it and returns a [`Decision`] listing the side effects to run once
//! the mutation has been persisted. The functions may be called several times
//! for the same event when a compare-and-swap loses a race.

use crate::definition::SagaDefinition;
use crate::errors::{SagaError, SagaResult};
use crate::events::{SagaEventEnvelope, SagaEventPayload};
use crate::gateway::{CommandKind, SagaCommand};
use crate::instance::{SagaInstance, SagaStatus, StepStatus};
use crate::observer::{LifecycleKind, SagaAlert, SagaNotification};
use crate::state_bag::StateBag;
use crate::state_machine::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why an event or request changed nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DiscardReason {
    /// No instance exists for the key
    UnknownSaga,
    /// The event id was applied before
    DuplicateEvent,
    /// The saga is not in a status that accepts the event
    NotAccepting {
        /// Current saga status
        status: SagaStatus,
    },
    /// The event names another step than the active one
    OutOfOrder {
        /// Active step index
        expected: usize,
        /// Step index named by the event
        actual: usize,
    },
    /// The event's attempt is not the attempt in flight
    StaleAttempt {
        /// Attempt in flight
        expected: u32,
        /// Attempt echoed by the event
        actual: u32,
    },
    /// The named step is not awaiting an outcome
    StepNotInFlight {
        /// Step index
        step_index: usize,
        /// Its status
        status: StepStatus,
    },
    /// The saga was already started
    AlreadyStarted,
    /// No completed step is left to roll back
    NothingToCompensate,
    /// Compensation is frozen until an operator resumes it
    AwaitingIntervention,
    /// Compensation is not frozen
    NotFrozen,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::UnknownSaga => write!(f, "unknown saga"),
            DiscardReason::DuplicateEvent => write!(f, "duplicate event"),
            DiscardReason::NotAccepting { status } => {
                write!(f, "saga is {} and does not accept the event", status.name())
            }
            DiscardReason::OutOfOrder { expected, actual } => {
                write!(f, "event for step {actual} while step {expected} is active")
            }
            DiscardReason::StaleAttempt { expected, actual } => {
                write!(f, "event for attempt {actual} while attempt {expected} is in flight")
            }
            DiscardReason::StepNotInFlight { step_index, status } => {
                write!(f, "step {step_index} is {}", status.name())
            }
            DiscardReason::AlreadyStarted => write!(f, "saga already started"),
            DiscardReason::NothingToCompensate => write!(f, "nothing to compensate"),
            DiscardReason::AwaitingIntervention => write!(f, "compensation awaits intervention"),
            DiscardReason::NotFrozen => write!(f, "compensation is not frozen"),
        }
    }
}

/// What handling an event amounted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum EventDisposition {
    /// State changed; `version` is the version now stored
    Applied {
        /// Stored version after the change
        version: u64,
    },
    /// Nothing changed
    Discarded(DiscardReason),
}

impl EventDisposition {
    /// Whether the event changed state
    pub fn is_applied(&self) -> bool {
        matches!(self, EventDisposition::Applied { .. })
    }
}

/// Side effects of a persisted decision
#[derive(Debug, Clone, Default)]
pub struct SagaTransitionOutput {
    /// Commands to dispatch
    pub commands: Vec<SagaCommand>,
    /// Lifecycle notifications to publish
    pub notifications: Vec<SagaNotification>,
    /// Alerts to raise
    pub alerts: Vec<SagaAlert>,
    /// Start rolling back once this write lands
    pub begin_compensation: bool,
}

impl SagaTransitionOutput {
    pub(crate) fn notify(&mut self, instance: &SagaInstance, kind: LifecycleKind) {
        self.notifications.push(SagaNotification::new(
            instance.key(),
            instance.correlation_id.clone(),
            kind,
        ));
    }
}

/// Result of a pure decision
#[derive(Debug, Clone)]
pub enum Decision {
    /// Leave the instance untouched
    Discard(DiscardReason),
    /// Persist the mutated instance, then run the effects
    Apply(SagaTransitionOutput),
}

/// Inputs a decision needs besides the instance
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Definition of the saga type
    pub definition: &'a SagaDefinition,
    /// Decision time
    pub now: DateTime<Utc>,
    /// Number of applied event ids to remember
    pub applied_event_window: usize,
}

impl<'a> TransitionContext<'a> {
    /// Context stamped with the current time
    pub fn new(definition: &'a SagaDefinition, applied_event_window: usize) -> Self {
        Self {
            definition,
            now: Utc::now(),
            applied_event_window,
        }
    }

    /// Override the decision time
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Build the command for a step or its compensation
pub(crate) fn build_command(
    instance: &SagaInstance,
    ctx: &TransitionContext<'_>,
    step_index: usize,
    kind: CommandKind,
    attempt: u32,
) -> SagaResult<SagaCommand> {
    let step = ctx.definition.step(step_index).ok_or_else(|| {
        SagaError::InvariantViolation(format!(
            "{} has no step {step_index}",
            ctx.definition.saga_type
        ))
    })?;

    let action_type = match kind {
        CommandKind::Step => step.action_type.clone(),
        CommandKind::Compensation => step.compensation_action_type.clone().ok_or_else(|| {
            SagaError::InvariantViolation(format!(
                "step {} has no compensation",
                step.name
            ))
        })?,
    };

    Ok(SagaCommand {
        command_id: Uuid::new_v4(),
        kind,
        saga_type: instance.saga_type.clone(),
        saga_id: instance.saga_id.clone(),
        step_index,
        step_name: step.name.clone(),
        action_type,
        service_endpoint: step.service_endpoint.clone(),
        attempt,
        payload: instance.state.clone(),
        correlation_id: instance.correlation_id.clone(),
        issued_at: ctx.now,
    })
}

/// Mark the step Running and queue its command
fn dispatch_step(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    step_index: usize,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    let attempt = instance.retry_count;
    let command = build_command(instance, ctx, step_index, CommandKind::Step, attempt)?;

    let deadline = ctx.definition.step_deadline(step_index, ctx.now)?;
    let step = instance.step_mut(step_index)?;
    step.set_status(StepStatus::Running)?;
    step.started_at.get_or_insert(ctx.now);
    step.deadline = Some(deadline);
    step.attempts += 1;

    out.notify(
        instance,
        LifecycleKind::StepDispatched {
            step_index,
            action_type: command.action_type.clone(),
        },
    );
    out.commands.push(command);
    Ok(())
}

/// Move past the active step: dispatch the next one or complete the saga
fn advance(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    instance.current_step_index += 1;
    instance.retry_count = 0;

    if instance.current_step_index >= instance.steps.len() {
        instance.set_status(SagaStatus::Completed, "all steps completed")?;
        instance.completed_at = Some(ctx.now);
        instance.record(None, "saga completed");
        out.notify(instance, LifecycleKind::Completed);
        return Ok(());
    }

    let next = instance.current_step_index;
    dispatch_step(instance, ctx, next, out)
}

/// Start a freshly created instance: Created -> Running, dispatch step 0
pub fn start(instance: &mut SagaInstance, ctx: &TransitionContext<'_>) -> SagaResult<Decision> {
    if instance.status != SagaStatus::Created {
        return Ok(Decision::Discard(DiscardReason::AlreadyStarted));
    }

    let timeout_at = ctx.definition.saga_deadline(ctx.now)?;
    let mut out = SagaTransitionOutput::default();
    instance.set_status(SagaStatus::Running, "started")?;
    instance.started_at = Some(ctx.now);
    instance.timeout_at = timeout_at;
    instance.current_step_index = 0;
    instance.record(None, "saga started");
    out.notify(instance, LifecycleKind::Started);

    dispatch_step(instance, ctx, 0, &mut out)?;
    Ok(Decision::Apply(out))
}

/// Verify a step outcome addresses the step in flight
fn check_step_event(
    instance: &SagaInstance,
    step_index: usize,
    attempt: Option<u32>,
) -> Option<DiscardReason> {
    if instance.status != SagaStatus::Running {
        return Some(DiscardReason::NotAccepting {
            status: instance.status,
        });
    }
    if step_index != instance.current_step_index {
        return Some(DiscardReason::OutOfOrder {
            expected: instance.current_step_index,
            actual: step_index,
        });
    }
    match instance.step(step_index) {
        Some(step) if step.status == StepStatus::Running => {}
        Some(step) => {
            return Some(DiscardReason::StepNotInFlight {
                step_index,
                status: step.status,
            })
        }
        None => {
            return Some(DiscardReason::OutOfOrder {
                expected: instance.current_step_index,
                actual: step_index,
            })
        }
    }
    match attempt {
        Some(actual) if actual != instance.retry_count => Some(DiscardReason::StaleAttempt {
            expected: instance.retry_count,
            actual,
        }),
        _ => None,
    }
}

fn step_succeeded(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    step_index: usize,
    output: &StateBag,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    instance.state.merge(output);
    let step = instance.step_mut(step_index)?;
    step.set_status(StepStatus::Completed)?;
    step.completed_at = Some(ctx.now);
    step.deadline = None;
    step.output = Some(output.clone());
    instance.record(Some(step_index), "step completed");
    out.notify(instance, LifecycleKind::StepCompleted { step_index });
    advance(instance, ctx, out)
}

/// How a step came to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Error,
    TimedOut,
    Rejected,
}

fn step_failed(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    step_index: usize,
    reason: &str,
    kind: FailureKind,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    let optional = ctx
        .definition
        .step(step_index)
        .map(|s| s.is_optional)
        .unwrap_or(false);

    if optional {
        let step = instance.step_mut(step_index)?;
        step.set_status(StepStatus::Skipped)?;
        step.completed_at = Some(ctx.now);
        step.deadline = None;
        step.error_message = Some(reason.to_string());
        instance.record(Some(step_index), format!("optional step skipped: {reason}"));
        out.notify(
            instance,
            LifecycleKind::StepSkipped {
                step_index,
                reason: reason.to_string(),
            },
        );
        return advance(instance, ctx, out);
    }

    if kind != FailureKind::Rejected && instance.retry_count < instance.max_retries {
        instance.retry_count += 1;
        instance.step_mut(step_index)?.error_message = Some(reason.to_string());
        let attempt = instance.retry_count;
        instance.record(Some(step_index), format!("retry {attempt}: {reason}"));
        out.notify(
            instance,
            LifecycleKind::StepRetried {
                step_index,
                attempt,
                reason: reason.to_string(),
            },
        );
        return dispatch_step(instance, ctx, step_index, out);
    }

    let step = instance.step_mut(step_index)?;
    step.set_status(StepStatus::Failed)?;
    step.completed_at = Some(ctx.now);
    step.deadline = None;
    step.error_message = Some(reason.to_string());

    let (message, lifecycle) = match kind {
        FailureKind::Rejected => (
            format!("step {step_index} rejected: {reason}"),
            LifecycleKind::Rejected {
                step_index,
                reason: reason.to_string(),
            },
        ),
        FailureKind::Error | FailureKind::TimedOut => (
            format!("step {step_index} failed: {reason}"),
            LifecycleKind::Failed {
                step_index,
                reason: reason.to_string(),
            },
        ),
    };
    instance.set_status(SagaStatus::Failed, message.clone())?;
    instance.error_message = Some(message.clone());
    instance.record(Some(step_index), message);
    out.notify(instance, lifecycle);
    out.begin_compensation = instance.needs_compensation();
    Ok(())
}

/// Stop the saga: mark the in-flight step failed and move to `status`
fn halt(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    status: SagaStatus,
    reason: &str,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    if instance.status == SagaStatus::Running {
        let index = instance.current_step_index;
        let step = instance.step_mut(index)?;
        if step.status == StepStatus::Running {
            step.set_status(StepStatus::Failed)?;
            step.completed_at = Some(ctx.now);
            step.deadline = None;
            step.error_message = Some(reason.to_string());
        }
    }

    instance.set_status(status, reason)?;
    instance.error_message = Some(reason.to_string());
    instance.record(None, reason);
    let kind = match status {
        SagaStatus::TimedOut => LifecycleKind::TimedOut,
        _ => LifecycleKind::Cancelled {
            reason: reason.to_string(),
        },
    };
    out.notify(instance, kind);
    out.begin_compensation = instance.needs_compensation();
    Ok(())
}

/// Decide how a forward-path event changes the saga
///
/// Compensation outcomes belong to [`crate::compensation`].
pub fn decide(
    instance: &mut SagaInstance,
    envelope: &SagaEventEnvelope,
    ctx: &TransitionContext<'_>,
) -> SagaResult<Decision> {
    if instance.has_applied(&envelope.event_id) {
        return Ok(Decision::Discard(DiscardReason::DuplicateEvent));
    }

    let mut out = SagaTransitionOutput::default();
    match &envelope.payload {
        SagaEventPayload::StepSucceeded {
            step_index,
            attempt,
            output,
        } => {
            if let Some(reason) = check_step_event(instance, *step_index, *attempt) {
                return Ok(Decision::Discard(reason));
            }
            step_succeeded(instance, ctx, *step_index, output, &mut out)?;
        }
        SagaEventPayload::StepFailed {
            step_index,
            attempt,
            error,
        } => {
            if let Some(reason) = check_step_event(instance, *step_index, *attempt) {
                return Ok(Decision::Discard(reason));
            }
            step_failed(instance, ctx, *step_index, error, FailureKind::Error, &mut out)?;
        }
        SagaEventPayload::StepRejected {
            step_index,
            attempt,
            reason,
        } => {
            if let Some(discard) = check_step_event(instance, *step_index, *attempt) {
                return Ok(Decision::Discard(discard));
            }
            step_failed(instance, ctx, *step_index, reason, FailureKind::Rejected, &mut out)?;
        }
        SagaEventPayload::StepTimedOut {
            step_index,
            attempt,
        } => {
            if let Some(reason) = check_step_event(instance, *step_index, Some(*attempt)) {
                return Ok(Decision::Discard(reason));
            }
            step_failed(instance, ctx, *step_index, "step timed out", FailureKind::TimedOut, &mut out)?;
        }
        SagaEventPayload::SagaTimedOut => {
            if instance.status != SagaStatus::Running {
                return Ok(Decision::Discard(DiscardReason::NotAccepting {
                    status: instance.status,
                }));
            }
            halt(instance, ctx, SagaStatus::TimedOut, "saga timed out", &mut out)?;
        }
        SagaEventPayload::CancelRequested { reason } => {
            if !matches!(instance.status, SagaStatus::Created | SagaStatus::Running) {
                return Ok(Decision::Discard(DiscardReason::NotAccepting {
                    status: instance.status,
                }));
            }
            let reason = format!("cancelled: {reason}");
            halt(instance, ctx, SagaStatus::Cancelled, &reason, &mut out)?;
        }
        SagaEventPayload::CompensationSucceeded { .. }
        | SagaEventPayload::CompensationFailed { .. }
        | SagaEventPayload::CompensationTimedOut { .. } => {
            return Ok(Decision::Discard(DiscardReason::NotAccepting {
                status: instance.status,
            }));
        }
    }

    instance.remember_event(envelope.event_id, ctx.applied_event_window);
    Ok(Decision::Apply(out))
}
