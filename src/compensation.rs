// Copyright 2025 Cowboy AI, LLC.

//! Rollback of completed steps
//!
//! Compensation walks the completed steps from the last one backwards, one
//! at a time: a step with a compensating action is marked `Compensating` and
//! its command dispatched; the walk continues when the outcome arrives. Steps
//! without a compensating action are marked `Compensated` on the spot.
//!
//! A compensation that keeps failing freezes the saga in `Compensating` with
//! `requires_intervention` set and raises an alert. An operator calls
//! [`CompensationCoordinator::resume`] once the underlying problem is fixed.

use crate::effects::EngineCore;
use crate::errors::SagaResult;
use crate::events::{SagaEventEnvelope, SagaEventPayload};
use crate::gateway::CommandKind;
use crate::identifiers::SagaKey;
use crate::instance::{SagaInstance, SagaStatus, StepStatus};
use crate::observer::{LifecycleKind, SagaAlert};
use crate::state_machine::State;
use crate::transition::{
    build_command, Decision, DiscardReason, EventDisposition, SagaTransitionOutput,
    TransitionContext,
};
use tracing::warn;

fn dispatch_compensation(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    step_index: usize,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    let attempt = instance.step_mut(step_index)?.compensation_attempts;
    let command = build_command(instance, ctx, step_index, CommandKind::Compensation, attempt)?;

    let deadline = ctx.definition.step_deadline(step_index, ctx.now)?;
    let step = instance.step_mut(step_index)?;
    step.set_status(StepStatus::Compensating)?;
    step.deadline = Some(deadline);

    out.notify(
        instance,
        LifecycleKind::CompensationDispatched {
            step_index,
            action_type: command.action_type.clone(),
        },
    );
    out.commands.push(command);
    Ok(())
}

/// Continue the reverse walk from the last step still `Completed`
fn walk(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    while let Some(index) = instance
        .steps
        .iter()
        .rposition(|s| s.status == StepStatus::Completed)
    {
        let compensable = ctx
            .definition
            .step(index)
            .is_some_and(|s| s.is_compensable());
        if compensable {
            return dispatch_compensation(instance, ctx, index, out);
        }

        instance.step_mut(index)?.set_status(StepStatus::Compensated)?;
        instance.record(Some(index), "no compensating action; marked compensated");
        out.notify(instance, LifecycleKind::StepCompensated { step_index: index });
    }

    instance.set_status(SagaStatus::Compensated, "all completed steps compensated")?;
    instance.completed_at = Some(ctx.now);
    instance.record(None, "saga compensated");
    out.notify(instance, LifecycleKind::Compensated);
    Ok(())
}

/// Start rolling back a failed, timed-out or cancelled saga
pub fn begin(instance: &mut SagaInstance, ctx: &TransitionContext<'_>) -> SagaResult<Decision> {
    if !instance.status.awaits_rollback() {
        return Ok(Decision::Discard(DiscardReason::NotAccepting {
            status: instance.status,
        }));
    }
    if !instance.needs_compensation() {
        return Ok(Decision::Discard(DiscardReason::NothingToCompensate));
    }

    let mut out = SagaTransitionOutput::default();
    let reason = format!("rollback after {}", instance.status.name());
    instance.set_status(SagaStatus::Compensating, reason.clone())?;
    instance.record(None, reason);
    out.notify(instance, LifecycleKind::CompensationStarted);
    walk(instance, ctx, &mut out)?;
    Ok(Decision::Apply(out))
}

fn compensation_failed(
    instance: &mut SagaInstance,
    ctx: &TransitionContext<'_>,
    step_index: usize,
    reason: &str,
    out: &mut SagaTransitionOutput,
) -> SagaResult<()> {
    let max_retries = instance.max_retries;
    let step = instance.step_mut(step_index)?;
    step.error_message = Some(reason.to_string());

    if step.compensation_attempts < max_retries {
        step.compensation_attempts += 1;
        let attempt = step.compensation_attempts;
        instance.record(Some(step_index), format!("compensation retry {attempt}: {reason}"));
        return dispatch_compensation(instance, ctx, step_index, out);
    }

    step.deadline = None;
    let message = format!("compensation of step {step_index} failed: {reason}");
    instance.requires_intervention = true;
    instance.error_message = Some(message.clone());
    instance.record(Some(step_index), message);
    out.alerts.push(SagaAlert::CompensationFailed {
        key: instance.key(),
        step_index,
        reason: reason.to_string(),
    });
    out.notify(
        instance,
        LifecycleKind::CompensationStuck {
            step_index,
            reason: reason.to_string(),
        },
    );
    Ok(())
}

/// Decide how a compensation outcome changes the saga
pub fn decide(
    instance: &mut SagaInstance,
    envelope: &SagaEventEnvelope,
    ctx: &TransitionContext<'_>,
) -> SagaResult<Decision> {
    if instance.has_applied(&envelope.event_id) {
        return Ok(Decision::Discard(DiscardReason::DuplicateEvent));
    }
    if instance.status != SagaStatus::Compensating {
        return Ok(Decision::Discard(DiscardReason::NotAccepting {
            status: instance.status,
        }));
    }
    if instance.requires_intervention {
        return Ok(Decision::Discard(DiscardReason::AwaitingIntervention));
    }

    let (step_index, attempt) = match &envelope.payload {
        SagaEventPayload::CompensationSucceeded { step_index, attempt }
        | SagaEventPayload::CompensationFailed {
            step_index, attempt, ..
        } => (*step_index, *attempt),
        SagaEventPayload::CompensationTimedOut {
            step_index,
            attempt,
        } => (*step_index, Some(*attempt)),
        _ => {
            return Ok(Decision::Discard(DiscardReason::NotAccepting {
                status: instance.status,
            }))
        }
    };

    let Some(step) = instance.step(step_index) else {
        return Ok(Decision::Discard(DiscardReason::StepNotInFlight {
            step_index,
            status: StepStatus::Pending,
        }));
    };
    if step.status != StepStatus::Compensating {
        return Ok(Decision::Discard(DiscardReason::StepNotInFlight {
            step_index,
            status: step.status,
        }));
    }
    if let Some(actual) = attempt {
        if actual != step.compensation_attempts {
            return Ok(Decision::Discard(DiscardReason::StaleAttempt {
                expected: step.compensation_attempts,
                actual,
            }));
        }
    }

    let mut out = SagaTransitionOutput::default();
    match &envelope.payload {
        SagaEventPayload::CompensationSucceeded { .. } => {
            let step = instance.step_mut(step_index)?;
            step.set_status(StepStatus::Compensated)?;
            step.was_compensated = true;
            step.deadline = None;
            instance.record(Some(step_index), "step compensated");
            out.notify(instance, LifecycleKind::StepCompensated { step_index });
            walk(instance, ctx, &mut out)?;
        }
        SagaEventPayload::CompensationFailed { error, .. } => {
            compensation_failed(instance, ctx, step_index, error, &mut out)?;
        }
        _ => {
            compensation_failed(instance, ctx, step_index, "compensation timed out", &mut out)?;
        }
    }

    instance.remember_event(envelope.event_id, ctx.applied_event_window);
    Ok(Decision::Apply(out))
}

/// Unfreeze a stuck compensation and dispatch it again
pub fn resume(instance: &mut SagaInstance, ctx: &TransitionContext<'_>) -> SagaResult<Decision> {
    if instance.status != SagaStatus::Compensating || !instance.requires_intervention {
        return Ok(Decision::Discard(DiscardReason::NotFrozen));
    }
    let Some(index) = instance
        .steps
        .iter()
        .rposition(|s| s.status == StepStatus::Compensating)
    else {
        return Ok(Decision::Discard(DiscardReason::NotFrozen));
    };

    let mut out = SagaTransitionOutput::default();
    instance.requires_intervention = false;
    instance.step_mut(index)?.compensation_attempts = 0;
    instance.record(Some(index), "compensation resumed by operator");
    out.notify(instance, LifecycleKind::CompensationResumed { step_index: index });
    dispatch_compensation(instance, ctx, index, &mut out)?;
    Ok(Decision::Apply(out))
}

/// Drives compensation for persisted sagas
#[derive(Clone)]
pub struct CompensationCoordinator {
    core: EngineCore,
}

impl std::fmt::Debug for CompensationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationCoordinator").finish_non_exhaustive()
    }
}

impl CompensationCoordinator {
    pub(crate) fn new(core: EngineCore) -> Self {
        Self { core }
    }

    /// Start rolling back the saga
    ///
    /// A saga with nothing to compensate keeps its status and the call is
    /// reported as discarded.
    pub async fn begin(&self, key: &SagaKey) -> SagaResult<EventDisposition> {
        Ok(self.core.apply(key, begin).await?.disposition)
    }

    /// Apply a compensation outcome event
    pub async fn handle_event(&self, envelope: SagaEventEnvelope) -> SagaResult<EventDisposition> {
        let key = envelope.key();
        match self
            .core
            .apply(&key, |instance, ctx| decide(instance, &envelope, ctx))
            .await
        {
            Ok(finished) => Ok(finished.disposition),
            Err(err) if err.is_not_found() => {
                warn!(saga_type = %key.saga_type, saga_id = %key.saga_id, "Compensation event for unknown saga");
                Ok(EventDisposition::Discarded(DiscardReason::UnknownSaga))
            }
            Err(err) => Err(err),
        }
    }

    /// Operator action: retry a frozen compensation
    pub async fn resume(&self, key: &SagaKey) -> SagaResult<EventDisposition> {
        Ok(self.core.apply(key, resume).await?.disposition)
    }
}
