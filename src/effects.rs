// Copyright 2025 Cowboy AI, LLC.

//! Shared plumbing of the orchestrator and the compensation coordinator:
//! decide-and-persist through the store, then run the side effects.

use crate::config::EngineConfig;
use crate::errors::{SagaError, SagaResult};
use crate::gateway::CommandGateway;
use crate::identifiers::SagaKey;
use crate::instance::SagaInstance;
use crate::observer::{SagaAlert, SagaObserver};
use crate::registry::SagaDefinitionRegistry;
use crate::store::{apply_with_retry, Applied, SagaInstanceStore};
use crate::transition::{Decision, EventDisposition, SagaTransitionOutput, TransitionContext};
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators every saga mutation needs
#[derive(Clone)]
pub(crate) struct EngineCore {
    pub(crate) registry: Arc<SagaDefinitionRegistry>,
    pub(crate) store: Arc<dyn SagaInstanceStore>,
    pub(crate) gateway: Arc<dyn CommandGateway>,
    pub(crate) observer: Arc<dyn SagaObserver>,
    pub(crate) config: Arc<EngineConfig>,
}

/// Outcome of [`EngineCore::apply`] once effects have run
pub(crate) struct Finished {
    pub(crate) disposition: EventDisposition,
    pub(crate) begin_compensation: bool,
}

impl EngineCore {
    /// Decide against the latest stored instance and persist the result
    ///
    /// Side effects run only after the write succeeded.
    pub(crate) async fn apply<F>(&self, key: &SagaKey, mut decide: F) -> SagaResult<Finished>
    where
        F: FnMut(&mut SagaInstance, &TransitionContext<'_>) -> SagaResult<Decision> + Send,
    {
        let definition = self
            .registry
            .lookup(&key.saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(key.saga_type.clone()))?;
        let ctx = TransitionContext::new(&definition, self.config.applied_event_window.0);

        let applied = apply_with_retry(
            self.store.as_ref(),
            key,
            &self.config.conflict_retry,
            |instance| decide(instance, &ctx),
        )
        .await?;

        match applied {
            Applied::Discarded(reason) => {
                warn!(
                    saga_type = %key.saga_type,
                    saga_id = %key.saga_id,
                    reason = %reason,
                    "Saga event discarded"
                );
                Ok(Finished {
                    disposition: EventDisposition::Discarded(reason),
                    begin_compensation: false,
                })
            }
            Applied::Written { instance, output } => {
                info!(
                    saga_type = %key.saga_type,
                    saga_id = %key.saga_id,
                    status = ?instance.status,
                    step_index = instance.current_step_index,
                    version = instance.version,
                    "Saga transition persisted"
                );
                let begin_compensation = output.begin_compensation;
                self.run_effects(&instance, output).await;
                Ok(Finished {
                    disposition: EventDisposition::Applied {
                        version: instance.version,
                    },
                    begin_compensation,
                })
            }
        }
    }

    /// Dispatch commands, then publish notifications and alerts
    ///
    /// A failed dispatch is logged only; the step deadline recovers it.
    pub(crate) async fn run_effects(&self, instance: &SagaInstance, output: SagaTransitionOutput) {
        for command in output.commands {
            let (action_type, step_index) = (command.action_type.clone(), command.step_index);
            if let Err(err) = self.gateway.dispatch(&instance.correlation_id, command).await {
                warn!(
                    saga_type = %instance.saga_type,
                    saga_id = %instance.saga_id,
                    step_index,
                    action_type = %action_type,
                    error = %err,
                    "Command dispatch failed; waiting for the step deadline"
                );
            }
        }

        for mut notification in output.notifications {
            notification.version = instance.version;
            self.observer.on_lifecycle(&notification);
        }

        for alert in &output.alerts {
            self.alert(alert);
        }
    }

    /// Raise an alert
    pub(crate) fn alert(&self, alert: &SagaAlert) {
        self.observer.on_alert(alert);
    }
}
