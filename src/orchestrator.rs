// Copyright 2025 Cowboy AI, LLC.

//! Saga orchestrator
//!
//! Purely reactive: it starts sagas from triggers and advances them as
//! outcome events arrive. Per-instance progress is serialized by the
//! step-index/attempt check together with the store's optimistic versions,
//! so any number of orchestrator replicas may consume the same events.

use crate::compensation::CompensationCoordinator;
use crate::config::EngineConfig;
use crate::effects::EngineCore;
use crate::errors::{SagaError, SagaResult};
use crate::events::{SagaEventEnvelope, ALL_EVENT_TYPES};
use crate::gateway::{CommandGateway, SagaEventHandler};
use crate::identifiers::SagaKey;
use crate::instance::{SagaInstance, SagaTrigger};
use crate::observer::{SagaAlert, SagaObserver, TracingObserver};
use crate::registry::SagaDefinitionRegistry;
use crate::store::SagaInstanceStore;
use crate::transition::{self, DiscardReason, EventDisposition};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The saga state-machine engine
#[derive(Clone)]
pub struct SagaOrchestrator {
    core: EngineCore,
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("saga_types", &self.core.registry.saga_types())
            .finish_non_exhaustive()
    }
}

impl SagaOrchestrator {
    /// Create an orchestrator with default configuration and tracing output
    pub fn new(
        registry: Arc<SagaDefinitionRegistry>,
        store: Arc<dyn SagaInstanceStore>,
        gateway: Arc<dyn CommandGateway>,
    ) -> Self {
        Self {
            core: EngineCore {
                registry,
                store,
                gateway,
                observer: Arc::new(TracingObserver),
                config: Arc::new(EngineConfig::default()),
            },
        }
    }

    /// Replace the observer
    pub fn with_observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.core.observer = observer;
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.core.config = Arc::new(config);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Instance store
    pub fn store(&self) -> Arc<dyn SagaInstanceStore> {
        self.core.store.clone()
    }

    /// Definition registry
    pub fn registry(&self) -> Arc<SagaDefinitionRegistry> {
        self.core.registry.clone()
    }

    /// Compensation coordinator sharing this orchestrator's collaborators
    pub fn compensation(&self) -> CompensationCoordinator {
        CompensationCoordinator::new(self.core.clone())
    }

    /// Create and start a saga
    ///
    /// A trigger for an existing saga is a no-op; an instance left in
    /// `Created` by an earlier crash is started.
    pub async fn start(&self, trigger: SagaTrigger) -> SagaResult<SagaKey> {
        let Some(definition) = self.core.registry.lookup(&trigger.saga_type) else {
            self.core.alert(&SagaAlert::UnknownSagaType {
                saga_type: trigger.saga_type.clone(),
                saga_id: trigger.saga_id.clone(),
            });
            return Err(SagaError::UnknownSagaType(trigger.saga_type));
        };

        let key = trigger.key();
        let instance = SagaInstance::new(&definition, trigger);
        match self.core.store.create(&instance).await {
            Ok(version) => info!(
                saga_type = %key.saga_type,
                saga_id = %key.saga_id,
                instance_id = %instance.id,
                version,
                "Saga instance created"
            ),
            Err(SagaError::DuplicateSagaId { .. }) => debug!(
                saga_type = %key.saga_type,
                saga_id = %key.saga_id,
                "Saga already exists"
            ),
            Err(err) => return Err(err),
        }

        let finished = self.core.apply(&key, transition::start).await?;
        if let EventDisposition::Discarded(reason) = &finished.disposition {
            debug!(saga_type = %key.saga_type, saga_id = %key.saga_id, reason = %reason, "Start ignored");
        }
        Ok(key)
    }

    /// Apply an inbound event
    pub async fn handle_event(&self, envelope: SagaEventEnvelope) -> SagaResult<EventDisposition> {
        if envelope.payload.is_compensation() {
            return self.compensation().handle_event(envelope).await;
        }

        let key = envelope.key();
        debug!(
            saga_type = %key.saga_type,
            saga_id = %key.saga_id,
            event = envelope.payload.name(),
            event_id = %envelope.event_id,
            "Handling saga event"
        );

        let finished = match self
            .core
            .apply(&key, |instance, ctx| transition::decide(instance, &envelope, ctx))
            .await
        {
            Ok(finished) => finished,
            Err(err) if err.is_not_found() => {
                warn!(
                    saga_type = %key.saga_type,
                    saga_id = %key.saga_id,
                    event = envelope.payload.name(),
                    "Event for unknown saga discarded"
                );
                return Ok(EventDisposition::Discarded(DiscardReason::UnknownSaga));
            }
            Err(err) => return Err(err),
        };

        if !finished.begin_compensation {
            return Ok(finished.disposition);
        }

        // The failure is persisted; a rollback that cannot start now is picked
        // up by the supervisor's stranded-rollback scan.
        match self.compensation().begin(&key).await {
            Ok(EventDisposition::Applied { version }) => Ok(EventDisposition::Applied { version }),
            Ok(EventDisposition::Discarded(_)) => Ok(finished.disposition),
            Err(err) => {
                error!(
                    saga_type = %key.saga_type,
                    saga_id = %key.saga_id,
                    error = %err,
                    "Could not begin compensation"
                );
                Ok(finished.disposition)
            }
        }
    }

    /// Request cancellation of a saga
    pub async fn cancel(&self, key: &SagaKey, reason: impl Into<String>) -> SagaResult<EventDisposition> {
        self.handle_event(SagaEventEnvelope::cancel_requested(key, reason))
            .await
    }

    /// Current state of a saga
    pub async fn status(&self, key: &SagaKey) -> SagaResult<SagaInstance> {
        self.core.store.load(key).await
    }

    /// Operator action: retry a frozen compensation
    pub async fn resume(&self, key: &SagaKey) -> SagaResult<EventDisposition> {
        self.compensation().resume(key).await
    }

    /// Register for every event type the engine consumes
    pub async fn subscribe(self: &Arc<Self>) -> SagaResult<()> {
        for event_type in ALL_EVENT_TYPES {
            let handler: Arc<dyn SagaEventHandler> = self.clone();
            self.core.gateway.subscribe(event_type, handler).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SagaEventHandler for SagaOrchestrator {
    async fn handle(&self, envelope: SagaEventEnvelope) -> SagaResult<EventDisposition> {
        self.handle_event(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SagaDefinition, StepDefinition};
    use crate::gateway::{CommandKind, InMemoryGateway, MockCommandGateway};
    use crate::instance::{SagaStatus, StepStatus};
    use crate::observer::{LifecycleKind, RecordingObserver};
    use crate::state_bag::StateBag;
    use crate::store::InMemorySagaStore;

    fn registry() -> Arc<SagaDefinitionRegistry> {
        let mut registry = SagaDefinitionRegistry::new();
        registry
            .register(
                SagaDefinition::new("order")
                    .with_step(StepDefinition::new("reserve", "Reserve", "inventory").with_compensation("Release"))
                    .with_step(StepDefinition::new("charge", "Charge", "payments")),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn engine() -> (SagaOrchestrator, InMemoryGateway, RecordingObserver) {
        let gateway = InMemoryGateway::new();
        let observer = RecordingObserver::new();
        let orchestrator = SagaOrchestrator::new(
            registry(),
            Arc::new(InMemorySagaStore::new()),
            Arc::new(gateway.clone()),
        )
        .with_observer(Arc::new(observer.clone()));
        (orchestrator, gateway, observer)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (orchestrator, gateway, _) = engine();
        let key = orchestrator.start(SagaTrigger::new("order", "O-1")).await.unwrap();
        orchestrator.start(SagaTrigger::new("order", "O-1")).await.unwrap();

        let instance = orchestrator.status(&key).await.unwrap();
        assert_eq!(instance.status, SagaStatus::Running);
        assert_eq!(instance.version, 2);
        assert_eq!(gateway.dispatched().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_saga_type_alerts() {
        let (orchestrator, _, observer) = engine();
        let err = orchestrator.start(SagaTrigger::new("ghost", "G-1")).await.unwrap_err();
        assert_eq!(err, SagaError::UnknownSagaType("ghost".to_string()));
        assert_eq!(observer.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_event_for_unknown_saga_discarded() {
        let (orchestrator, _, _) = engine();
        let disposition = orchestrator
            .handle_event(SagaEventEnvelope::step_succeeded(&SagaKey::new("order", "nope"), 0, StateBag::new()))
            .await
            .unwrap();
        assert_eq!(disposition, EventDisposition::Discarded(DiscardReason::UnknownSaga));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_one_call() {
        let (orchestrator, gateway, observer) = engine();
        let key = orchestrator.start(SagaTrigger::new("order", "O-2")).await.unwrap();
        orchestrator
            .handle_event(SagaEventEnvelope::step_succeeded(&key, 0, StateBag::new()))
            .await
            .unwrap();
        orchestrator
            .handle_event(SagaEventEnvelope::step_rejected(&key, 1, "card blocked"))
            .await
            .unwrap();

        let instance = orchestrator.status(&key).await.unwrap();
        assert_eq!(instance.status, SagaStatus::Compensating);
        let release = gateway.last_command(&key, CommandKind::Compensation).await.unwrap();
        assert_eq!(release.action_type, "Release");

        orchestrator.handle_event(release.succeeded(StateBag::new())).await.unwrap();
        let instance = orchestrator.status(&key).await.unwrap();
        assert_eq!(instance.status, SagaStatus::Compensated);
        assert_eq!(instance.steps[0].status, StepStatus::Compensated);
        assert!(observer.kinds_for(&key).contains(&LifecycleKind::Compensated));
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_persisted_state() {
        let mut gateway = MockCommandGateway::new();
        gateway
            .expect_dispatch()
            .times(1)
            .returning(|_, _| Err(SagaError::Transport("broker down".to_string())));

        let orchestrator = SagaOrchestrator::new(
            registry(),
            Arc::new(InMemorySagaStore::new()),
            Arc::new(gateway),
        );
        let key = orchestrator.start(SagaTrigger::new("order", "O-3")).await.unwrap();

        let instance = orchestrator.status(&key).await.unwrap();
        assert_eq!(instance.status, SagaStatus::Running);
        assert_eq!(instance.steps[0].status, StepStatus::Running);
        assert!(instance.steps[0].deadline.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_registers_every_event_type() {
        let mut gateway = MockCommandGateway::new();
        gateway
            .expect_subscribe()
            .times(ALL_EVENT_TYPES.len())
            .returning(|_, _| Ok(()));

        let orchestrator = Arc::new(SagaOrchestrator::new(
            registry(),
            Arc::new(InMemorySagaStore::new()),
            Arc::new(gateway),
        ));
        orchestrator.subscribe().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_any_step_completes() {
        let (orchestrator, _, _) = engine();
        let key = orchestrator.start(SagaTrigger::new("order", "O-4")).await.unwrap();
        orchestrator.cancel(&key, "changed mind").await.unwrap();

        let instance = orchestrator.status(&key).await.unwrap();
        assert_eq!(instance.status, SagaStatus::Cancelled);
        assert_eq!(instance.steps[0].status, StepStatus::Failed);
    }
}
