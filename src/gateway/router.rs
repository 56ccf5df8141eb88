// Copyright 2025 Cowboy AI, LLC.

//! In-process action router
//!
//! Maps action-type strings to async handler functions, resolved once at
//! startup. Dispatching a command spawns its handler; the handler's result is
//! turned into an outcome event and fed back to the subscribed event
//! handlers, exactly as a remote service would answer over the wire.

use super::{CommandGateway, SagaCommand, SagaEventHandler};
use crate::errors::{SagaError, SagaResult};
use crate::events::SagaEventEnvelope;
use crate::identifiers::CorrelationId;
use crate::state_bag::StateBag;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What an action handler reports back
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    /// Done; the bag is merged into the saga state
    Succeeded(StateBag),
    /// Failed; the engine may retry
    Failed(String),
    /// Refused on business grounds; never retried
    Rejected(String),
}

/// Type-erased action handler
pub type ActionHandler = Arc<dyn Fn(SagaCommand) -> BoxFuture<'static, ActionResult> + Send + Sync>;

type Subscribers = HashMap<String, Vec<Arc<dyn SagaEventHandler>>>;

/// Gateway that executes commands in-process
#[derive(Default)]
pub struct ActionRouter {
    handlers: HashMap<String, ActionHandler>,
    subscribers: Arc<RwLock<Subscribers>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRouter")
            .field("action_types", &self.action_types())
            .finish()
    }
}

impl ActionRouter {
    /// Create a router without handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for an action type
    pub fn register<F, Fut>(&mut self, action_type: impl Into<String>, handler: F) -> SagaResult<()>
    where
        F: Fn(SagaCommand) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        let action_type = action_type.into();
        if self.handlers.contains_key(&action_type) {
            return Err(SagaError::Configuration(format!(
                "handler for {action_type} already registered"
            )));
        }
        let handler: ActionHandler =
            Arc::new(move |command: SagaCommand| -> BoxFuture<'static, ActionResult> {
                Box::pin(handler(command))
            });
        self.handlers.insert(action_type, handler);
        Ok(())
    }

    /// Registered action types, sorted
    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Wait until every spawned handler, including ones spawned meanwhile, has finished
    pub async fn wait_idle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.in_flight.lock().await);
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    warn!(error = %err, "Action handler task panicked");
                }
            }
        }
    }
}

async fn feed_back(subscribers: &RwLock<Subscribers>, envelope: SagaEventEnvelope) {
    let handlers = subscribers
        .read()
        .await
        .get(envelope.event_type())
        .cloned()
        .unwrap_or_default();

    if handlers.is_empty() {
        warn!(event_type = envelope.event_type(), "No subscriber for outcome event");
    }
    for handler in handlers {
        if let Err(err) = handler.handle(envelope.clone()).await {
            warn!(
                saga_type = %envelope.saga_type,
                saga_id = %envelope.saga_id,
                error = %err,
                "Outcome event handler failed"
            );
        }
    }
}

#[async_trait]
impl CommandGateway for ActionRouter {
    async fn dispatch(&self, _correlation_id: &CorrelationId, command: SagaCommand) -> SagaResult<()> {
        let handler = self.handlers.get(&command.action_type).cloned().ok_or_else(|| {
            SagaError::Transport(format!("no handler for action type {}", command.action_type))
        })?;

        debug!(
            saga_type = %command.saga_type,
            saga_id = %command.saga_id,
            step_index = command.step_index,
            action_type = %command.action_type,
            "Routing command in-process"
        );

        let subscribers = self.subscribers.clone();
        let task = tokio::spawn(async move {
            let event = match handler(command.clone()).await {
                ActionResult::Succeeded(output) => command.succeeded(output),
                ActionResult::Failed(error) => command.failed(error),
                ActionResult::Rejected(reason) => command.rejected(reason),
            };
            feed_back(&subscribers, event).await;
        });
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|t| !t.is_finished());
        in_flight.push(task);
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn SagaEventHandler>,
    ) -> SagaResult<()> {
        self.subscribers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SagaEventPayload, STEP_OUTCOME};
    use crate::gateway::CommandKind;
    use crate::transition::EventDisposition;
    use chrono::Utc;
    use uuid::Uuid;

    #[derive(Default)]
    struct Capture(RwLock<Vec<SagaEventEnvelope>>);

    #[async_trait]
    impl SagaEventHandler for Capture {
        async fn handle(&self, envelope: SagaEventEnvelope) -> SagaResult<EventDisposition> {
            self.0.write().await.push(envelope);
            Ok(EventDisposition::Applied { version: 1 })
        }
    }

    fn command(action_type: &str) -> SagaCommand {
        SagaCommand {
            command_id: Uuid::new_v4(),
            kind: CommandKind::Step,
            saga_type: "t".to_string(),
            saga_id: "1".to_string(),
            step_index: 0,
            step_name: "s".to_string(),
            action_type: action_type.to_string(),
            service_endpoint: "svc".to_string(),
            attempt: 0,
            payload: StateBag::new(),
            correlation_id: CorrelationId::new(),
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_routes_and_feeds_back() {
        let mut router = ActionRouter::new();
        router
            .register("Reserve", |_cmd| async {
                let mut out = StateBag::new();
                out.insert("reservation", "R-1").unwrap();
                ActionResult::Succeeded(out)
            })
            .unwrap();
        router
            .register("Charge", |_cmd| async { ActionResult::Rejected("insufficient funds".to_string()) })
            .unwrap();

        let capture = Arc::new(Capture::default());
        router.subscribe(STEP_OUTCOME, capture.clone()).await.unwrap();

        let corr = CorrelationId::new();
        router.dispatch(&corr, command("Reserve")).await.unwrap();
        router.dispatch(&corr, command("Charge")).await.unwrap();
        router.wait_idle().await;

        let events = capture.0.read().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            SagaEventPayload::StepSucceeded { output, .. } if output.contains_key("reservation")
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, SagaEventPayload::StepRejected { .. })));
    }

    #[tokio::test]
    async fn test_finished_handlers_are_reaped() {
        let mut router = ActionRouter::new();
        router
            .register("Reserve", |_cmd| async { ActionResult::Succeeded(StateBag::new()) })
            .unwrap();
        let capture = Arc::new(Capture::default());
        router.subscribe(STEP_OUTCOME, capture.clone()).await.unwrap();

        let corr = CorrelationId::new();
        for sent in 1..=100 {
            router.dispatch(&corr, command("Reserve")).await.unwrap();
            while capture.0.read().await.len() < sent {
                tokio::task::yield_now().await;
            }
        }

        assert!(router.in_flight.lock().await.len() <= 2);
        router.wait_idle().await;
        assert!(router.in_flight.lock().await.is_empty());
        assert_eq!(capture.0.read().await.len(), 100);
    }

    #[tokio::test]
    async fn test_unknown_action_and_duplicate_registration() {
        let mut router = ActionRouter::new();
        router.register("A", |_cmd| async { ActionResult::Failed("x".to_string()) }).unwrap();
        assert!(router.register("A", |_cmd| async { ActionResult::Failed("y".to_string()) }).is_err());
        assert_eq!(router.action_types(), vec!["A".to_string()]);

        let err = router
            .dispatch(&CorrelationId::new(), command("Missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Transport(_)));
    }
}
