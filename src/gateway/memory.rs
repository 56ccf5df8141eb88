// Copyright 2025 Cowboy AI, LLC.

//! In-memory gateway: records commands, delivers events on demand

use super::{CommandGateway, CommandKind, SagaCommand, SagaEventHandler};
use crate::errors::{SagaError, SagaResult};
use crate::events::SagaEventEnvelope;
use crate::identifiers::{CorrelationId, SagaKey};
use crate::transition::EventDisposition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

type Handlers = HashMap<String, Vec<Arc<dyn SagaEventHandler>>>;

/// Gateway that keeps dispatched commands in memory
///
/// Tests inspect [`InMemoryGateway::dispatched`] and play the domain
/// services by calling [`InMemoryGateway::deliver`].
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    dispatched: Arc<RwLock<Vec<SagaCommand>>>,
    handlers: Arc<RwLock<Handlers>>,
    fail_dispatch: Arc<AtomicBool>,
}

impl std::fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGateway")
            .field("fail_dispatch", &self.fail_dispatch.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryGateway {
    /// Create an empty gateway
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command dispatched so far, oldest first
    pub async fn dispatched(&self) -> Vec<SagaCommand> {
        self.dispatched.read().await.clone()
    }

    /// Commands dispatched for one saga
    pub async fn commands_for(&self, key: &SagaKey) -> Vec<SagaCommand> {
        self.dispatched
            .read()
            .await
            .iter()
            .filter(|c| c.saga_type == key.saga_type && c.saga_id == key.saga_id)
            .cloned()
            .collect()
    }

    /// Latest command of the given kind for one saga
    pub async fn last_command(&self, key: &SagaKey, kind: CommandKind) -> Option<SagaCommand> {
        self.commands_for(key)
            .await
            .into_iter()
            .rev()
            .find(|c| c.kind == kind)
    }

    /// Drain the recorded commands
    pub async fn take_dispatched(&self) -> Vec<SagaCommand> {
        std::mem::take(&mut *self.dispatched.write().await)
    }

    /// Make subsequent dispatches fail with a transport error
    pub fn set_fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    /// Hand an event to every handler subscribed to its event type
    pub async fn deliver(&self, envelope: SagaEventEnvelope) -> SagaResult<Vec<EventDisposition>> {
        let handlers = self
            .handlers
            .read()
            .await
            .get(envelope.event_type())
            .cloned()
            .unwrap_or_default();

        let mut dispositions = Vec::with_capacity(handlers.len());
        for handler in handlers {
            dispositions.push(handler.handle(envelope.clone()).await?);
        }
        Ok(dispositions)
    }
}

#[async_trait]
impl CommandGateway for InMemoryGateway {
    async fn dispatch(&self, _correlation_id: &CorrelationId, command: SagaCommand) -> SagaResult<()> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(SagaError::Transport(format!(
                "dispatch of {} refused",
                command.action_type
            )));
        }
        self.dispatched.write().await.push(command);
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn SagaEventHandler>,
    ) -> SagaResult<()> {
        self.handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}
