// Copyright 2025 Cowboy AI, LLC.

//! Command/event gateway
//!
//! The engine talks to domain services only through [`CommandGateway`]:
//! it dispatches [`SagaCommand`]s and registers a [`SagaEventHandler`] for
//! the outcome events. Delivery is at-least-once in both directions.

mod memory;
mod nats;
mod router;

pub use memory::InMemoryGateway;
pub use nats::NatsGateway;
pub use router::{ActionHandler, ActionResult, ActionRouter};

use crate::errors::SagaResult;
use crate::events::SagaEventEnvelope;
use crate::identifiers::{CorrelationId, SagaKey};
use crate::state_bag::StateBag;
use crate::transition::EventDisposition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Whether a command runs a step or undoes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Forward step
    Step,
    /// Compensating action
    Compensation,
}

/// Command sent to a domain service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCommand {
    /// Unique per dispatch
    pub command_id: Uuid,
    /// Step or compensation
    pub kind: CommandKind,
    /// Saga type
    pub saga_type: String,
    /// Business correlation key
    pub saga_id: String,
    /// Step the command belongs to
    pub step_index: usize,
    /// Step name from the definition
    pub step_name: String,
    /// Action type (the compensation action type for compensations)
    pub action_type: String,
    /// Logical service that handles the command
    pub service_endpoint: String,
    /// Attempt number; outcome events echo it back
    pub attempt: u32,
    /// Saga state at dispatch time
    pub payload: StateBag,
    /// Correlation id of the saga
    pub correlation_id: CorrelationId,
    /// When the command was issued
    pub issued_at: DateTime<Utc>,
}

impl SagaCommand {
    /// Key of the saga that issued the command
    pub fn key(&self) -> SagaKey {
        SagaKey::new(self.saga_type.clone(), self.saga_id.clone())
    }

    fn reply(&self, event: SagaEventEnvelope) -> SagaEventEnvelope {
        event
            .with_attempt(self.attempt)
            .with_correlation_id(self.correlation_id.clone())
    }

    /// Outcome event reporting success
    pub fn succeeded(&self, output: StateBag) -> SagaEventEnvelope {
        let key = self.key();
        let event = match self.kind {
            CommandKind::Step => SagaEventEnvelope::step_succeeded(&key, self.step_index, output),
            CommandKind::Compensation => {
                SagaEventEnvelope::compensation_succeeded(&key, self.step_index)
            }
        };
        self.reply(event)
    }

    /// Outcome event reporting a retryable failure
    pub fn failed(&self, error: impl Into<String>) -> SagaEventEnvelope {
        let key = self.key();
        let event = match self.kind {
            CommandKind::Step => SagaEventEnvelope::step_failed(&key, self.step_index, error),
            CommandKind::Compensation => {
                SagaEventEnvelope::compensation_failed(&key, self.step_index, error)
            }
        };
        self.reply(event)
    }

    /// Outcome event reporting a business rejection
    ///
    /// Compensations cannot be rejected; a rejected compensation is reported
    /// as a failure.
    pub fn rejected(&self, reason: impl Into<String>) -> SagaEventEnvelope {
        let key = self.key();
        let event = match self.kind {
            CommandKind::Step => SagaEventEnvelope::step_rejected(&key, self.step_index, reason),
            CommandKind::Compensation => {
                SagaEventEnvelope::compensation_failed(&key, self.step_index, reason)
            }
        };
        self.reply(event)
    }
}

/// Consumes inbound saga events
#[async_trait]
pub trait SagaEventHandler: Send + Sync {
    /// Apply one event
    async fn handle(&self, envelope: SagaEventEnvelope) -> SagaResult<EventDisposition>;
}

/// Message transport between the engine and domain services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Publish a command; fire-and-forget
    async fn dispatch(&self, correlation_id: &CorrelationId, command: SagaCommand) -> SagaResult<()>;

    /// Route every event of `event_type` to `handler`
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn SagaEventHandler>,
    ) -> SagaResult<()>;
}
