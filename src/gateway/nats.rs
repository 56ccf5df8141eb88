// Copyright 2025 Cowboy AI, LLC.

//! Core NATS gateway
//!
//! Commands are published as JSON to `{prefix}.cmd.{action_type}` with the
//! correlation id in a header; outcome events are consumed as JSON from
//! `{prefix}.evt.{event_type}`, optionally through a queue group so replicas
//! share the load.

use super::{CommandGateway, SagaCommand, SagaEventHandler};
use crate::config::GatewayConfig;
use crate::errors::{SagaError, SagaResult};
use crate::events::SagaEventEnvelope;
use crate::identifiers::CorrelationId;
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Header carrying the saga correlation id
pub const CORRELATION_HEADER: &str = "Saga-Correlation-Id";

/// Gateway over core NATS subjects
pub struct NatsGateway {
    client: Client,
    config: GatewayConfig,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for NatsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsGateway")
            .field("config", &self.config)
            .finish()
    }
}

impl NatsGateway {
    /// Create a gateway on an established connection
    pub fn new(client: Client, config: GatewayConfig) -> Self {
        Self {
            client,
            config,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subject a command is published on
    pub fn command_subject(&self, action_type: &str) -> String {
        format!("{}.cmd.{}", self.config.subject_prefix, action_type)
    }

    /// Subject events of a type are consumed from
    pub fn event_subject(&self, event_type: &str) -> String {
        format!("{}.evt.{}", self.config.subject_prefix, event_type)
    }

    /// Publish an outcome event, as a domain service would
    pub async fn publish_event(&self, envelope: &SagaEventEnvelope) -> SagaResult<()> {
        let subject = self.event_subject(envelope.event_type());
        let payload = Bytes::from(serde_json::to_vec(envelope)?);
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| SagaError::Transport(format!("Failed to publish event: {e}")))
    }

    /// Stop every subscription task
    pub async fn shutdown(&self) {
        for task in self.subscriptions.lock().await.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl CommandGateway for NatsGateway {
    async fn dispatch(&self, correlation_id: &CorrelationId, command: SagaCommand) -> SagaResult<()> {
        let subject = self.command_subject(&command.action_type);
        let payload = Bytes::from(serde_json::to_vec(&command)?);

        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, correlation_id.as_str());

        self.client
            .publish_with_headers(subject.clone(), headers, payload)
            .await
            .map_err(|e| SagaError::Transport(format!("Failed to publish to {subject}: {e}")))?;

        debug!(
            subject = %subject,
            saga_id = %command.saga_id,
            step_index = command.step_index,
            attempt = command.attempt,
            "Command published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn SagaEventHandler>,
    ) -> SagaResult<()> {
        let subject = self.event_subject(event_type);
        let subscriber = match &self.config.queue_group {
            Some(group) => self.client.queue_subscribe(subject.clone(), group.clone()).await,
            None => self.client.subscribe(subject.clone()).await,
        }
        .map_err(|e| SagaError::Transport(format!("Failed to subscribe to {subject}: {e}")))?;

        info!(subject = %subject, "Subscribed to saga events");

        let task = tokio::spawn(async move {
            let mut subscriber = subscriber;
            while let Some(message) = subscriber.next().await {
                let envelope: SagaEventEnvelope = match serde_json::from_slice(&message.payload) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(subject = %message.subject, error = %err, "Dropping malformed saga event");
                        continue;
                    }
                };
                if let Err(err) = handler.handle(envelope).await {
                    warn!(subject = %message.subject, error = %err, "Saga event handling failed");
                }
            }
        });
        self.subscriptions.lock().await.push(task);
        Ok(())
    }
}
