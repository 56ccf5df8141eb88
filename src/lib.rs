// Copyright 2025 Cowboy AI, LLC.

//! # Saga Orchestrator
//!
//! Orchestration engine for long-running, multi-step business workflows that
//! span independently-owned services.
//!
//! A saga is an ordered list of steps. Each step is dispatched as a command to
//! a service and completed by an outcome event. When a mandatory step fails for
//! good, the steps that already completed are undone in reverse order by their
//! compensating actions.
//!
//! - **Definitions**: [`SagaDefinition`] catalogued in a [`SagaDefinitionRegistry`]
//! - **Instances**: [`SagaInstance`] persisted with optimistic versions in a
//!   [`SagaInstanceStore`] (in memory or NATS JetStream KV)
//! - **Transport**: [`CommandGateway`] for outbound commands and inbound
//!   [`SagaEventEnvelope`]s (in memory, in-process [`ActionRouter`], or NATS)
//! - **Engine**: [`SagaOrchestrator`] for forward progress,
//!   [`CompensationCoordinator`] for rollback, [`TimeoutSupervisor`] for
//!   deadlines
//!
//! ## Guarantees
//!
//! 1. **Persist before effects**: commands and notifications are emitted only
//!    after the state change they follow has been stored
//! 2. **At-least-once safe**: duplicate, stale and out-of-order events are
//!    discarded without changing state
//! 3. **Concurrency safe**: every write is a compare-and-swap on the instance
//!    version, so any number of engine replicas may share a store
//! 4. **Reverse rollback**: completed steps are compensated strictly in reverse
//!    order, one at a time
//!
//! ## Example
//!
//! ```no_run
//! use saga_orchestrator::{
//!     InMemoryGateway, InMemorySagaStore, SagaDefinition, SagaDefinitionRegistry,
//!     SagaOrchestrator, SagaTrigger, StepDefinition,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> saga_orchestrator::SagaResult<()> {
//! let mut registry = SagaDefinitionRegistry::new();
//! registry.register(
//!     SagaDefinition::new("order")
//!         .with_step(StepDefinition::new("reserve", "ReserveStock", "inventory").with_compensation("ReleaseStock"))
//!         .with_step(StepDefinition::new("charge", "ChargeCard", "payments")),
//! )?;
//!
//! let orchestrator = SagaOrchestrator::new(
//!     Arc::new(registry),
//!     Arc::new(InMemorySagaStore::new()),
//!     Arc::new(InMemoryGateway::new()),
//! );
//! let key = orchestrator.start(SagaTrigger::new("order", "ORD-1")).await?;
//! println!("{:?}", orchestrator.status(&key).await?.status);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod compensation;
pub mod config;
pub mod definition;
mod effects;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod identifiers;
pub mod instance;
pub mod metrics;
pub mod nats;
pub mod observer;
pub mod orchestrator;
pub mod registry;
pub mod state_bag;
pub mod state_machine;
pub mod store;
pub mod supervisor;
pub mod transition;
pub mod workflows;

pub use compensation::CompensationCoordinator;
pub use config::{
    AppliedEventWindow, EngineConfig, GatewayConfig, KvStoreConfig, RetryPolicy, SupervisorConfig,
};
pub use definition::{definition_schema, SagaDefinition, StepDefinition, MAX_TIMEOUT_MS};
pub use errors::{SagaError, SagaResult};
pub use events::{SagaEventEnvelope, SagaEventPayload};
pub use gateway::{
    ActionHandler, ActionResult, ActionRouter, CommandGateway, CommandKind, InMemoryGateway,
    NatsGateway, SagaCommand, SagaEventHandler,
};
pub use identifiers::{CorrelationId, SagaInstanceId, SagaKey};
pub use instance::{AuditEntry, SagaInstance, SagaStatus, SagaStepState, SagaTrigger, StepStatus};
pub use metrics::{MetricsSummary, MetricsTimer, StoreMetrics};
pub use nats::NatsConfig;
pub use observer::{
    CompositeObserver, LifecycleKind, NoOpObserver, RecordingObserver, SagaAlert,
    SagaNotification, SagaObserver, TracingObserver,
};
pub use orchestrator::SagaOrchestrator;
pub use registry::SagaDefinitionRegistry;
pub use state_bag::{SagaData, StateBag};
pub use state_machine::{State, StateTransition, StateTransitions};
pub use store::{
    InMemorySagaStore, InstrumentedSagaStore, NatsKvSagaStore, SagaInstanceStore,
};
pub use supervisor::{ScanReport, SupervisorHandle, TimeoutSupervisor};
pub use transition::{DiscardReason, EventDisposition, SagaTransitionOutput};
