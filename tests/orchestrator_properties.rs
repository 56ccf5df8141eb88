// Copyright 2025 Cowboy AI, LLC.

//! Behavioural properties of the orchestrator, compensation and supervisor

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use saga_orchestrator::{
    CommandKind, EventDisposition, InMemoryGateway, InMemorySagaStore, SagaDefinition,
    SagaDefinitionRegistry, SagaError, SagaEventEnvelope, SagaInstanceStore, SagaKey,
    SagaOrchestrator, SagaStatus, SagaTrigger, StateBag, StepDefinition, StepStatus,
    TimeoutSupervisor,
};
use std::sync::Arc;

struct Engine {
    orchestrator: Arc<SagaOrchestrator>,
    store: Arc<InMemorySagaStore>,
    gateway: InMemoryGateway,
}

fn engine(definition: SagaDefinition) -> Engine {
    let mut registry = SagaDefinitionRegistry::new();
    registry.register(definition).unwrap();
    let store = Arc::new(InMemorySagaStore::new());
    let gateway = InMemoryGateway::new();
    let orchestrator = SagaOrchestrator::new(Arc::new(registry), store.clone(), Arc::new(gateway.clone()));
    Engine {
        orchestrator: Arc::new(orchestrator),
        store,
        gateway,
    }
}

/// Definition with one compensable step per entry, optional where flagged
fn generated(optional: &[bool], max_retries: u32) -> SagaDefinition {
    optional
        .iter()
        .enumerate()
        .fold(
            SagaDefinition::new("generated").with_max_retries(max_retries),
            |definition, (i, is_optional)| {
                let step = StepDefinition::new(format!("step-{i}"), format!("Do{i}"), "svc")
                    .with_compensation(format!("Undo{i}"));
                definition.with_step(if *is_optional { step.optional() } else { step })
            },
        )
}

/// Answer the latest step command with success
async fn succeed_current(engine: &Engine, key: &SagaKey) -> EventDisposition {
    let command = engine.gateway.last_command(key, CommandKind::Step).await.unwrap();
    engine
        .orchestrator
        .handle_event(command.succeeded(StateBag::new()))
        .await
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_full_success_completes(optional in prop::collection::vec(any::<bool>(), 1..7)) {
        let steps = optional.len();
        let engine = engine(generated(&optional, 2));
        let instance = tokio_test::block_on(async {
            let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-1")).await.unwrap();
            for _ in 0..steps {
                assert!(succeed_current(&engine, &key).await.is_applied());
            }
            engine.orchestrator.status(&key).await.unwrap()
        });

        prop_assert_eq!(instance.status, SagaStatus::Completed);
        prop_assert_eq!(instance.current_step_index, steps);
        prop_assert!(instance.steps.iter().all(|s| s.status == StepStatus::Completed));
        prop_assert!(instance.completed_at.is_some());
    }

    #[test]
    fn prop_compensation_runs_in_reverse(steps in 2usize..7, fail_at_seed in any::<prop::sample::Index>()) {
        let fail_at = 1 + fail_at_seed.index(steps - 1);
        let engine = engine(generated(&vec![false; steps], 0));

        let (order, instance) = tokio_test::block_on(async {
            let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-2")).await.unwrap();
            for _ in 0..fail_at {
                succeed_current(&engine, &key).await;
            }
            let command = engine.gateway.last_command(&key, CommandKind::Step).await.unwrap();
            engine.orchestrator.handle_event(command.failed("boom")).await.unwrap();

            let mut order = Vec::new();
            loop {
                let instance = engine.orchestrator.status(&key).await.unwrap();
                if instance.status != SagaStatus::Compensating {
                    break;
                }
                let command = engine.gateway.last_command(&key, CommandKind::Compensation).await.unwrap();
                order.push(command.step_index);
                engine.orchestrator.handle_event(command.succeeded(StateBag::new())).await.unwrap();
            }
            (order, engine.orchestrator.status(&key).await.unwrap())
        });

        let expected: Vec<usize> = (0..fail_at).rev().collect();
        prop_assert_eq!(order, expected);
        prop_assert_eq!(instance.status, SagaStatus::Compensated);
        prop_assert!(instance.steps[..fail_at].iter().all(|s| s.status == StepStatus::Compensated && s.was_compensated));
        prop_assert_eq!(instance.steps[fail_at].status, StepStatus::Failed);
    }
}

#[tokio::test]
async fn test_replayed_event_is_a_no_op() {
    let engine = engine(generated(&[false, false], 1));
    let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-3")).await.unwrap();

    let command = engine.gateway.last_command(&key, CommandKind::Step).await.unwrap();
    let event = command.succeeded(StateBag::new());
    assert!(engine.orchestrator.handle_event(event.clone()).await.unwrap().is_applied());

    let before = engine.store.load(&key).await.unwrap();
    let replay = engine.orchestrator.handle_event(event).await.unwrap();
    let after = engine.store.load(&key).await.unwrap();

    assert!(matches!(replay, EventDisposition::Discarded(_)));
    assert_eq!(before, after);
    assert_eq!(engine.gateway.commands_for(&key).await.len(), 2);
}

#[tokio::test]
async fn test_optional_step_failure_is_skipped() {
    let engine = engine(generated(&[false, true, false], 0));
    let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-4")).await.unwrap();

    succeed_current(&engine, &key).await;
    let optional = engine.gateway.last_command(&key, CommandKind::Step).await.unwrap();
    assert_eq!(optional.step_index, 1);
    engine.orchestrator.handle_event(optional.failed("unavailable")).await.unwrap();
    succeed_current(&engine, &key).await;

    let instance = engine.orchestrator.status(&key).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Completed);
    assert_eq!(instance.steps[1].status, StepStatus::Skipped);
    assert_eq!(instance.steps[1].error_message.as_deref(), Some("unavailable"));
}

#[tokio::test]
async fn test_concurrent_writers_one_cas_wins() {
    let engine = engine(generated(&[false], 0));
    let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-5")).await.unwrap();
    let read = engine.store.load(&key).await.unwrap();

    let mut first = read.clone();
    first.record(None, "writer one");
    let mut second = read.clone();
    second.record(None, "writer two");

    let (a, b) = tokio::join!(
        engine.store.compare_and_swap(&first, read.version),
        engine.store.compare_and_swap(&second, read.version),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(SagaError::VersionConflict { .. }))));
    assert_eq!(engine.store.load(&key).await.unwrap().version, read.version + 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_advance_once() {
    let engine = engine(generated(&[false, false], 0));
    let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-6")).await.unwrap();

    // Two copies of the same outcome with distinct event ids
    let one = SagaEventEnvelope::step_succeeded(&key, 0, StateBag::new());
    let two = SagaEventEnvelope::step_succeeded(&key, 0, StateBag::new());
    let (a, b) = tokio::join!(
        engine.orchestrator.handle_event(one),
        engine.orchestrator.handle_event(two),
    );

    let applied = [a.unwrap(), b.unwrap()].iter().filter(|d| d.is_applied()).count();
    assert_eq!(applied, 1);
    let instance = engine.store.load(&key).await.unwrap();
    assert_eq!(instance.current_step_index, 1);
    assert_eq!(engine.gateway.commands_for(&key).await.len(), 2);
}

#[tokio::test]
async fn test_step_timeouts_exhaust_retries_then_compensate() {
    let definition = SagaDefinition::new("timed")
        .with_max_retries(3)
        .with_default_timeout_ms(1_000)
        .with_step(StepDefinition::new("book", "Book", "svc").with_compensation("Unbook"))
        .with_step(StepDefinition::new("confirm", "Confirm", "svc"));
    let engine = engine(definition);
    let supervisor = TimeoutSupervisor::new(engine.orchestrator.clone());

    let key = engine.orchestrator.start(SagaTrigger::new("timed", "T-1")).await.unwrap();
    succeed_current(&engine, &key).await;

    for expected in 1..=3 {
        let report = supervisor.scan_once(Utc::now() + Duration::hours(1)).await.unwrap();
        assert_eq!(report.step_timeouts, 1);
        let instance = engine.store.load(&key).await.unwrap();
        assert_eq!(instance.status, SagaStatus::Running);
        assert_eq!(instance.retry_count, expected);
    }

    supervisor.scan_once(Utc::now() + Duration::hours(1)).await.unwrap();
    let instance = engine.store.load(&key).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Compensating);
    assert_eq!(instance.steps[1].status, StepStatus::Failed);
    assert!(instance
        .transitions
        .iter()
        .any(|t| t.from == SagaStatus::Running && t.to == SagaStatus::Failed));

    let unbook = engine
        .gateway
        .last_command(&key, CommandKind::Compensation)
        .await
        .unwrap();
    assert_eq!(unbook.action_type, "Unbook");
    // Confirm was dispatched once plus three retries
    let confirms = engine
        .gateway
        .commands_for(&key)
        .await
        .into_iter()
        .filter(|c| c.action_type == "Confirm")
        .count();
    assert_eq!(confirms, 4);
}

#[tokio::test]
async fn test_stale_timeout_after_success_is_discarded() {
    let engine = engine(generated(&[false, false], 3));
    let key = engine.orchestrator.start(SagaTrigger::new("generated", "G-7")).await.unwrap();
    succeed_current(&engine, &key).await;

    let late = SagaEventEnvelope::step_timed_out(&key, 0, 0);
    let disposition = engine.orchestrator.handle_event(late).await.unwrap();
    assert!(!disposition.is_applied());
    assert_eq!(engine.store.load(&key).await.unwrap().retry_count, 0);
}
