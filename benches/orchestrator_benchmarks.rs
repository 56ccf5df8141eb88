// Copyright 2025 Cowboy AI, LLC.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use saga_orchestrator::transition::{self, TransitionContext};
use saga_orchestrator::{
    CommandKind, InMemoryGateway, InMemorySagaStore, SagaDefinition, SagaDefinitionRegistry,
    SagaEventEnvelope, SagaInstance, SagaOrchestrator, SagaTrigger, StateBag, StepDefinition,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn setup_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn definition(steps: usize) -> SagaDefinition {
    (0..steps).fold(SagaDefinition::new("bench"), |definition, i| {
        definition.with_step(
            StepDefinition::new(format!("step-{i}"), format!("Do{i}"), "svc")
                .with_compensation(format!("Undo{i}")),
        )
    })
}

fn benchmark_decide(c: &mut Criterion) {
    let definition = definition(8);
    let ctx = TransitionContext::new(&definition, 64);

    let mut started = SagaInstance::new(&definition, SagaTrigger::new("bench", "B-0"));
    transition::start(&mut started, &ctx).unwrap();
    let key = started.key();

    c.bench_function("decide_step_succeeded", |b| {
        b.iter(|| {
            let mut instance = started.clone();
            let event = SagaEventEnvelope::step_succeeded(&key, 0, StateBag::new());
            black_box(transition::decide(&mut instance, &event, &ctx).unwrap())
        })
    });

    c.bench_function("decide_duplicate", |b| {
        let event = SagaEventEnvelope::step_succeeded(&key, 0, StateBag::new());
        let mut applied = started.clone();
        transition::decide(&mut applied, &event, &ctx).unwrap();
        b.iter(|| {
            let mut instance = applied.clone();
            black_box(transition::decide(&mut instance, &event, &ctx).unwrap())
        })
    });
}

fn benchmark_saga_lifecycle(c: &mut Criterion) {
    let rt = setup_runtime();
    let mut group = c.benchmark_group("saga_lifecycle");

    for steps in [1usize, 4, 16] {
        let mut registry = SagaDefinitionRegistry::new();
        registry.register(definition(steps)).unwrap();
        let registry = Arc::new(registry);

        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, &steps| {
            b.to_async(&rt).iter(|| {
                let registry = registry.clone();
                async move {
                    let gateway = InMemoryGateway::new();
                    let orchestrator = SagaOrchestrator::new(
                        registry,
                        Arc::new(InMemorySagaStore::new()),
                        Arc::new(gateway.clone()),
                    );
                    let key = orchestrator
                        .start(SagaTrigger::new("bench", "B-1"))
                        .await
                        .unwrap();
                    for _ in 0..steps {
                        let command = gateway.last_command(&key, CommandKind::Step).await.unwrap();
                        orchestrator
                            .handle_event(command.succeeded(StateBag::new()))
                            .await
                            .unwrap();
                    }
                    black_box(key)
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_decide, benchmark_saga_lifecycle);
criterion_main!(benches);
