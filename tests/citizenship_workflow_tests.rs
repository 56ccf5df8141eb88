// Copyright 2025 Cowboy AI, LLC.

//! End-to-end tests of the citizenship workflow on the generic engine

use pretty_assertions::assert_eq;
use saga_orchestrator::workflows::citizenship::{
    self, actions, handle_domain_event, steps, CitizenshipData, CitizenshipEvent,
    CitizenshipOutbox, DomainEventOutcome,
};
use saga_orchestrator::{
    ActionResult, ActionRouter, CommandKind, CompositeObserver, InMemoryGateway,
    InMemorySagaStore, LifecycleKind, RecordingObserver, SagaDefinitionRegistry, SagaKey,
    SagaOrchestrator, SagaStatus, StateBag, StepStatus,
};
use std::sync::Arc;

const APP: &str = "APP-2026-001";

struct Harness {
    orchestrator: Arc<SagaOrchestrator>,
    gateway: InMemoryGateway,
    outbox: CitizenshipOutbox,
    recorder: RecordingObserver,
}

fn harness() -> Harness {
    let mut registry = SagaDefinitionRegistry::new();
    citizenship::register(&mut registry).unwrap();

    let gateway = InMemoryGateway::new();
    let outbox = CitizenshipOutbox::new();
    let recorder = RecordingObserver::new();
    let observer = CompositeObserver::new()
        .with(Arc::new(outbox.clone()))
        .with(Arc::new(recorder.clone()));

    let orchestrator = SagaOrchestrator::new(
        Arc::new(registry),
        Arc::new(InMemorySagaStore::new()),
        Arc::new(gateway.clone()),
    )
    .with_observer(Arc::new(observer));

    Harness {
        orchestrator: Arc::new(orchestrator),
        gateway,
        outbox,
        recorder,
    }
}

fn created() -> CitizenshipEvent {
    CitizenshipEvent::ApplicationCreated {
        saga_id: APP.to_string(),
        application_id: "A".to_string(),
        citizen_id: Some("C-100".to_string()),
    }
}

fn key() -> SagaKey {
    SagaKey::new(citizenship::SAGA_TYPE, APP)
}

async fn feed(h: &Harness, event: CitizenshipEvent) -> DomainEventOutcome {
    handle_domain_event(&h.orchestrator, &event).await.unwrap()
}

async fn dispatched_actions(h: &Harness) -> Vec<String> {
    h.gateway
        .commands_for(&key())
        .await
        .into_iter()
        .map(|c| c.action_type)
        .collect()
}

#[tokio::test]
async fn test_happy_path_completes() {
    let h = harness();

    assert_eq!(feed(&h, created()).await, DomainEventOutcome::Started(key()));
    for event in [
        CitizenshipEvent::ApplicationValidated { saga_id: APP.into() },
        CitizenshipEvent::KycCompleted {
            saga_id: APP.into(),
            is_approved: true,
            rejection_reason: None,
            kyc_reference: Some("KYC-9".into()),
        },
        CitizenshipEvent::PaymentPlanCreated {
            saga_id: APP.into(),
            payment_plan_id: "PP-1".into(),
        },
        CitizenshipEvent::ApplicationApproved { saga_id: APP.into() },
        CitizenshipEvent::PassportIssued {
            saga_id: APP.into(),
            passport_number: "P-123".into(),
        },
        CitizenshipEvent::TravelIdentityIssued {
            saga_id: APP.into(),
            travel_identity_id: "TI-7".into(),
        },
    ] {
        let outcome = feed(&h, event).await;
        assert!(matches!(outcome, DomainEventOutcome::Handled(d) if d.is_applied()));
    }

    let instance = h.orchestrator.status(&key()).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Completed);
    assert_eq!(instance.current_step_index, 6);
    assert!(instance.steps.iter().all(|s| s.status == StepStatus::Completed));

    let data: CitizenshipData = instance.state.to_typed().unwrap();
    assert_eq!(data.application_id, "A");
    assert_eq!(data.kyc_reference.as_deref(), Some("KYC-9"));
    assert_eq!(data.payment_plan_id.as_deref(), Some("PP-1"));
    assert_eq!(data.passport_number.as_deref(), Some("P-123"));
    assert_eq!(data.travel_identity_id.as_deref(), Some("TI-7"));

    assert_eq!(
        dispatched_actions(&h).await,
        vec![
            actions::VALIDATE_APPLICATION,
            actions::SCREEN_APPLICANT,
            actions::CREATE_PAYMENT_PLAN,
            actions::APPROVE_APPLICATION,
            actions::ISSUE_PASSPORT,
            actions::ISSUE_TRAVEL_IDENTITY,
        ]
    );
    assert!(h.outbox.published().is_empty());
    assert_eq!(h.recorder.kinds_for(&key()).last(), Some(&LifecycleKind::Completed));
}

#[tokio::test]
async fn test_kyc_rejection_rolls_back_validation() {
    let h = harness();
    h.orchestrator.subscribe().await.unwrap();

    feed(&h, created()).await;
    feed(&h, CitizenshipEvent::ApplicationValidated { saga_id: APP.into() }).await;
    feed(
        &h,
        CitizenshipEvent::KycCompleted {
            saga_id: APP.into(),
            is_approved: false,
            rejection_reason: Some("sanctions-match".into()),
            kyc_reference: None,
        },
    )
    .await;

    assert_eq!(
        h.outbox.published(),
        vec![CitizenshipEvent::ApplicationRejected {
            saga_id: APP.into(),
            reason: "sanctions-match".into(),
        }]
    );

    let instance = h.orchestrator.status(&key()).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Compensating);
    // Rejection is final: no retry of the screening
    assert_eq!(instance.retry_count, 0);
    assert_eq!(instance.steps[steps::KYC].status, StepStatus::Failed);

    let revert = h
        .gateway
        .last_command(&key(), CommandKind::Compensation)
        .await
        .unwrap();
    assert_eq!(revert.action_type, actions::REVERT_APPLICATION_VALIDATION);
    assert_eq!(revert.step_index, steps::VALIDATE);

    // The applications service confirms the revert over the gateway
    let dispositions = h.gateway.deliver(revert.succeeded(StateBag::new())).await.unwrap();
    assert!(dispositions.iter().all(|d| d.is_applied()));

    let instance = h.orchestrator.status(&key()).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Compensated);
    assert_eq!(instance.steps[steps::VALIDATE].status, StepStatus::Compensated);
    assert!(instance.steps[steps::VALIDATE].was_compensated);

    let sent = dispatched_actions(&h).await;
    assert!(!sent.iter().any(|a| a == actions::ISSUE_PASSPORT));
    assert!(!sent.iter().any(|a| a == actions::CLEAR_KYC_RECORD));
    assert_eq!(h.recorder.kinds_for(&key()).last(), Some(&LifecycleKind::Compensated));
}

#[tokio::test]
async fn test_cancellation_compensates_in_reverse() {
    let h = harness();
    h.orchestrator.subscribe().await.unwrap();

    feed(&h, created()).await;
    feed(&h, CitizenshipEvent::ApplicationValidated { saga_id: APP.into() }).await;
    feed(
        &h,
        CitizenshipEvent::KycCompleted {
            saga_id: APP.into(),
            is_approved: true,
            rejection_reason: None,
            kyc_reference: None,
        },
    )
    .await;
    feed(
        &h,
        CitizenshipEvent::PaymentPlanCreated {
            saga_id: APP.into(),
            payment_plan_id: "PP-2".into(),
        },
    )
    .await;
    feed(
        &h,
        CitizenshipEvent::ApplicationCancelled {
            saga_id: APP.into(),
            reason: "withdrawn by applicant".into(),
        },
    )
    .await;

    let mut rolled_back = Vec::new();
    while let Some(command) = h.gateway.last_command(&key(), CommandKind::Compensation).await {
        if rolled_back.contains(&command.action_type) {
            break;
        }
        rolled_back.push(command.action_type.clone());
        h.gateway.deliver(command.succeeded(StateBag::new())).await.unwrap();
    }

    assert_eq!(
        rolled_back,
        vec![
            actions::CANCEL_PAYMENT_PLAN,
            actions::CLEAR_KYC_RECORD,
            actions::REVERT_APPLICATION_VALIDATION,
        ]
    );
    let instance = h.orchestrator.status(&key()).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Compensated);
    assert_eq!(instance.steps[steps::APPROVE].status, StepStatus::Failed);
    assert!(instance
        .transitions
        .iter()
        .any(|t| t.to == SagaStatus::Cancelled));
    // Cancellation is not a rejection
    assert!(h.outbox.published().is_empty());
}

#[tokio::test]
async fn test_events_for_unknown_application_are_discarded() {
    let h = harness();
    let outcome = feed(&h, CitizenshipEvent::ApplicationValidated { saga_id: "APP-404".into() }).await;
    assert!(matches!(outcome, DomainEventOutcome::Handled(d) if !d.is_applied()));

    let outcome = feed(
        &h,
        CitizenshipEvent::ApplicationRejected {
            saga_id: APP.into(),
            reason: "echo".into(),
        },
    )
    .await;
    assert_eq!(outcome, DomainEventOutcome::Ignored);
}

#[tokio::test]
async fn test_happy_path_over_action_router() {
    let mut registry = SagaDefinitionRegistry::new();
    citizenship::register(&mut registry).unwrap();

    let mut router = ActionRouter::new();
    let outputs = [
        (actions::VALIDATE_APPLICATION, None),
        (actions::SCREEN_APPLICANT, Some(("kycReference", "KYC-1"))),
        (actions::CREATE_PAYMENT_PLAN, Some(("paymentPlanId", "PP-9"))),
        (actions::APPROVE_APPLICATION, None),
        (actions::ISSUE_PASSPORT, Some(("passportNumber", "P-9"))),
        (actions::ISSUE_TRAVEL_IDENTITY, Some(("travelIdentityId", "TI-9"))),
    ];
    for (action, output) in outputs {
        router
            .register(action, move |_command| async move {
                let mut bag = StateBag::new();
                if let Some((field, value)) = output {
                    bag.insert(field, value).unwrap();
                }
                ActionResult::Succeeded(bag)
            })
            .unwrap();
    }
    let router = Arc::new(router);

    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::new(registry),
        Arc::new(InMemorySagaStore::new()),
        router.clone(),
    ));
    orchestrator.subscribe().await.unwrap();

    let outcome = handle_domain_event(&orchestrator, &created()).await.unwrap();
    assert_eq!(outcome, DomainEventOutcome::Started(key()));
    router.wait_idle().await;

    let instance = orchestrator.status(&key()).await.unwrap();
    assert_eq!(instance.status, SagaStatus::Completed);
    let data: CitizenshipData = instance.state.to_typed().unwrap();
    assert_eq!(data.passport_number.as_deref(), Some("P-9"));
    assert_eq!(data.travel_identity_id.as_deref(), Some("TI-9"));
}
