// Copyright 2025 Cowboy AI, LLC.

//! Citizenship application workflow
//!
//! Binds the citizenship domain events to the generic engine. The application
//! is validated, screened, paid for, approved, and ends with a passport and a
//! travel identity being issued:
//!
//! ```text
//! ApplicationCreated ─▶ validate ─▶ kyc ─▶ payment plan ─▶ approve ─▶ passport ─▶ travel identity
//! ```
//!
//! Domain services report back with their own events; [`to_saga_event`]
//! translates them to step outcomes. A KYC screening that does not approve the
//! applicant is a business rejection: it skips the retry budget and rolls the
//! application back. [`CitizenshipOutbox`] turns the terminal lifecycle of a
//! rejected, failed or timed-out saga into an `ApplicationRejected` event.

use crate::definition::{SagaDefinition, StepDefinition};
use crate::errors::SagaResult;
use crate::events::SagaEventEnvelope;
use crate::identifiers::SagaKey;
use crate::instance::SagaTrigger;
use crate::observer::{LifecycleKind, SagaAlert, SagaNotification, SagaObserver};
use crate::orchestrator::SagaOrchestrator;
use crate::registry::SagaDefinitionRegistry;
use crate::state_bag::{SagaData, StateBag};
use crate::transition::EventDisposition;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Saga type name
pub const SAGA_TYPE: &str = "citizenship-application";

/// Step indices
pub mod steps {
    /// Application validation
    pub const VALIDATE: usize = 0;
    /// KYC/AML screening
    pub const KYC: usize = 1;
    /// Payment plan creation
    pub const PAYMENT_PLAN: usize = 2;
    /// Final approval
    pub const APPROVE: usize = 3;
    /// Passport issuance
    pub const PASSPORT: usize = 4;
    /// Travel identity issuance
    pub const TRAVEL_IDENTITY: usize = 5;
}

/// Action types dispatched to the domain services
#[allow(missing_docs)]
pub mod actions {
    pub const VALIDATE_APPLICATION: &str = "ValidateApplication";
    pub const REVERT_APPLICATION_VALIDATION: &str = "RevertApplicationValidation";
    pub const SCREEN_APPLICANT: &str = "ScreenApplicant";
    pub const CLEAR_KYC_RECORD: &str = "ClearKycRecord";
    pub const CREATE_PAYMENT_PLAN: &str = "CreatePaymentPlan";
    pub const CANCEL_PAYMENT_PLAN: &str = "CancelPaymentPlan";
    pub const APPROVE_APPLICATION: &str = "ApproveApplication";
    pub const REVOKE_APPROVAL: &str = "RevokeApproval";
    pub const ISSUE_PASSPORT: &str = "IssuePassport";
    pub const REVOKE_PASSPORT: &str = "RevokePassport";
    pub const ISSUE_TRAVEL_IDENTITY: &str = "IssueTravelIdentity";
    pub const REVOKE_TRAVEL_IDENTITY: &str = "RevokeTravelIdentity";
}

/// The citizenship saga definition
pub fn definition() -> SagaDefinition {
    use actions::*;

    SagaDefinition::new(SAGA_TYPE)
        .with_default_timeout_ms(30_000)
        .with_saga_timeout_ms(7 * 24 * 60 * 60 * 1_000)
        .with_max_retries(3)
        .with_step(
            StepDefinition::new("validate-application", VALIDATE_APPLICATION, "applications")
                .with_compensation(REVERT_APPLICATION_VALIDATION),
        )
        .with_step(
            StepDefinition::new("kyc-screening", SCREEN_APPLICANT, "compliance")
                .with_compensation(CLEAR_KYC_RECORD)
                .with_timeout_ms(60 * 60 * 1_000),
        )
        .with_step(
            StepDefinition::new("create-payment-plan", CREATE_PAYMENT_PLAN, "payments")
                .with_compensation(CANCEL_PAYMENT_PLAN),
        )
        .with_step(
            StepDefinition::new("approve-application", APPROVE_APPLICATION, "applications")
                .with_compensation(REVOKE_APPROVAL),
        )
        .with_step(
            StepDefinition::new("issue-passport", ISSUE_PASSPORT, "documents")
                .with_compensation(REVOKE_PASSPORT),
        )
        .with_step(
            StepDefinition::new("issue-travel-identity", ISSUE_TRAVEL_IDENTITY, "documents")
                .with_compensation(REVOKE_TRAVEL_IDENTITY),
        )
}

/// Register the citizenship saga
pub fn register(registry: &mut SagaDefinitionRegistry) -> SagaResult<()> {
    registry.register(definition())
}

/// Typed view of the citizenship state bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CitizenshipData {
    pub application_id: String,
    pub citizen_id: Option<String>,
    pub kyc_reference: Option<String>,
    pub payment_plan_id: Option<String>,
    pub passport_number: Option<String>,
    pub travel_identity_id: Option<String>,
}

impl SagaData for CitizenshipData {}

/// Citizenship domain events
///
/// `saga_id` is the application number that correlates every event of one
/// application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
#[allow(missing_docs)]
pub enum CitizenshipEvent {
    ApplicationCreated {
        saga_id: String,
        application_id: String,
        citizen_id: Option<String>,
    },
    ApplicationValidated {
        saga_id: String,
    },
    KycCompleted {
        saga_id: String,
        is_approved: bool,
        rejection_reason: Option<String>,
        kyc_reference: Option<String>,
    },
    PaymentPlanCreated {
        saga_id: String,
        payment_plan_id: String,
    },
    ApplicationApproved {
        saga_id: String,
    },
    PassportIssued {
        saga_id: String,
        passport_number: String,
    },
    TravelIdentityIssued {
        saga_id: String,
        travel_identity_id: String,
    },
    /// Published when the application ends without approval
    ApplicationRejected {
        saga_id: String,
        reason: String,
    },
    ApplicationCancelled {
        saga_id: String,
        reason: String,
    },
}

impl CitizenshipEvent {
    /// Application number the event belongs to
    pub fn saga_id(&self) -> &str {
        match self {
            Self::ApplicationCreated { saga_id, .. }
            | Self::ApplicationValidated { saga_id }
            | Self::KycCompleted { saga_id, .. }
            | Self::PaymentPlanCreated { saga_id, .. }
            | Self::ApplicationApproved { saga_id }
            | Self::PassportIssued { saga_id, .. }
            | Self::TravelIdentityIssued { saga_id, .. }
            | Self::ApplicationRejected { saga_id, .. }
            | Self::ApplicationCancelled { saga_id, .. } => saga_id,
        }
    }

    /// Saga key of the application
    pub fn key(&self) -> SagaKey {
        SagaKey::new(SAGA_TYPE, self.saga_id())
    }
}

/// Trigger for an `ApplicationCreated` event
pub fn trigger(event: &CitizenshipEvent) -> SagaResult<Option<SagaTrigger>> {
    let CitizenshipEvent::ApplicationCreated {
        saga_id,
        application_id,
        citizen_id,
    } = event
    else {
        return Ok(None);
    };

    let data = CitizenshipData {
        application_id: application_id.clone(),
        citizen_id: citizen_id.clone(),
        ..CitizenshipData::default()
    };
    let mut trigger = SagaTrigger::new(SAGA_TYPE, saga_id.clone()).with_state(StateBag::from_typed(&data)?);
    if let Some(citizen_id) = citizen_id {
        trigger = trigger.with_initiator(citizen_id.clone());
    }
    Ok(Some(trigger))
}

fn output(field: &str, value: &str) -> SagaResult<StateBag> {
    let mut bag = StateBag::new();
    bag.insert(field, value)?;
    Ok(bag)
}

/// Translate a domain event into a saga event
///
/// `ApplicationCreated` starts a saga instead and `ApplicationRejected` is
/// only ever published by the workflow, so both translate to `None`.
pub fn to_saga_event(event: &CitizenshipEvent) -> SagaResult<Option<SagaEventEnvelope>> {
    let key = event.key();
    let envelope = match event {
        CitizenshipEvent::ApplicationCreated { .. } | CitizenshipEvent::ApplicationRejected { .. } => {
            return Ok(None)
        }
        CitizenshipEvent::ApplicationValidated { .. } => {
            SagaEventEnvelope::step_succeeded(&key, steps::VALIDATE, StateBag::new())
        }
        CitizenshipEvent::KycCompleted {
            is_approved: false,
            rejection_reason,
            ..
        } => SagaEventEnvelope::step_rejected(
            &key,
            steps::KYC,
            rejection_reason.as_deref().unwrap_or("kyc not approved"),
        ),
        CitizenshipEvent::KycCompleted { kyc_reference, .. } => {
            let bag = match kyc_reference {
                Some(reference) => output("kycReference", reference)?,
                None => StateBag::new(),
            };
            SagaEventEnvelope::step_succeeded(&key, steps::KYC, bag)
        }
        CitizenshipEvent::PaymentPlanCreated { payment_plan_id, .. } => SagaEventEnvelope::step_succeeded(
            &key,
            steps::PAYMENT_PLAN,
            output("paymentPlanId", payment_plan_id)?,
        ),
        CitizenshipEvent::ApplicationApproved { .. } => {
            SagaEventEnvelope::step_succeeded(&key, steps::APPROVE, StateBag::new())
        }
        CitizenshipEvent::PassportIssued { passport_number, .. } => SagaEventEnvelope::step_succeeded(
            &key,
            steps::PASSPORT,
            output("passportNumber", passport_number)?,
        ),
        CitizenshipEvent::TravelIdentityIssued {
            travel_identity_id, ..
        } => SagaEventEnvelope::step_succeeded(
            &key,
            steps::TRAVEL_IDENTITY,
            output("travelIdentityId", travel_identity_id)?,
        ),
        CitizenshipEvent::ApplicationCancelled { reason, .. } => {
            SagaEventEnvelope::cancel_requested(&key, reason.clone())
        }
    };
    Ok(Some(envelope))
}

/// What feeding a domain event to the engine did
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEventOutcome {
    /// A saga was started (or already existed)
    Started(SagaKey),
    /// The translated saga event was handled
    Handled(EventDisposition),
    /// The event has no meaning to the engine
    Ignored,
}

/// Feed a citizenship domain event to the orchestrator
pub async fn handle_domain_event(
    orchestrator: &SagaOrchestrator,
    event: &CitizenshipEvent,
) -> SagaResult<DomainEventOutcome> {
    if let Some(trigger) = trigger(event)? {
        return orchestrator.start(trigger).await.map(DomainEventOutcome::Started);
    }
    match to_saga_event(event)? {
        Some(envelope) => {
            debug!(saga_id = event.saga_id(), event = envelope.payload.name(), "Citizenship event translated");
            orchestrator
                .handle_event(envelope)
                .await
                .map(DomainEventOutcome::Handled)
        }
        None => Ok(DomainEventOutcome::Ignored),
    }
}

/// `ApplicationRejected` for a terminal lifecycle notification, if any
pub fn rejection_for(notification: &SagaNotification) -> Option<CitizenshipEvent> {
    if notification.key.saga_type != SAGA_TYPE {
        return None;
    }
    let reason = match &notification.kind {
        LifecycleKind::Rejected { reason, .. } | LifecycleKind::Failed { reason, .. } => reason.clone(),
        LifecycleKind::TimedOut => "application timed out".to_string(),
        _ => return None,
    };
    Some(CitizenshipEvent::ApplicationRejected {
        saga_id: notification.key.saga_id.clone(),
        reason,
    })
}

/// Collects the domain events the workflow publishes
#[derive(Debug, Clone, Default)]
pub struct CitizenshipOutbox {
    published: Arc<Mutex<Vec<CitizenshipEvent>>>,
}

impl CitizenshipOutbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far
    pub fn published(&self) -> Vec<CitizenshipEvent> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Remove and return the published events
    pub fn drain(&self) -> Vec<CitizenshipEvent> {
        self.published
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl SagaObserver for CitizenshipOutbox {
    fn on_lifecycle(&self, notification: &SagaNotification) {
        if let Some(event) = rejection_for(notification) {
            info!(saga_id = %notification.key.saga_id, "Application rejected");
            if let Ok(mut published) = self.published.lock() {
                published.push(event);
            }
        }
    }

    fn on_alert(&self, _alert: &SagaAlert) {}
}
