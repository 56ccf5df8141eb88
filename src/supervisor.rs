// Copyright 2025 Cowboy AI, LLC.

//! Timeout supervisor
//!
//! Periodically asks the store for overdue sagas and feeds synthetic timeout
//! events through the orchestrator, so timeouts take exactly the same path as
//! outcome events from services. It also restarts rollbacks that were left
//! behind when a failure was persisted but compensation never began.

use crate::config::SupervisorConfig;
use crate::errors::SagaResult;
use crate::events::SagaEventEnvelope;
use crate::instance::{SagaInstance, SagaStatus};
use crate::orchestrator::SagaOrchestrator;
use crate::transition::EventDisposition;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Synthetic step timeouts injected
    pub step_timeouts: usize,
    /// Synthetic compensation timeouts injected
    pub compensation_timeouts: usize,
    /// Synthetic saga timeouts injected
    pub saga_timeouts: usize,
    /// Rollbacks started for stranded sagas
    pub rollbacks_started: usize,
    /// Injected events the orchestrator discarded
    pub discarded: usize,
    /// Sagas whose handling failed
    pub errors: usize,
}

impl ScanReport {
    /// Whether the scan changed anything
    pub fn is_idle(&self) -> bool {
        self.step_timeouts + self.compensation_timeouts + self.saga_timeouts + self.rollbacks_started == 0
    }
}

/// Synthetic event for an overdue instance
fn timeout_event(instance: &SagaInstance, now: DateTime<Utc>) -> Option<SagaEventEnvelope> {
    let key = instance.key();
    match instance.status {
        SagaStatus::Running if instance.saga_deadline_passed(now) => {
            Some(SagaEventEnvelope::saga_timed_out(&key))
        }
        SagaStatus::Running => Some(SagaEventEnvelope::step_timed_out(
            &key,
            instance.current_step_index,
            instance.retry_count,
        )),
        SagaStatus::Compensating => instance.active_step().map(|step| {
            SagaEventEnvelope::compensation_timed_out(&key, step.step_index, step.compensation_attempts)
        }),
        _ => None,
    }
}

/// Scans for overdue work
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    orchestrator: Arc<SagaOrchestrator>,
    config: SupervisorConfig,
}

impl TimeoutSupervisor {
    /// Create a supervisor using the orchestrator's configuration
    pub fn new(orchestrator: Arc<SagaOrchestrator>) -> Self {
        let config = orchestrator.config().supervisor.clone();
        Self {
            orchestrator,
            config,
        }
    }

    /// Override the supervisor configuration
    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one scan as of `now`
    pub async fn scan_once(&self, now: DateTime<Utc>) -> SagaResult<ScanReport> {
        let store = self.orchestrator.store();
        let mut report = ScanReport::default();

        for instance in store.find_timed_out(now).await? {
            let Some(event) = timeout_event(&instance, now) else {
                continue;
            };
            let name = event.payload.name();
            debug!(
                saga_type = %instance.saga_type,
                saga_id = %instance.saga_id,
                event = name,
                "Injecting timeout"
            );

            match self.orchestrator.handle_event(event).await {
                Ok(EventDisposition::Applied { .. }) => match instance.status {
                    SagaStatus::Compensating => report.compensation_timeouts += 1,
                    _ if instance.saga_deadline_passed(now) => report.saga_timeouts += 1,
                    _ => report.step_timeouts += 1,
                },
                Ok(EventDisposition::Discarded(_)) => report.discarded += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(
                        saga_type = %instance.saga_type,
                        saga_id = %instance.saga_id,
                        error = %err,
                        "Timeout injection failed"
                    );
                }
            }
        }

        if self.config.recover_stranded {
            let stranded = store
                .find_by_status(&[SagaStatus::Failed, SagaStatus::TimedOut, SagaStatus::Cancelled])
                .await?;
            let compensation = self.orchestrator.compensation();
            for instance in stranded.iter().filter(|i| i.needs_compensation()) {
                match compensation.begin(&instance.key()).await {
                    Ok(EventDisposition::Applied { .. }) => report.rollbacks_started += 1,
                    Ok(EventDisposition::Discarded(_)) => report.discarded += 1,
                    Err(err) => {
                        report.errors += 1;
                        warn!(
                            saga_type = %instance.saga_type,
                            saga_id = %instance.saga_id,
                            error = %err,
                            "Stranded rollback could not start"
                        );
                    }
                }
            }
        }

        if !report.is_idle() {
            info!(?report, "Supervisor scan acted");
        }
        Ok(report)
    }

    /// Scan every `scan_interval_ms` until the handle is shut down
    pub fn spawn(self) -> SupervisorHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let interval = self.config.scan_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "Timeout supervisor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.scan_once(Utc::now()).await {
                            error!(error = %err, "Supervisor scan failed");
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Timeout supervisor stopped");
        });

        SupervisorHandle { shutdown, task }
    }
}

/// Handle of a running supervisor
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Stop scanning and wait for the loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Supervisor task ended abnormally");
        }
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
