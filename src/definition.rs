// Copyright 2025 Cowboy AI, LLC.

//! Saga definitions: the static shape of a workflow
//!
//! A definition names the ordered steps of a saga type, the command each step
//! dispatches, the compensation that undoes it, and the retry and timeout
//! budgets. Definitions are plain data so they can be loaded from JSON
//! documents at startup; [`definition_schema`] documents that format.

use crate::errors::{SagaError, SagaResult};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

/// Longest step or saga timeout a definition may declare (one year)
pub const MAX_TIMEOUT_MS: u64 = 366 * 24 * 60 * 60 * 1_000;

fn add_timeout(from: DateTime<Utc>, ms: u64) -> Option<DateTime<Utc>> {
    let ms = i64::try_from(ms).ok()?;
    from.checked_add_signed(Duration::try_milliseconds(ms)?)
}

/// One step of a saga definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    /// Step name, unique within the definition
    pub name: String,
    /// Command dispatched to run the step
    pub action_type: String,
    /// Logical service that handles the command
    pub service_endpoint: String,
    /// Command that semantically undoes the step, if any
    #[serde(default)]
    pub compensation_action_type: Option<String>,
    /// Failure of an optional step does not abort the saga
    #[serde(default)]
    pub is_optional: bool,
    /// Overrides the definition's default step timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    /// Create a mandatory step without compensation
    pub fn new(
        name: impl Into<String>,
        action_type: impl Into<String>,
        service_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            action_type: action_type.into(),
            service_endpoint: service_endpoint.into(),
            compensation_action_type: None,
            is_optional: false,
            timeout_ms: None,
        }
    }

    /// Set the compensating command
    pub fn with_compensation(mut self, action_type: impl Into<String>) -> Self {
        self.compensation_action_type = Some(action_type.into());
        self
    }

    /// Mark the step optional
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Set a step-specific timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Whether a compensating command exists
    pub fn is_compensable(&self) -> bool {
        self.compensation_action_type.is_some()
    }
}

/// Static catalog entry describing a saga type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SagaDefinition {
    /// Unique saga type name
    pub saga_type: String,
    /// Ordered steps
    pub steps: Vec<StepDefinition>,
    /// Step timeout used when a step does not declare its own
    #[serde(default = "default_step_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Deadline for the whole saga, measured from start
    #[serde(default)]
    pub saga_timeout_ms: Option<u64>,
    /// Retry budget per step (and per compensation)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl SagaDefinition {
    /// Create an empty definition with default budgets
    pub fn new(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            steps: Vec::new(),
            default_timeout_ms: default_step_timeout_ms(),
            saga_timeout_ms: None,
            max_retries: default_max_retries(),
        }
    }

    /// Append a step
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the default step timeout
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the whole-saga deadline
    pub fn with_saga_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.saga_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Get a step by index
    pub fn step(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    fn step_timeout_ms(&self, index: usize) -> u64 {
        self.steps
            .get(index)
            .and_then(|s| s.timeout_ms)
            .unwrap_or(self.default_timeout_ms)
    }

    /// Effective timeout for the step at `index`, capped at [`MAX_TIMEOUT_MS`]
    pub fn step_timeout(&self, index: usize) -> Duration {
        Duration::milliseconds(self.step_timeout_ms(index).min(MAX_TIMEOUT_MS) as i64)
    }

    /// Whole-saga timeout, if any, capped at [`MAX_TIMEOUT_MS`]
    pub fn saga_timeout(&self) -> Option<Duration> {
        self.saga_timeout_ms
            .map(|ms| Duration::milliseconds(ms.min(MAX_TIMEOUT_MS) as i64))
    }

    /// Deadline of the step at `index` when dispatched at `from`
    pub fn step_deadline(&self, index: usize, from: DateTime<Utc>) -> SagaResult<DateTime<Utc>> {
        add_timeout(from, self.step_timeout_ms(index)).ok_or_else(|| SagaError::InvalidDefinition {
            saga_type: self.saga_type.clone(),
            reason: format!("step {index} deadline is out of range"),
        })
    }

    /// Whole-saga deadline when started at `from`
    pub fn saga_deadline(&self, from: DateTime<Utc>) -> SagaResult<Option<DateTime<Utc>>> {
        self.saga_timeout_ms
            .map(|ms| {
                add_timeout(from, ms).ok_or_else(|| SagaError::InvalidDefinition {
                    saga_type: self.saga_type.clone(),
                    reason: "saga deadline is out of range".to_string(),
                })
            })
            .transpose()
    }

    /// Check that the definition is well-formed
    pub fn validate(&self) -> SagaResult<()> {
        let invalid = |reason: String| SagaError::InvalidDefinition {
            saga_type: self.saga_type.clone(),
            reason,
        };

        if self.saga_type.trim().is_empty() {
            return Err(invalid("saga type must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(invalid("at least one step is required".to_string()));
        }
        if self.default_timeout_ms == 0 {
            return Err(invalid("default timeout must be positive".to_string()));
        }
        if self.default_timeout_ms > MAX_TIMEOUT_MS {
            return Err(invalid(format!(
                "default timeout exceeds {MAX_TIMEOUT_MS} ms"
            )));
        }
        match self.saga_timeout_ms {
            Some(0) => return Err(invalid("saga timeout must be positive".to_string())),
            Some(ms) if ms > MAX_TIMEOUT_MS => {
                return Err(invalid(format!("saga timeout exceeds {MAX_TIMEOUT_MS} ms")))
            }
            _ => {}
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() || step.action_type.trim().is_empty() {
                return Err(invalid(
                    "steps need a name and an action type".to_string(),
                ));
            }
            if !names.insert(step.name.as_str()) {
                return Err(invalid(format!("duplicate step name {}", step.name)));
            }
            match step.timeout_ms {
                Some(0) => return Err(invalid(format!("step {} has a zero timeout", step.name))),
                Some(ms) if ms > MAX_TIMEOUT_MS => {
                    return Err(invalid(format!(
                        "step {} timeout exceeds {MAX_TIMEOUT_MS} ms",
                        step.name
                    )))
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// JSON Schema describing definition documents
pub fn definition_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SagaDefinition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample() -> SagaDefinition {
        SagaDefinition::new("order")
            .with_step(StepDefinition::new("reserve", "ReserveStock", "inventory").with_compensation("ReleaseStock"))
            .with_step(StepDefinition::new("charge", "ChargeCard", "payments").with_timeout_ms(5_000))
            .with_step(StepDefinition::new("email", "SendReceipt", "notifications").optional())
    }

    #[test]
    fn test_builder_and_timeouts() {
        let def = sample();
        assert_eq!(def.steps.len(), 3);
        assert!(def.steps[0].is_compensable());
        assert!(def.steps[2].is_optional);
        assert_eq!(def.step_timeout(0), Duration::milliseconds(30_000));
        assert_eq!(def.step_timeout(1), Duration::milliseconds(5_000));
        assert_eq!(def.saga_timeout(), None);
        assert!(def.validate().is_ok());
    }

    #[test_case(SagaDefinition::new("empty") ; "no steps")]
    #[test_case(SagaDefinition::new("  ").with_step(StepDefinition::new("a", "A", "svc")) ; "blank type")]
    #[test_case(SagaDefinition::new("dup")
        .with_step(StepDefinition::new("a", "A", "svc"))
        .with_step(StepDefinition::new("a", "B", "svc")) ; "duplicate step names")]
    #[test_case(SagaDefinition::new("zero").with_step(StepDefinition::new("a", "A", "svc").with_timeout_ms(0)) ; "zero step timeout")]
    #[test_case(SagaDefinition::new("huge")
        .with_saga_timeout_ms(100_000_000_000_000_000)
        .with_step(StepDefinition::new("a", "A", "svc")) ; "huge saga timeout")]
    #[test_case(SagaDefinition::new("max")
        .with_default_timeout_ms(u64::MAX)
        .with_step(StepDefinition::new("a", "A", "svc")) ; "u64 max default timeout")]
    #[test_case(SagaDefinition::new("step")
        .with_step(StepDefinition::new("a", "A", "svc").with_timeout_ms(u64::MAX)) ; "u64 max step timeout")]
    #[test_case(SagaDefinition::new("zero-saga")
        .with_saga_timeout_ms(0)
        .with_step(StepDefinition::new("a", "A", "svc")) ; "zero saga timeout")]
    fn test_invalid_definitions(def: SagaDefinition) {
        assert!(matches!(
            def.validate(),
            Err(SagaError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_timeout_cap_is_accepted() {
        let def = SagaDefinition::new("cap")
            .with_saga_timeout_ms(MAX_TIMEOUT_MS)
            .with_step(StepDefinition::new("a", "A", "svc").with_timeout_ms(MAX_TIMEOUT_MS));
        assert!(def.validate().is_ok());

        let now = Utc::now();
        assert!(def.step_deadline(0, now).unwrap() > now);
        assert!(def.saga_deadline(now).unwrap().unwrap() > now);
    }

    #[test]
    fn test_deadline_overflow_is_an_error() {
        // Bypasses validate(), as a hand-built definition could
        let def = SagaDefinition::new("raw")
            .with_default_timeout_ms(u64::MAX)
            .with_saga_timeout_ms(100_000_000_000_000_000)
            .with_step(StepDefinition::new("a", "A", "svc"));
        let now = Utc::now();
        assert!(matches!(
            def.step_deadline(0, now),
            Err(SagaError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            def.saga_deadline(now),
            Err(SagaError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_json_defaults() {
        let def: SagaDefinition = serde_json::from_str(
            r#"{
                "saga_type": "t",
                "steps": [{"name": "s", "action_type": "A", "service_endpoint": "svc"}]
            }"#,
        )
        .unwrap();
        assert_eq!(def.default_timeout_ms, 30_000);
        assert_eq!(def.max_retries, 3);
        assert!(!def.steps[0].is_optional);
        assert!(def.steps[0].compensation_action_type.is_none());
    }

    #[test]
    fn test_schema_mentions_steps() {
        let schema = serde_json::to_value(definition_schema()).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("steps").is_some());
        assert!(properties.get("saga_type").is_some());
    }
}
