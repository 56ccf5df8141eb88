// Copyright 2025 Cowboy AI, LLC.

//! Error types for saga orchestration

use thiserror::Error;

/// Errors that can occur while defining, storing or driving sagas
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SagaError {
    /// A definition with the same saga type is already registered
    #[error("Duplicate saga type: {0}")]
    DuplicateSagaType(String),

    /// The definition is not well-formed
    #[error("Invalid saga definition {saga_type}: {reason}")]
    InvalidDefinition {
        /// Saga type of the rejected definition
        saga_type: String,
        /// Why it was rejected
        reason: String,
    },

    /// No definition is registered for the saga type
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// An instance with the same saga type and saga id already exists
    #[error("Duplicate saga id: {saga_type}/{saga_id}")]
    DuplicateSagaId {
        /// Saga type
        saga_type: String,
        /// Business correlation key
        saga_id: String,
    },

    /// Saga instance not found
    #[error("Saga not found: {0}")]
    NotFound(String),

    /// The stored version advanced past the version the writer read
    #[error("Version conflict: expected version {expected}, but found {actual}")]
    VersionConflict {
        /// Version supplied by the writer
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// A step failed (recoverable through the retry budget)
    #[error("Step {step_index} failed: {reason}")]
    StepFailed {
        /// Index of the failed step
        step_index: usize,
        /// Failure reason reported by the service
        reason: String,
    },

    /// A step exceeded its own timeout
    #[error("Step {step_index} timed out")]
    StepTimedOut {
        /// Index of the overdue step
        step_index: usize,
    },

    /// The saga exceeded its overall deadline
    #[error("Saga timed out: {0}")]
    SagaTimedOut(String),

    /// A compensation could not be completed; operator intervention required
    #[error("Compensation failed for {saga_id} at step {step_index}: {reason}")]
    CompensationFailed {
        /// Business correlation key
        saga_id: String,
        /// Index of the step whose compensation failed
        step_index: usize,
        /// Last reported error
        reason: String,
    },

    /// Invalid state transition attempted
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Attempted target state
        to: String,
    },

    /// Invariant violation on a saga instance
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Instance store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Message transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for saga operations
pub type SagaResult<T> = Result<T, SagaError>;

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        SagaError::Serialization(err.to_string())
    }
}

impl SagaError {
    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, SagaError::NotFound(_) | SagaError::UnknownSagaType(_))
    }

    /// Check if this is an optimistic concurrency conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, SagaError::VersionConflict { .. })
    }

    /// Conditions the engine recovers from on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SagaError::VersionConflict { .. }
                | SagaError::StepFailed { .. }
                | SagaError::StepTimedOut { .. }
                | SagaError::Transport(_)
        )
    }

    /// Conditions that need a human to look at the saga
    pub fn requires_intervention(&self) -> bool {
        matches!(self, SagaError::CompensationFailed { .. })
    }
}
