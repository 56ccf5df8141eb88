// Copyright 2025 Cowboy AI, LLC.

//! Identifier types for saga instances and message correlation

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Internal identity of a saga instance
///
/// Never shown to domain services; they address sagas through [`SagaKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaInstanceId(Uuid);

impl SagaInstanceId {
    /// Create a new random instance ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SagaInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SagaInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SagaInstanceId> for Uuid {
    fn from(id: SagaInstanceId) -> Self {
        id.0
    }
}

/// Correlation ID threaded through every command and event of a saga
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the raw value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage and routing key of a saga instance: `(saga_type, saga_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SagaKey {
    /// Registered saga type
    pub saga_type: String,
    /// Business correlation key, e.g. an application number
    pub saga_id: String,
}

impl SagaKey {
    /// Create a key
    pub fn new(saga_type: impl Into<String>, saga_id: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            saga_id: saga_id.into(),
        }
    }
}

impl fmt::Display for SagaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.saga_type, self.saga_id)
    }
}
