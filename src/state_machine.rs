// Copyright 2025 Cowboy AI, LLC.

//! State machine traits for saga and step statuses
//!
//! Saga and step statuses are enums whose legal moves are declared through
//! [`StateTransitions`]. Every status change on a saga instance goes through
//! [`transition`], which rejects illegal moves and yields a [`StateTransition`]
//! record for the instance audit trail.

use crate::errors::{SagaError, SagaResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// Trait for types that can be used as states in a state machine
pub trait State: Debug + Clone + PartialEq + Eq + Send + Sync {
    /// Get the name of this state for logging/debugging
    fn name(&self) -> &'static str;

    /// Check if this is a terminal state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Declares the legal moves between states
///
/// # Examples
///
/// ```rust
/// use saga_orchestrator::state_machine::{State, StateTransitions};
///
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// enum Light {
///     Red,
///     Green,
/// }
///
/// impl State for Light {
///     fn name(&self) -> &'static str {
///         match self {
///             Light::Red => "Red",
///             Light::Green => "Green",
///         }
///     }
/// }
///
/// impl StateTransitions for Light {
///     fn valid_transitions(&self) -> Vec<Self> {
///         match self {
///             Light::Red => vec![Light::Green],
///             Light::Green => vec![Light::Red],
///         }
///     }
/// }
///
/// assert!(Light::Red.can_transition_to(&Light::Green));
/// assert!(!Light::Red.can_transition_to(&Light::Red));
/// ```
pub trait StateTransitions: State {
    /// Get all valid target states from this state
    fn valid_transitions(&self) -> Vec<Self>;

    /// Check if a transition to the target state is valid
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }
}

/// Record of a state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition<S> {
    /// The state before the transition
    pub from: S,
    /// The state after the transition
    pub to: S,
    /// What caused the transition
    pub reason: String,
    /// Unique identifier for this transition instance
    pub transition_id: Uuid,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
}

/// Validate a move and produce its record
pub fn transition<S: StateTransitions>(
    from: &S,
    to: S,
    reason: impl Into<String>,
) -> SagaResult<StateTransition<S>> {
    if !from.can_transition_to(&to) {
        return Err(SagaError::InvalidTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
        });
    }

    Ok(StateTransition {
        from: from.clone(),
        to,
        reason: reason.into(),
        transition_id: Uuid::new_v4(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Door {
        Open,
        Closed,
        Locked,
    }

    impl State for Door {
        fn name(&self) -> &'static str {
            match self {
                Door::Open => "Open",
                Door::Closed => "Closed",
                Door::Locked => "Locked",
            }
        }
    }

    impl StateTransitions for Door {
        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Door::Open => vec![Door::Closed],
                Door::Closed => vec![Door::Open, Door::Locked],
                Door::Locked => vec![Door::Closed],
            }
        }
    }

    #[test]
    fn test_valid_transition_produces_record() {
        let record = transition(&Door::Closed, Door::Locked, "night").unwrap();
        assert_eq!(record.from, Door::Closed);
        assert_eq!(record.to, Door::Locked);
        assert_eq!(record.reason, "night");
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let err = transition(&Door::Open, Door::Locked, "skip").unwrap_err();
        assert_eq!(
            err,
            SagaError::InvalidTransition {
                from: "Open".to_string(),
                to: "Locked".to_string(),
            }
        );
    }

    #[test]
    fn test_default_is_terminal() {
        assert!(!Door::Locked.is_terminal());
    }
}
