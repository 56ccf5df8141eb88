// Copyright 2025 Cowboy AI, LLC.

//! Saga definition registry
//!
//! Populated once at process start and then shared behind an `Arc`; lookups
//! take `&self` and never lock.

use crate::definition::SagaDefinition;
use crate::errors::{SagaError, SagaResult};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Catalog of saga definitions keyed by saga type
#[derive(Debug, Clone, Default)]
pub struct SagaDefinitionRegistry {
    definitions: HashMap<String, Arc<SagaDefinition>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionDocument {
    Many(Vec<SagaDefinition>),
    One(SagaDefinition),
}

impl SagaDefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition
    pub fn register(&mut self, definition: SagaDefinition) -> SagaResult<()> {
        definition.validate()?;

        if self.definitions.contains_key(&definition.saga_type) {
            return Err(SagaError::DuplicateSagaType(definition.saga_type));
        }

        info!(
            saga_type = %definition.saga_type,
            steps = definition.steps.len(),
            "Registered saga definition"
        );
        self.definitions
            .insert(definition.saga_type.clone(), Arc::new(definition));
        Ok(())
    }

    /// Register every definition in a JSON document (one object or an array)
    pub fn register_json(&mut self, document: &str) -> SagaResult<usize> {
        let definitions = match serde_json::from_str::<DefinitionDocument>(document)? {
            DefinitionDocument::Many(many) => many,
            DefinitionDocument::One(one) => vec![one],
        };

        // Nothing is inserted unless the whole document is acceptable
        let mut seen = HashSet::new();
        for definition in &definitions {
            definition.validate()?;
            if self.definitions.contains_key(&definition.saga_type)
                || !seen.insert(definition.saga_type.as_str())
            {
                return Err(SagaError::DuplicateSagaType(definition.saga_type.clone()));
            }
        }

        let count = definitions.len();
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(count)
    }

    /// Look up a definition
    pub fn lookup(&self, saga_type: &str) -> Option<Arc<SagaDefinition>> {
        self.definitions.get(saga_type).cloned()
    }

    /// Registered saga types, sorted
    pub fn saga_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.definitions.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
