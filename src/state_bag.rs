// Copyright 2025 Cowboy AI, LLC.

//! Workflow-scoped key/value data carried between saga steps
//!
//! Steps publish their results into the bag and later steps read them back.
//! Saga types that know their data shape implement [`SagaData`] and convert
//! the whole bag into a typed struct; keys the struct does not know about are
//! preserved when the struct is written back.

use crate::errors::{SagaError, SagaResult};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Marker for typed views over a [`StateBag`]
///
/// The struct must serialize to a JSON object.
pub trait SagaData: Serialize + DeserializeOwned + Send + Sync {}

/// Ordered key/value bag of step results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBag(IndexMap<String, Value>);

impl StateBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Build a bag from a typed struct
    pub fn from_typed<T: SagaData>(data: &T) -> SagaResult<Self> {
        let mut bag = Self::new();
        bag.store_typed(data)?;
        Ok(bag)
    }

    /// Build a bag from a JSON object; other JSON values are rejected
    pub fn from_json(value: Value) -> SagaResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            Value::Null => Ok(Self::new()),
            other => Err(SagaError::Serialization(format!(
                "state bag must be a JSON object, got {other}"
            ))),
        }
    }

    /// Read a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> SagaResult<Option<T>> {
        self.0
            .get(key)
            .map(|value| serde_json::from_value(value.clone()).map_err(SagaError::from))
            .transpose()
    }

    /// Read the raw JSON value
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Write a typed value
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> SagaResult<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Merge another bag into this one; incoming values win
    pub fn merge(&mut self, other: &StateBag) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Deserialize the whole bag into a typed view
    pub fn to_typed<T: SagaData>(&self) -> SagaResult<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Write a typed view back, keeping keys it does not cover
    pub fn store_typed<T: SagaData>(&mut self, data: &T) -> SagaResult<()> {
        match serde_json::to_value(data)? {
            Value::Object(map) => {
                for (key, value) in map {
                    self.0.insert(key, value);
                }
                Ok(())
            }
            other => Err(SagaError::Serialization(format!(
                "typed saga data must serialize to an object, got {other}"
            ))),
        }
    }

    /// Snapshot as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for StateBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Applicant {
        citizen_id: Option<String>,
        #[serde(default)]
        payment_plan_id: Option<String>,
    }

    impl SagaData for Applicant {}

    #[test]
    fn test_typed_get_and_insert() {
        let mut bag = StateBag::new();
        bag.insert("citizenId", "C-42").unwrap();
        bag.insert("attempts", 3u32).unwrap();

        assert_eq!(bag.get::<String>("citizenId").unwrap(), Some("C-42".to_string()));
        assert_eq!(bag.get::<u32>("attempts").unwrap(), Some(3));
        assert_eq!(bag.get::<u32>("missing").unwrap(), None);
        assert!(bag.get::<u32>("citizenId").is_err());
    }

    #[test]
    fn test_merge_overwrites_and_keeps_order() {
        let mut bag = StateBag::from_json(json!({"a": 1, "b": 2})).unwrap();
        let other = StateBag::from_json(json!({"b": 20, "c": 30})).unwrap();
        bag.merge(&other);

        let keys: Vec<&String> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(bag.get::<i32>("b").unwrap(), Some(20));
    }

    #[test]
    fn test_typed_view_preserves_unknown_keys() {
        let mut bag = StateBag::from_json(json!({
            "citizen_id": "C-1",
            "note": "keep me"
        }))
        .unwrap();

        let mut view: Applicant = bag.to_typed().unwrap();
        assert_eq!(view.citizen_id.as_deref(), Some("C-1"));
        view.payment_plan_id = Some("PP-9".to_string());
        bag.store_typed(&view).unwrap();

        assert_eq!(bag.get::<String>("note").unwrap(), Some("keep me".to_string()));
        assert_eq!(
            bag.get::<String>("payment_plan_id").unwrap(),
            Some("PP-9".to_string())
        );
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(StateBag::from_json(json!([1, 2])).is_err());
        assert!(StateBag::from_json(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let bag = StateBag::from_json(json!({"x": true})).unwrap();
        assert_eq!(serde_json::to_value(&bag).unwrap(), json!({"x": true}));
    }
}
