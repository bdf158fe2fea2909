//! # Dispatch Context
//!
//! The blackboard passed through a dispatch: string keys mapped to JSON values
//! plus a revision counter that moves forward on every effective mutation.
//!
//! A context is owned by exactly one in-flight dispatch. Parallel work takes
//! [`Context::fork`] copies and folds them back with [`Context::merge_forks`],
//! which refuses forks taken at a different revision.

use crate::error::{DispatchError, DispatchResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key/value storage behind a [`Context`].
pub type ContextValues = BTreeMap<String, Value>;

/// Key under which a non-object notification payload is stored.
pub const PAYLOAD_KEY: &str = "payload";

/// Event emitted by a handler action, delivered to subscribers after the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    values: ContextValues,
    revision: u64,
    #[serde(skip)]
    forked_at: Option<u64>,
    #[serde(skip)]
    emitted: Vec<EmittedEvent>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from an event payload.
    ///
    /// Object payloads become top-level keys, `null` yields an empty context,
    /// and any other value is stored under [`PAYLOAD_KEY`].
    pub fn from_payload(payload: Value) -> Self {
        let values = match payload {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => ContextValues::new(),
            other => {
                let mut values = ContextValues::new();
                values.insert(PAYLOAD_KEY.to_string(), other);
                values
            }
        };

        Self {
            values,
            ..Self::default()
        }
    }

    /// Builder for initial contexts. Does not count as a mutation.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Deserialize a value into a typed structure.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> DispatchResult<Option<T>> {
        match self.values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &ContextValues {
        &self.values
    }

    /// Store a value, returning the previous one.
    ///
    /// The revision advances only when the stored value actually changes.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        if self.values.get(&key) == Some(&value) {
            return Some(value);
        }
        self.revision += 1;
        self.values.insert(key, value)
    }

    /// Store a serializable value.
    pub fn insert_as<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> DispatchResult<()> {
        let value = serde_json::to_value(value)?;
        self.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Queue an event for delivery once the current run completes.
    ///
    /// Emitting is not a blackboard mutation and leaves the revision alone.
    pub fn emit(&mut self, event_type: impl Into<String>, payload: Value) {
        self.emitted.push(EmittedEvent {
            event_type: event_type.into(),
            payload,
        });
    }

    pub fn emitted_events(&self) -> &[EmittedEvent] {
        &self.emitted
    }

    pub fn drain_events(&mut self) -> Vec<EmittedEvent> {
        std::mem::take(&mut self.emitted)
    }

    /// Copy this context for independent parallel work.
    pub fn fork(&self) -> Self {
        Self {
            values: self.values.clone(),
            revision: self.revision,
            forked_at: Some(self.revision),
            emitted: Vec::new(),
        }
    }

    /// Revision this context was forked from, if it is a fork.
    pub fn forked_at(&self) -> Option<u64> {
        self.forked_at
    }

    /// Fold forks back into this context with a caller-supplied merge.
    ///
    /// Every fork must have been taken at the current revision. The merge
    /// function sees the current values and the forks; if it changes the
    /// values the revision advances by exactly one. Events emitted on the
    /// forks are carried over in fork order.
    pub fn merge_forks<F>(&mut self, mut forks: Vec<Context>, merge: F) -> DispatchResult<()>
    where
        F: FnOnce(&mut ContextValues, Vec<Context>),
    {
        if let Some(stale) = forks
            .iter()
            .find(|fork| fork.forked_at != Some(self.revision))
        {
            return Err(DispatchError::RevisionConflict {
                forked_at: stale.forked_at,
                current: self.revision,
            });
        }

        for fork in &mut forks {
            let events = fork.drain_events();
            self.emitted.extend(events);
        }

        let mut merged = self.values.clone();
        merge(&mut merged, forks);
        if merged != self.values {
            self.values = merged;
            self.revision += 1;
        }
        Ok(())
    }
}
