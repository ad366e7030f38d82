//! Run-scoped context threaded through every stage.
//!
//! The context maps output keys to opaque JSON values and remembers which
//! stage produced each key. Writes are append-only except for a stage
//! rewriting its own key, or an explicit [`Context::reassign`].

use std::collections::BTreeMap;

use anyhow::{Context as _, Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    producer: String,
    value: Value,
}

/// Shared, append-only key/value state for one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    entries: BTreeMap<String, Entry>,
}

/// A write was rejected because another stage owns the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConflict {
    pub key: String,
    pub owner: String,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Name of the stage that last wrote `key`.
    pub fn producer(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|entry| entry.producer.as_str())
    }

    /// Decode the value stored under `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .get(key)
            .ok_or_else(|| anyhow!("context has no value for '{key}'"))?;
        serde_json::from_value(value.clone()).with_context(|| format!("decode context key '{key}'"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from `required` that are not present, in declaration order.
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.contains(key))
            .cloned()
            .collect()
    }

    /// Record `value` under `key` on behalf of `producer`.
    ///
    /// Fails when the key is already owned by a different producer.
    pub fn insert(
        &mut self,
        producer: &str,
        key: &str,
        value: Value,
    ) -> std::result::Result<(), WriteConflict> {
        if let Some(existing) = self.entries.get(key)
            && existing.producer != producer
        {
            return Err(WriteConflict {
                key: key.to_string(),
                owner: existing.producer.clone(),
            });
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                producer: producer.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Overwrite `key` regardless of its current owner, returning the previous value.
    ///
    /// Ownership moves to `producer`.
    pub fn reassign(&mut self, producer: &str, key: &str, value: Value) -> Option<Value> {
        self.entries
            .insert(
                key.to_string(),
                Entry {
                    producer: producer.to_string(),
                    value,
                },
            )
            .map(|previous| previous.value)
    }
}
