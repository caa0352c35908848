//! Parent-side attribute registry.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::remote::{StateReply, StateRequest};
use super::store::{AttributeStore, StateError, SwapOutcome, encode};

/// Mirrored attributes, owned by the parent process.
///
/// Workers reach this store through their parent; every request a worker
/// sends is served under the same lock the parent uses, so reads, writes and
/// compare-and-swaps from all processes are serialized per store.
///
/// Names map to `None` while an attribute is declared but not set, which keeps
/// "mirrored, not yet set" apart from "never mirrored".
///
/// No caller code runs while the lock is held. `update` computes the new value
/// outside the lock and commits it with a compare-and-swap, so a closure that
/// panics leaves the store untouched for every other task.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, Option<Value>>>>,
}

impl SharedState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror a new attribute with an initial value.
    pub fn mirror<T: Serialize>(&self, name: impl Into<String>, value: T) -> Result<(), StateError> {
        let name = name.into();
        let value = encode(&name, &value)?;
        self.insert(name, Some(value))
    }

    /// Mirror a new attribute without a value.
    pub fn declare(&self, name: impl Into<String>) -> Result<(), StateError> {
        self.insert(name.into(), None)
    }

    fn insert(&self, name: String, value: Option<Value>) -> Result<(), StateError> {
        let mut store = self.inner.write().map_err(|_| StateError::LockPoisoned)?;
        if store.contains_key(&name) {
            return Err(StateError::AlreadyMirrored(name));
        }
        store.insert(name, value);
        Ok(())
    }

    /// Names of all mirrored attributes, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Values of all set attributes.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner
            .read()
            .map(|s| {
                s.iter()
                    .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serve one request coming from a worker.
    pub(crate) fn serve(&self, request: StateRequest) -> StateReply {
        let reply = match request {
            StateRequest::Read { name } => self.read_value(&name).map(StateReply::Value),
            StateRequest::Write { name, value } => {
                self.write_value(&name, value).map(|_| StateReply::Written)
            }
            StateRequest::CompareAndSwap {
                name,
                expected,
                new,
            } => self
                .swap_value(&name, expected, new)
                .map(|outcome| match outcome {
                    SwapOutcome::Swapped => StateReply::Swapped,
                    SwapOutcome::Stale(current) => StateReply::Stale(current),
                }),
        };

        reply.unwrap_or_else(|err| match err {
            StateError::NotMirrored(name) => StateReply::NotMirrored(name),
            other => StateReply::Failed(other.to_string()),
        })
    }
}

impl AttributeStore for SharedState {
    fn is_mirrored(&self, name: &str) -> bool {
        self.inner
            .read()
            .map(|s| s.contains_key(name))
            .unwrap_or(false)
    }

    fn read_value(&self, name: &str) -> Result<Option<Value>, StateError> {
        let store = self.inner.read().map_err(|_| StateError::LockPoisoned)?;
        store
            .get(name)
            .cloned()
            .ok_or_else(|| StateError::NotMirrored(name.to_string()))
    }

    fn write_value(&self, name: &str, value: Value) -> Result<(), StateError> {
        let mut store = self.inner.write().map_err(|_| StateError::LockPoisoned)?;
        let slot = store
            .get_mut(name)
            .ok_or_else(|| StateError::NotMirrored(name.to_string()))?;
        *slot = Some(value);
        Ok(())
    }

    fn swap_value(
        &self,
        name: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<SwapOutcome, StateError> {
        let mut store = self.inner.write().map_err(|_| StateError::LockPoisoned)?;
        let slot = store
            .get_mut(name)
            .ok_or_else(|| StateError::NotMirrored(name.to_string()))?;
        if *slot != expected {
            return Ok(SwapOutcome::Stale(slot.clone()));
        }
        *slot = Some(new);
        Ok(SwapOutcome::Swapped)
    }
}
