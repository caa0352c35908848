//! Typed access to mirrored attributes.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when working with shared attributes.
#[derive(Debug, Error)]
pub enum StateError {
    /// The attribute was never mirrored, or was mirrored after this worker
    /// was spawned.
    #[error("attribute '{0}' is not mirrored into the shared state")]
    NotMirrored(String),

    /// The attribute is already mirrored.
    #[error("attribute '{0}' is already mirrored")]
    AlreadyMirrored(String),

    /// The attribute is mirrored but holds no value yet.
    #[error("attribute '{0}' is mirrored but not set")]
    Unset(String),

    /// Failed to serialize a value for the store.
    #[error("serialization error for attribute '{name}': {message}")]
    Serialization { name: String, message: String },

    /// Failed to deserialize a value from the store.
    #[error("deserialization error for attribute '{name}': {message}")]
    Deserialization { name: String, message: String },

    /// Store lock was poisoned (concurrent access failure).
    #[error("shared state lock poisoned")]
    LockPoisoned,

    /// The link between a worker and its parent failed.
    #[error("shared state channel error: {0}")]
    Channel(String),
}

impl StateError {
    /// True for programming mistakes that should surface immediately.
    pub fn is_configuration(&self) -> bool {
        matches!(self, StateError::NotMirrored(_) | StateError::AlreadyMirrored(_))
    }
}

/// Outcome of a compare-and-swap on one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    /// The expected value matched and the new value was stored.
    Swapped,
    /// Another writer got there first; carries the value actually stored.
    Stale(Option<Value>),
}

pub(crate) fn encode<T: Serialize>(name: &str, value: &T) -> Result<Value, StateError> {
    serde_json::to_value(value).map_err(|e| StateError::Serialization {
        name: name.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, StateError> {
    serde_json::from_value(value).map_err(|e| StateError::Deserialization {
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// Attribute store shared by the parent and its workers.
///
/// Implementors provide raw JSON access; the typed helpers are shared.
/// `update` is a read-modify-write that never loses a concurrent update: the
/// default implementation retries a compare-and-swap until it wins.
pub trait AttributeStore {
    /// True when `name` is visible through this store.
    fn is_mirrored(&self, name: &str) -> bool;

    /// Raw value of `name`; `Ok(None)` when mirrored but unset.
    fn read_value(&self, name: &str) -> Result<Option<Value>, StateError>;

    /// Overwrite the raw value of `name`.
    fn write_value(&self, name: &str, value: Value) -> Result<(), StateError>;

    /// Store `new` only if the current value equals `expected`.
    fn swap_value(
        &self,
        name: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<SwapOutcome, StateError>;

    /// True when `name` is mirrored and holds a value.
    fn is_set(&self, name: &str) -> Result<bool, StateError> {
        Ok(self.read_value(name)?.is_some())
    }

    /// Read a typed value.
    fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, StateError> {
        let value = self
            .read_value(name)?
            .ok_or_else(|| StateError::Unset(name.to_string()))?;
        decode(name, value)
    }

    /// Read a typed value, `None` when the attribute is unset.
    fn get_optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StateError> {
        self.read_value(name)?
            .map(|value| decode(name, value))
            .transpose()
    }

    /// Write a typed value.
    fn set<T: Serialize>(&self, name: &str, value: T) -> Result<(), StateError> {
        let value = encode(name, &value)?;
        self.write_value(name, value)
    }

    /// Typed compare-and-swap. Returns `true` when the swap happened.
    fn compare_and_swap<T: Serialize>(
        &self,
        name: &str,
        expected: Option<&T>,
        new: T,
    ) -> Result<bool, StateError> {
        let expected = expected.map(|value| encode(name, value)).transpose()?;
        let new = encode(name, &new)?;
        Ok(self.swap_value(name, expected, new)? == SwapOutcome::Swapped)
    }

    /// Atomically replace the value of `name` with `f(current)` and return the
    /// stored result. `f` may run more than once under contention.
    fn update<T, F>(&self, name: &str, mut f: F) -> Result<T, StateError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(T) -> T,
    {
        loop {
            let current = self
                .read_value(name)?
                .ok_or_else(|| StateError::Unset(name.to_string()))?;
            let next = encode(name, &f(decode(name, current.clone())?))?;
            if let SwapOutcome::Swapped = self.swap_value(name, Some(current), next.clone())? {
                return decode(name, next);
            }
        }
    }
}
