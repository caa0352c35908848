//! Worker-side view of the shared attributes.
//!
//! A worker holds no copy of the attribute values. Every access becomes a
//! [`StateRequest`] sent to the parent, which serves it against its
//! [`SharedState`](super::SharedState) and answers with a [`StateReply`].
//! The worker only keeps the set of names that were mirrored when it was
//! spawned, and refuses any other name without asking the parent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use super::shared::SharedState;
use super::store::{AttributeStore, StateError, SwapOutcome};

/// A shared-state operation requested by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum StateRequest {
    Read {
        name: String,
    },
    Write {
        name: String,
        value: Value,
    },
    CompareAndSwap {
        name: String,
        expected: Option<Value>,
        new: Value,
    },
}

/// The parent's answer to a [`StateRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub(crate) enum StateReply {
    Value(Option<Value>),
    Written,
    Swapped,
    Stale(Option<Value>),
    NotMirrored(String),
    Failed(String),
}

/// Carries state requests from a worker to whoever owns the store.
pub(crate) trait StateTransport {
    fn request(&mut self, request: StateRequest) -> Result<StateReply, StateError>;
}

/// Serves requests straight from an in-process store.
struct LocalTransport(SharedState);

impl StateTransport for LocalTransport {
    fn request(&mut self, request: StateRequest) -> Result<StateReply, StateError> {
        Ok(self.0.serve(request))
    }
}

/// Attribute store as seen from inside a worker process.
#[derive(Clone)]
pub struct RemoteState {
    mirrored: Rc<HashSet<String>>,
    transport: Rc<RefCell<dyn StateTransport>>,
}

impl RemoteState {
    pub(crate) fn new(
        mirrored: impl IntoIterator<Item = String>,
        transport: Rc<RefCell<dyn StateTransport>>,
    ) -> Self {
        Self {
            mirrored: Rc::new(mirrored.into_iter().collect()),
            transport,
        }
    }

    /// A worker view served directly by `shared`, without a process boundary.
    ///
    /// The set of visible names is fixed to what `shared` mirrors right now.
    pub fn local(shared: SharedState) -> Self {
        let names = shared.names();
        Self::new(names, Rc::new(RefCell::new(LocalTransport(shared))))
    }

    /// Names visible to this worker, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mirrored.iter().cloned().collect();
        names.sort();
        names
    }

    fn send(&self, name: &str, request: StateRequest) -> Result<StateReply, StateError> {
        if !self.mirrored.contains(name) {
            return Err(StateError::NotMirrored(name.to_string()));
        }
        let mut transport = self
            .transport
            .try_borrow_mut()
            .map_err(|_| StateError::Channel("state link is busy".to_string()))?;
        match transport.request(request)? {
            StateReply::NotMirrored(name) => Err(StateError::NotMirrored(name)),
            StateReply::Failed(message) => Err(StateError::Channel(message)),
            reply => Ok(reply),
        }
    }
}

fn unexpected(reply: StateReply) -> StateError {
    StateError::Channel(format!("unexpected reply from parent: {:?}", reply))
}

impl AttributeStore for RemoteState {
    fn is_mirrored(&self, name: &str) -> bool {
        self.mirrored.contains(name)
    }

    fn read_value(&self, name: &str) -> Result<Option<Value>, StateError> {
        let request = StateRequest::Read {
            name: name.to_string(),
        };
        match self.send(name, request)? {
            StateReply::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn write_value(&self, name: &str, value: Value) -> Result<(), StateError> {
        let request = StateRequest::Write {
            name: name.to_string(),
            value,
        };
        match self.send(name, request)? {
            StateReply::Written => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn swap_value(
        &self,
        name: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<SwapOutcome, StateError> {
        let request = StateRequest::CompareAndSwap {
            name: name.to_string(),
            expected,
            new,
        };
        match self.send(name, request)? {
            StateReply::Swapped => Ok(SwapOutcome::Swapped),
            StateReply::Stale(current) => Ok(SwapOutcome::Stale(current)),
            other => Err(unexpected(other)),
        }
    }
}
