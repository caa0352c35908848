//! Task outcomes.
//!
//! Every invocation, cooperative or isolated, scheduled or on demand, ends in
//! exactly one [`TaskOutput`]. Outputs produced inside a worker process travel
//! back to the parent as a [`WireOutput`]; values that cannot be serialized
//! arrive as [`Payload::Untransferable`] so the parent can tell them apart from
//! a task that returned nothing.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::task::TaskError;

/// Terminal state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    /// The body returned normally.
    Success,
    /// The body returned an error, panicked, or its worker crashed.
    ErrorOccurred,
    /// The body exceeded its configured timeout.
    Timeout,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Success => write!(f, "SUCCESS"),
            ExecutionState::ErrorOccurred => write!(f, "ERROR_OCCURRED"),
            ExecutionState::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// The value a task body produced.
#[derive(Clone, Default)]
pub enum Payload {
    /// The task returned no value.
    #[default]
    Empty,
    /// A serializable value, transferable across the process boundary.
    Value(Value),
    /// A value that lives in the producing process only.
    Local(Arc<dyn Any + Send + Sync>),
    /// A value was produced but could not cross the process boundary.
    Untransferable,
}

impl Payload {
    /// Serialize `value`, falling back to [`Payload::Untransferable`] when it
    /// has no JSON representation.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Payload::Value(value),
            Err(_) => Payload::Untransferable,
        }
    }

    /// Wrap a value that stays in the current process.
    pub fn local<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Local(Arc::new(value))
    }

    /// True when the task returned nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// True when a value existed but did not survive the process boundary.
    pub fn is_untransferable(&self) -> bool {
        matches!(self, Payload::Untransferable)
    }

    /// Borrow the JSON value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Deserialize the JSON value into `T`.
    pub fn get<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_value()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Borrow a process-local value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Local(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub(crate) fn to_wire(&self) -> WirePayload {
        match self {
            Payload::Empty => WirePayload::Empty,
            Payload::Value(value) => WirePayload::Value(value.clone()),
            Payload::Local(_) | Payload::Untransferable => WirePayload::Untransferable,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => write!(f, "Empty"),
            Payload::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Payload::Local(_) => write!(f, "Local(..)"),
            Payload::Untransferable => write!(f, "Untransferable"),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => write!(f, "none"),
            Payload::Value(value) => write!(f, "{}", value),
            Payload::Local(_) => write!(f, "<local value>"),
            Payload::Untransferable => write!(f, "<untransferable>"),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

/// Payload as carried by the worker protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub(crate) enum WirePayload {
    Empty,
    Value(Value),
    Untransferable,
}

impl From<WirePayload> for Payload {
    fn from(wire: WirePayload) -> Self {
        match wire {
            WirePayload::Empty => Payload::Empty,
            WirePayload::Value(value) => Payload::Value(value),
            WirePayload::Untransferable => Payload::Untransferable,
        }
    }
}

/// Structured outcome of one task invocation.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// What the body returned.
    pub result: Payload,
    /// How the invocation ended.
    pub execution_state: ExecutionState,
    /// Failure description for non-successful outputs.
    pub error: Option<String>,
}

impl TaskOutput {
    /// Create a successful output.
    pub fn success(result: Payload) -> Self {
        Self {
            result,
            execution_state: ExecutionState::Success,
            error: None,
        }
    }

    /// Create an `ERROR_OCCURRED` output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: Payload::Empty,
            execution_state: ExecutionState::ErrorOccurred,
            error: Some(message.into()),
        }
    }

    /// Create a `TIMEOUT` output.
    pub fn timeout(limit: Duration) -> Self {
        Self {
            result: Payload::Empty,
            execution_state: ExecutionState::Timeout,
            error: Some(format!("timed out after {:?}", limit)),
        }
    }

    /// Convert a body's return value.
    pub fn from_result(result: Result<Payload, TaskError>) -> Self {
        match result {
            Ok(payload) => Self::success(payload),
            Err(err) => Self::error(err.to_string()),
        }
    }

    /// True iff the state is `SUCCESS`.
    pub fn is_success(&self) -> bool {
        self.execution_state == ExecutionState::Success
    }

    /// True when the invocation failed with an error or crash.
    pub fn have_crashed(&self) -> bool {
        self.execution_state == ExecutionState::ErrorOccurred
    }

    /// True when the invocation ran out of time.
    pub fn have_timeout(&self) -> bool {
        self.execution_state == ExecutionState::Timeout
    }

    /// Deserialize the result value into `T`.
    pub fn value<T: DeserializeOwned>(&self) -> Option<T> {
        self.result.get()
    }

    pub(crate) fn to_wire(&self) -> WireOutput {
        WireOutput {
            result: self.result.to_wire(),
            execution_state: self.execution_state,
            error: self.error.clone(),
        }
    }
}

impl fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{} ({})", self.execution_state, error),
            None => write!(f, "{} (result: {})", self.execution_state, self.result),
        }
    }
}

/// [`TaskOutput`] as carried by the worker protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireOutput {
    pub(crate) result: WirePayload,
    pub(crate) execution_state: ExecutionState,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

impl From<WireOutput> for TaskOutput {
    fn from(wire: WireOutput) -> Self {
        Self {
            result: wire.result.into(),
            execution_state: wire.execution_state,
            error: wire.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_success_output() {
        let output = TaskOutput::success(Payload::json(&2));

        assert!(output.is_success());
        assert!(!output.have_crashed());
        assert!(!output.have_timeout());
        assert_eq!(output.value::<i32>(), Some(2));
        assert!(output.error.is_none());
    }

    #[test]
    fn test_error_output() {
        let output = TaskOutput::from_result(Err(TaskError::failed("boom")));

        assert!(!output.is_success());
        assert!(output.have_crashed());
        assert_eq!(output.execution_state, ExecutionState::ErrorOccurred);
        assert!(output.error.unwrap().contains("boom"));
    }

    #[test]
    fn test_timeout_output() {
        let output = TaskOutput::timeout(Duration::from_secs(1));

        assert!(!output.is_success());
        assert!(output.have_timeout());
        assert!(!output.have_crashed());
        assert!(output.result.is_empty());
    }

    #[test]
    fn test_unserializable_value_is_untransferable() {
        // JSON object keys must be strings
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");

        let payload = Payload::json(&map);

        assert!(payload.is_untransferable());
        assert!(!payload.is_empty());
    }

    #[test]
    fn test_local_payload_crosses_as_untransferable() {
        let output = TaskOutput::success(Payload::local(std::sync::Mutex::new(5u8)));
        assert!(output.result.downcast_ref::<std::sync::Mutex<u8>>().is_some());

        let received: TaskOutput = output.to_wire().into();

        assert!(received.is_success());
        assert!(received.result.is_untransferable());
    }

    #[test]
    fn test_empty_and_untransferable_stay_distinct_on_the_wire() {
        let empty: TaskOutput = TaskOutput::success(Payload::Empty).to_wire().into();
        let lost: TaskOutput = TaskOutput::success(Payload::Untransferable)
            .to_wire()
            .into();

        assert!(empty.result.is_empty());
        assert!(lost.result.is_untransferable());
    }

    #[test]
    fn test_wire_output_json_shape() {
        let wire = TaskOutput::success(Payload::json(&"hi")).to_wire();
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["execution_state"], "SUCCESS");
        assert_eq!(json["result"]["kind"], "value");
        assert_eq!(json["result"]["value"], "hi");
    }

    #[test]
    fn test_output_display() {
        let ok = TaskOutput::success(Payload::json(&1));
        let failed = TaskOutput::error("worker exited");

        assert_eq!(ok.to_string(), "SUCCESS (result: 1)");
        assert_eq!(failed.to_string(), "ERROR_OCCURRED (worker exited)");
    }
}
