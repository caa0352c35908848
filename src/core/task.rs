//! Task declarations and descriptors.
//!
//! A [`TaskSpec`] is what application code writes: a name, a body, and the
//! declarative [`TaskOptions`]. When the brain is built every spec is validated
//! and frozen into a [`TaskDescriptor`], which executors read but never modify.
//!
//! Three body kinds exist:
//!
//! - cooperative bodies are async closures run on the parent's runtime,
//! - process bodies are synchronous closures run inside a worker process,
//! - deferred-loop bodies pair a one-time setup with a repeating loop, both run
//!   inside a worker process (see [`DeferredLoop`]).
//!
//! # Example
//!
//! ```ignore
//! use taskbrain::{AttributeStore, Payload, TaskSpec};
//! use std::time::Duration;
//!
//! let tick = TaskSpec::process("sb_incrementer", |ctx| {
//!     ctx.shared().update("share_attr2", |n: i64| n + 1)?;
//!     Ok(Payload::Empty)
//! })
//! .run_on_start(true)
//! .refresh_rate(Duration::from_secs(1));
//! ```

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::context::{TaskContext, WorkerContext};
use super::deferred::DeferredLoop;
use super::output::Payload;
use super::types::{ExecutionMode, TaskId};
use crate::config::ConfigError;
use crate::state::StateError;

/// Errors raised by task bodies.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The body reported a failure.
    #[error("execution failed: {0}")]
    Failed(String),

    /// The body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A shared attribute could not be read or written.
    #[error("shared state error: {0}")]
    State(#[from] StateError),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// True when the error stems from a misconfiguration rather than a runtime
    /// failure, such as a worker touching a parent-only attribute.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TaskError::State(err) if err.is_configuration())
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Declarative task options.
///
/// Durations are expressed in seconds so the same structure can be read from
/// YAML. An absent `refresh_rate` makes the task one-shot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Run in a dedicated worker process instead of the parent's runtime.
    pub process: bool,
    /// Start automatically with the brain.
    pub run_on_start: bool,
    /// Seconds between the starts of two consecutive ticks.
    pub refresh_rate: Option<f64>,
    /// Seconds an invocation may run before it is abandoned.
    pub timeout: Option<f64>,
    /// The routine is split into a one-time setup and a repeating loop.
    pub define_loop_later: bool,
}

pub(crate) type CooperativeFn =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<Payload, TaskError>> + Send + Sync>;

pub(crate) type ProcessFn =
    Arc<dyn Fn(&WorkerContext) -> Result<Payload, TaskError> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum TaskBody {
    Cooperative(CooperativeFn),
    Process(ProcessFn),
    DeferredLoop(DeferredLoop),
}

impl TaskBody {
    fn kind(&self) -> &'static str {
        match self {
            TaskBody::Cooperative(_) => "cooperative",
            TaskBody::Process(_) => "process",
            TaskBody::DeferredLoop(_) => "deferred-loop",
        }
    }
}

/// A task declaration, validated into a [`TaskDescriptor`] at build time.
#[derive(Clone)]
pub struct TaskSpec {
    name: TaskId,
    options: TaskOptions,
    body: TaskBody,
}

impl TaskSpec {
    /// Declare a task that runs on the parent's cooperative runtime.
    pub fn cooperative<F, Fut>(name: impl Into<TaskId>, body: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            options: TaskOptions::default(),
            body: TaskBody::Cooperative(Arc::new(move |ctx: TaskContext| body(ctx).boxed())),
        }
    }

    /// Declare a task that runs synchronously inside a worker process.
    pub fn process<F>(name: impl Into<TaskId>, body: F) -> Self
    where
        F: Fn(&WorkerContext) -> Result<Payload, TaskError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            options: TaskOptions {
                process: true,
                ..TaskOptions::default()
            },
            body: TaskBody::Process(Arc::new(body)),
        }
    }

    /// Declare a recurring worker task with a one-time setup phase.
    ///
    /// `setup` runs once per worker lifetime and builds state `S` that never
    /// leaves the worker. `body` runs every tick with that state in scope.
    /// A refresh rate must be set before the brain is built.
    pub fn deferred_loop<S, Setup, Body>(name: impl Into<TaskId>, setup: Setup, body: Body) -> Self
    where
        S: 'static,
        Setup: Fn(&WorkerContext) -> Result<S, TaskError> + Send + Sync + 'static,
        Body: Fn(&WorkerContext, &mut S) -> Result<Payload, TaskError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            options: TaskOptions {
                process: true,
                define_loop_later: true,
                ..TaskOptions::default()
            },
            body: TaskBody::DeferredLoop(DeferredLoop::new(setup, body)),
        }
    }

    /// Start the task automatically with the brain.
    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.options.run_on_start = run_on_start;
        self
    }

    /// Make the task recurring with the given start-to-start interval.
    pub fn refresh_rate(mut self, interval: Duration) -> Self {
        self.options.refresh_rate = Some(interval.as_secs_f64());
        self
    }

    /// Abandon invocations that run longer than `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.options.timeout = Some(limit.as_secs_f64());
        self
    }

    /// Replace the declarative options wholesale.
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Task name.
    pub fn name(&self) -> &TaskId {
        &self.name
    }

    /// Current declarative options.
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub(crate) fn options_mut(&mut self) -> &mut TaskOptions {
        &mut self.options
    }

    /// Validate the declaration and freeze it into a descriptor.
    pub(crate) fn into_descriptor(self) -> Result<TaskDescriptor, ConfigError> {
        let name = self.name.as_str().to_string();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyTaskName);
        }

        let refresh_interval = match self.options.refresh_rate {
            Some(secs) => Some(seconds(&name, "refresh_rate", secs)?),
            None => None,
        };
        let timeout = match self.options.timeout {
            Some(secs) => Some(seconds(&name, "timeout", secs)?),
            None => None,
        };

        let mode = match (&self.body, self.options.process) {
            (TaskBody::Cooperative(_), true) => {
                return Err(ConfigError::SuspendingProcessTask(name));
            }
            (TaskBody::Cooperative(_), false) => ExecutionMode::Cooperative,
            (_, false) => return Err(ConfigError::BlockingCooperativeTask(name)),
            (_, true) => ExecutionMode::IsolatedProcess,
        };

        match (&self.body, self.options.define_loop_later) {
            (TaskBody::DeferredLoop(_), true) if refresh_interval.is_none() => {
                return Err(ConfigError::DeferredLoopMisuse(name));
            }
            (TaskBody::DeferredLoop(_), false) => {
                return Err(ConfigError::DeferredLoopMisuse(name));
            }
            (TaskBody::DeferredLoop(_), true) => {}
            (_, true) => return Err(ConfigError::MissingLoopSetup(name)),
            (_, false) => {}
        }

        Ok(TaskDescriptor {
            name: self.name,
            mode,
            run_on_start: self.options.run_on_start,
            refresh_interval,
            timeout,
            body: self.body,
        })
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("body", &self.body.kind())
            .finish()
    }
}

fn seconds(task: &str, field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    let duration = Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDuration {
        task: task.to_string(),
        field,
        value: secs,
    })?;
    // anything below one nanosecond rounds down to zero
    if duration.is_zero() {
        return Err(match field {
            "refresh_rate" => ConfigError::ZeroRefreshRate(task.to_string()),
            _ => ConfigError::ZeroTimeout(task.to_string()),
        });
    }
    Ok(duration)
}

/// Immutable, validated task metadata.
#[derive(Clone)]
pub struct TaskDescriptor {
    /// Task name.
    pub name: TaskId,
    /// Where the body executes.
    pub mode: ExecutionMode,
    /// Whether the task is part of the startup set.
    pub run_on_start: bool,
    /// Start-to-start tick interval; `None` for one-shot tasks.
    pub refresh_interval: Option<Duration>,
    /// Per-invocation time limit.
    pub timeout: Option<Duration>,
    pub(crate) body: TaskBody,
}

impl TaskDescriptor {
    /// True when the task repeats at `refresh_interval`.
    pub fn is_recurring(&self) -> bool {
        self.refresh_interval.is_some()
    }

    /// True when the task has a worker-side setup phase.
    pub fn has_deferred_loop(&self) -> bool {
        matches!(self.body, TaskBody::DeferredLoop(_))
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("run_on_start", &self.run_on_start)
            .field("refresh_interval", &self.refresh_interval)
            .field("timeout", &self.timeout)
            .field("body", &self.body.kind())
            .finish()
    }
}
