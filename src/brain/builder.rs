//! Brain construction.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::engine::{Brain, BrainInner};
use super::log::LogSink;
use crate::config::{BrainConfig, ConfigError};
use crate::core::task::{TaskDescriptor, TaskSpec};
use crate::execution::{CooperativeExecutor, ProcessExecutor, WorkerCommand};
use crate::state::{SharedState, StateError};

/// Builder for a [`Brain`].
///
/// Attributes mirrored here form the base shared state every worker can see.
/// Values a brain keeps only for itself should stay in task closures instead.
///
/// # Example
///
/// ```ignore
/// let brain = Brain::builder(TracingSink)
///     .mirror("share_attr1", 0)
///     .task(TaskSpec::cooperative("mp_start", |ctx| async move {
///         ctx.log("[MP] MainBrain started", Level::INFO);
///         Ok(Payload::Empty)
///     }).run_on_start(true))
///     .build()?;
/// ```
pub struct BrainBuilder {
    sink: Arc<dyn LogSink>,
    attributes: Vec<(String, Result<Option<Value>, String>)>,
    specs: Vec<TaskSpec>,
    config: BrainConfig,
    worker_command: Option<WorkerCommand>,
}

impl BrainBuilder {
    pub(crate) fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            attributes: Vec::new(),
            specs: Vec::new(),
            config: BrainConfig::default(),
            worker_command: None,
        }
    }

    /// Mirror an attribute with an initial value.
    pub fn mirror<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Self {
        let value = serde_json::to_value(&value)
            .map(Some)
            .map_err(|e| e.to_string());
        self.attributes.push((name.into(), value));
        self
    }

    /// Mirror an attribute that has no value yet.
    pub fn declare(mut self, name: impl Into<String>) -> Self {
        self.attributes.push((name.into(), Ok(None)));
        self
    }

    /// Declare a task. Declaration order is startup order.
    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Declare several tasks.
    pub fn tasks(mut self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Use `config` for supervision settings and task overrides.
    pub fn config(mut self, config: BrainConfig) -> Self {
        self.config = config;
        self
    }

    /// Launch workers with `command` instead of re-executing the current binary.
    pub fn worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    /// Validate every declaration and build the brain.
    pub fn build(self) -> Result<Brain, ConfigError> {
        let shared = SharedState::new();
        for (name, value) in self.attributes {
            let value = value.map_err(|message| {
                ConfigError::InvalidConfig(format!("attribute '{}': {}", name, message))
            })?;
            let mirrored = match value {
                Some(value) => shared.mirror(name.clone(), value),
                None => shared.declare(name.clone()),
            };
            mirrored.map_err(|err| match err {
                StateError::AlreadyMirrored(name) => ConfigError::DuplicateAttribute(name),
                other => ConfigError::InvalidConfig(other.to_string()),
            })?;
        }

        let mut specs = self.specs;
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name().clone()) {
                return Err(ConfigError::DuplicateTask(spec.name().to_string()));
            }
        }

        for (name, patch) in &self.config.tasks {
            let spec = specs
                .iter_mut()
                .find(|spec| spec.name().as_str() == name)
                .ok_or_else(|| ConfigError::UnknownTask(name.clone()))?;
            patch.apply(spec.options_mut());
        }

        let tasks = specs
            .into_iter()
            .map(TaskSpec::into_descriptor)
            .collect::<Result<Vec<TaskDescriptor>, _>>()?;

        let cancel = CancellationToken::new();
        Ok(Brain::from_inner(BrainInner {
            tasks,
            shared,
            sink: self.sink,
            config: self.config,
            worker_command: self.worker_command,
            cooperative: CooperativeExecutor::new(cancel.child_token()),
            process: ProcessExecutor::new(cancel.child_token()),
            cancel,
        }))
    }
}
