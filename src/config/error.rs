//! Configuration error types.
//!
//! Everything that can be wrong before a brain starts running: unreadable or
//! malformed configuration files, and inconsistent task declarations. These
//! errors are fatal to startup and never retried.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading configuration or building a brain.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file with context.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(serde_yaml::Error),

    /// Failed to parse YAML from a specific file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A task was declared with an empty name.
    #[error("task name must not be empty")]
    EmptyTaskName,

    /// Two tasks share a name.
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    /// A task repeats with a zero interval.
    #[error("task '{0}' has a zero refresh rate")]
    ZeroRefreshRate(String),

    /// A task has a zero timeout.
    #[error("task '{0}' has a zero timeout")]
    ZeroTimeout(String),

    /// A duration is negative, infinite or not a number.
    #[error("task '{task}' has an invalid {field}: {value}")]
    InvalidDuration {
        task: String,
        field: &'static str,
        value: f64,
    },

    /// A suspending body was configured to run in a worker process.
    #[error("task '{0}' is async and cannot run in a worker process")]
    SuspendingProcessTask(String),

    /// A synchronous worker body was configured to run cooperatively.
    #[error("task '{0}' is a blocking worker body and cannot run cooperatively")]
    BlockingCooperativeTask(String),

    /// A setup/loop split on anything other than a recurring process task.
    #[error("task '{0}' has a deferred loop but is not a recurring process task")]
    DeferredLoopMisuse(String),

    /// `define_loop_later` on a task that declares no setup phase.
    #[error("task '{0}' sets define_loop_later but declares no setup phase")]
    MissingLoopSetup(String),

    /// Configuration overrides a task that was never declared.
    #[error("configuration names unknown task: {0}")]
    UnknownTask(String),

    /// An attribute was mirrored twice.
    #[error("attribute '{0}' is mirrored more than once")]
    DuplicateAttribute(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::YamlError(err)
    }
}
