//! taskbrain - cooperative and isolated-process tasks under one roof.
//!
//! A [`Brain`] holds a set of named tasks. Each task is either a future run on
//! the parent's tokio runtime or a blocking body run in its own worker process.
//! Both kinds share a registry of mirrored attributes, report a [`TaskOutput`]
//! for every invocation, and can be called by name from any other task.
//!
//! Worker processes are the embedding binary re-executed, so a binary that
//! declares process tasks must call [`Brain::worker_entry`] first thing in
//! `main`, before starting a runtime.

pub mod brain;
pub mod config;
pub mod core;
pub mod execution;
pub mod state;
pub mod testing;

pub use brain::{Brain, BrainBuilder, BrainError, BrainHandle, LogSink, StartupTask, TracingSink};
pub use config::{BrainConfig, ConfigError, TaskOverride, WorkerConfig};
pub use core::context::{TaskContext, WorkerContext};
pub use core::output::{ExecutionState, Payload, TaskOutput};
pub use core::task::{TaskDescriptor, TaskError, TaskOptions, TaskSpec};
pub use core::types::{ExecutionMode, TaskId};
pub use execution::{
    CooperativeExecutor, Executor, ProcessExecutor, WORKER_ENV, WorkerCommand, WorkerError,
};
pub use state::{AttributeStore, RemoteState, SharedState, StateError, SwapOutcome};
