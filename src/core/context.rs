//! Execution contexts handed to task bodies.
//!
//! - [`TaskContext`]: given to cooperative bodies; exposes the parent's shared
//!   store, on-demand calls to other tasks, and the brain's log sink.
//! - [`WorkerContext`]: given to process bodies inside a worker; exposes only
//!   the attributes that were mirrored when the worker was spawned.

use std::cell::Cell;
use std::sync::Arc;
use tracing::Level;

use super::output::TaskOutput;
use super::types::TaskId;
use crate::brain::{Brain, BrainError, LogSink};
use crate::state::{RemoteState, SharedState};

/// Context for a cooperative invocation.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    brain: Brain,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, brain: Brain) -> Self {
        Self { task_id, brain }
    }

    /// Name of the running task.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The parent's shared attribute store.
    pub fn shared(&self) -> &SharedState {
        self.brain.shared()
    }

    /// The brain this task belongs to.
    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    /// Invoke another task on demand and wait for its output.
    ///
    /// The wait is cooperative; other tasks keep running meanwhile.
    pub async fn call(&self, name: &str) -> Result<TaskOutput, BrainError> {
        self.brain.call(name).await
    }

    /// Write a line through the brain's log sink.
    pub fn log(&self, message: &str, level: Level) {
        self.brain.log(message, level);
    }
}

/// Context for an invocation inside a worker process.
pub struct WorkerContext {
    task_id: TaskId,
    state: RemoteState,
    sink: Arc<dyn LogSink>,
    tick: Cell<u64>,
}

impl WorkerContext {
    pub(crate) fn new(task_id: TaskId, state: RemoteState, sink: Arc<dyn LogSink>) -> Self {
        Self {
            task_id,
            state,
            sink,
            tick: Cell::new(0),
        }
    }

    /// Name of the running task.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Mirrored attributes, brokered by the parent.
    pub fn shared(&self) -> &RemoteState {
        &self.state
    }

    /// Tick number within this worker lifetime, starting at 1. Zero during setup.
    pub fn tick(&self) -> u64 {
        self.tick.get()
    }

    pub(crate) fn set_tick(&self, tick: u64) {
        self.tick.set(tick);
    }

    /// OS process id of the worker.
    pub fn pid(&self) -> u32 {
        std::process::id()
    }

    /// Write a line through the worker's log sink.
    pub fn log(&self, message: &str, level: Level) {
        self.sink.log(message, level);
    }
}
