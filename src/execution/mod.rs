//! Task execution engine.
//!
//! Two implementations of [`Executor`] back every task: the
//! [`CooperativeExecutor`] runs futures on the parent's runtime and the
//! [`ProcessExecutor`] runs bodies in supervised worker processes. Callers
//! never need to know which one serves a given task.

mod cooperative;
mod process;
mod protocol;
pub(crate) mod worker;

use async_trait::async_trait;

use crate::brain::Brain;
use crate::core::output::TaskOutput;
use crate::core::task::TaskDescriptor;
use crate::core::types::ExecutionMode;

pub use cooperative::CooperativeExecutor;
pub use process::{ProcessExecutor, WorkerCommand};
pub use protocol::ProtocolError;
pub use worker::{WORKER_ENV, WorkerError};

/// A way of running tasks.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Which tasks this executor serves.
    fn mode(&self) -> ExecutionMode;

    /// Run a startup task.
    ///
    /// One-shot tasks return after their single invocation; recurring tasks
    /// return only once the executor is stopped. Every outcome is reported
    /// through the brain.
    async fn start(&self, brain: &Brain, task: &TaskDescriptor);

    /// Run the task once on demand and hand back its output.
    async fn invoke_once(&self, brain: &Brain, task: &TaskDescriptor) -> TaskOutput;

    /// Stop every invocation in progress and refuse new ones.
    fn stop(&self);
}
