//! The brain: registry of tasks and entry point for running them.
//!
//! A [`Brain`] owns the validated task descriptors, the shared attribute store
//! and one executor per execution mode. The embedding program either asks for
//! the startup tasks and drives them itself ([`Brain::get_tasks`]) or lets the
//! brain spawn them on the current runtime ([`Brain::start`]).
//!
//! A binary that declares process tasks must call [`Brain::worker_entry`]
//! before anything else: worker processes are that same binary re-executed.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info};

use super::builder::BrainBuilder;
use super::handle::BrainHandle;
use super::log::LogSink;
use super::types::BrainError;
use crate::config::BrainConfig;
use crate::core::output::{ExecutionState, TaskOutput};
use crate::core::task::TaskDescriptor;
use crate::core::types::{ExecutionMode, TaskId};
use crate::execution::worker::{self, WORKER_ENV};
use crate::execution::{
    CooperativeExecutor, Executor, ProcessExecutor, ProtocolError, WorkerCommand, WorkerError,
};
use crate::state::SharedState;

pub(crate) struct BrainInner {
    pub(crate) tasks: Vec<TaskDescriptor>,
    pub(crate) shared: SharedState,
    pub(crate) sink: Arc<dyn LogSink>,
    pub(crate) config: BrainConfig,
    pub(crate) worker_command: Option<WorkerCommand>,
    pub(crate) cooperative: CooperativeExecutor,
    pub(crate) process: ProcessExecutor,
    pub(crate) cancel: CancellationToken,
}

/// A set of declared tasks plus the state they share.
///
/// Cloning is cheap; clones refer to the same brain.
#[derive(Clone)]
pub struct Brain {
    inner: Arc<BrainInner>,
}

impl Brain {
    /// Start declaring a brain that reports through `sink`.
    pub fn builder(sink: impl LogSink + 'static) -> BrainBuilder {
        BrainBuilder::new(Arc::new(sink))
    }

    pub(crate) fn from_inner(inner: BrainInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The shared attribute store.
    pub fn shared(&self) -> &SharedState {
        &self.inner.shared
    }

    /// Descriptor of the task called `name`.
    pub fn spec(&self, name: &str) -> Option<&TaskDescriptor> {
        self.inner.tasks.iter().find(|t| t.name.as_str() == name)
    }

    /// All descriptors, in declaration order.
    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.inner.tasks
    }

    /// Effective configuration.
    pub fn config(&self) -> &BrainConfig {
        &self.inner.config
    }

    /// Write a line through the log sink.
    pub fn log(&self, message: &str, level: Level) {
        self.inner.sink.log(message, level);
    }

    pub(crate) fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.inner.sink)
    }

    pub(crate) fn worker_command(&self) -> std::io::Result<WorkerCommand> {
        match &self.inner.worker_command {
            Some(command) => Ok(command.clone()),
            None => WorkerCommand::current_exe(),
        }
    }

    /// The executor serving tasks of `mode`.
    pub fn executor(&self, mode: ExecutionMode) -> &dyn Executor {
        match mode {
            ExecutionMode::Cooperative => &self.inner.cooperative,
            ExecutionMode::IsolatedProcess => &self.inner.process,
        }
    }

    /// One runnable handle per `run_on_start` task, in declaration order.
    pub fn get_tasks(&self) -> Vec<StartupTask> {
        self.inner
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.run_on_start)
            .map(|(index, _)| StartupTask {
                brain: self.clone(),
                index,
            })
            .collect()
    }

    /// Spawn every startup task on the current tokio runtime.
    ///
    /// All tasks are spawned before this returns. Must be called from within a
    /// runtime.
    pub fn start(&self) -> BrainHandle {
        let tasks: Vec<_> = self
            .get_tasks()
            .into_iter()
            .map(|task| {
                let name = task.name().clone();
                (name, tokio::spawn(task.run()))
            })
            .collect();
        info!(tasks = tasks.len(), "brain started");
        BrainHandle::new(self.clone(), tasks)
    }

    /// Invoke a task on demand, whatever its mode, and wait for its output.
    pub async fn call(&self, name: &str) -> Result<TaskOutput, BrainError> {
        if self.is_stopped() {
            return Err(BrainError::Stopped);
        }
        let task = self
            .spec(name)
            .ok_or_else(|| BrainError::UnknownTask(name.to_string()))?;
        debug!(task = %task.name, mode = %task.mode, "on-demand call");
        let output = self.executor(task.mode).invoke_once(self, task).await;
        self.report(task, &output);
        Ok(output)
    }

    /// Log the status line for one outcome.
    pub(crate) fn report(&self, task: &TaskDescriptor, output: &TaskOutput) {
        let level = match output.execution_state {
            ExecutionState::Success => Level::DEBUG,
            ExecutionState::ErrorOccurred => Level::ERROR,
            ExecutionState::Timeout => Level::WARN,
        };
        let line = format!("[{}] {}: {}", task.mode.tag(), task.name, output);
        self.log(&line, level);
    }

    /// Stop both executors. Recurring tasks end, workers are killed, and
    /// in-flight invocations are abandoned. A stopped brain stays stopped.
    pub fn stop(&self) {
        self.inner.cooperative.stop();
        self.inner.process.stop();
        self.inner.cancel.cancel();
    }

    /// True once [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Serve as a worker if this process was launched as one.
    ///
    /// Returns `None` in a normal process. In a worker it runs the requested
    /// task over stdin/stdout until it is done or the parent goes away, then
    /// returns the exit code the process should end with.
    pub fn worker_entry(&self) -> Option<ExitCode> {
        let task = std::env::var(WORKER_ENV).ok()?;
        let stdin = std::io::stdin().lock();
        let stdout = std::io::stdout();

        match worker::serve(self, stdin, stdout) {
            Ok(()) => Some(ExitCode::SUCCESS),
            Err(WorkerError::Protocol(ProtocolError::Io(err)))
                if err.kind() == std::io::ErrorKind::BrokenPipe =>
            {
                debug!(task = %task, "parent closed the worker link");
                Some(ExitCode::SUCCESS)
            }
            Err(err) => {
                error!(task = %task, error = %err, "worker failed");
                Some(ExitCode::FAILURE)
            }
        }
    }
}

/// A startup task, ready to be driven by the embedding runtime.
pub struct StartupTask {
    brain: Brain,
    index: usize,
}

impl StartupTask {
    /// Task name.
    pub fn name(&self) -> &TaskId {
        &self.descriptor().name
    }

    /// Task descriptor.
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.brain.inner.tasks[self.index]
    }

    /// Run the task: once for one-shot tasks, until the brain stops for
    /// recurring ones.
    pub fn run(self) -> BoxFuture<'static, ()> {
        async move {
            let task = self.descriptor();
            self.brain.executor(task.mode).start(&self.brain, task).await;
        }
        .boxed()
    }
}
