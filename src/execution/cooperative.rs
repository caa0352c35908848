//! Cooperative execution on the parent's runtime.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

use super::Executor;
use crate::brain::Brain;
use crate::core::context::TaskContext;
use crate::core::output::TaskOutput;
use crate::core::task::{TaskBody, TaskDescriptor, TaskError, panic_message};
use crate::core::types::ExecutionMode;

/// Runs cooperative tasks as futures on the parent's runtime.
///
/// Recurring tasks tick on a start-to-start interval. A tick that overruns
/// delays the following ones but none is skipped. A timed-out invocation is
/// dropped at its next suspension point and never resumes.
pub struct CooperativeExecutor {
    cancel: CancellationToken,
}

impl CooperativeExecutor {
    /// Create an executor that stops when `cancel` fires.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Run one invocation, converting every terminal state into an output.
    async fn run_once(&self, brain: &Brain, task: &TaskDescriptor) -> TaskOutput {
        let TaskBody::Cooperative(body) = &task.body else {
            return TaskOutput::error(format!("task '{}' is not cooperative", task.name));
        };

        let ctx = TaskContext::new(task.name.clone(), brain.clone());
        let invocation = AssertUnwindSafe(body(ctx)).catch_unwind();

        let result = match task.timeout {
            Some(limit) => match timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => return TaskOutput::timeout(limit),
            },
            None => invocation.await,
        };

        match result {
            Ok(result) => TaskOutput::from_result(result),
            Err(panic) => TaskOutput::from_result(Err(TaskError::Panicked(panic_message(
                panic.as_ref(),
            )))),
        }
    }

    /// Like `run_once`, but `None` when the executor stops first.
    async fn run_cancellable(&self, brain: &Brain, task: &TaskDescriptor) -> Option<TaskOutput> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = self.run_once(brain, task) => Some(output),
        }
    }
}

#[async_trait]
impl Executor for CooperativeExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Cooperative
    }

    async fn start(&self, brain: &Brain, task: &TaskDescriptor) {
        let Some(period) = task.refresh_interval else {
            if let Some(output) = self.run_cancellable(brain, task).await {
                brain.report(task, &output);
            }
            return;
        };

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_cancellable(brain, task).await {
                Some(output) => brain.report(task, &output),
                None => break,
            }
        }
    }

    async fn invoke_once(&self, brain: &Brain, task: &TaskDescriptor) -> TaskOutput {
        self.run_cancellable(brain, task)
            .await
            .unwrap_or_else(|| TaskOutput::error("executor stopped"))
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}
