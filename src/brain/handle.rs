//! Handle over a started brain.

use std::time::Duration;
use tokio::task::JoinHandle;

use super::engine::Brain;
use crate::core::types::TaskId;

/// Interval between checks while waiting for tasks to wind down.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returned by [`Brain::start`]; owns the spawned startup tasks.
pub struct BrainHandle {
    brain: Brain,
    tasks: Vec<(TaskId, JoinHandle<()>)>,
}

impl BrainHandle {
    pub(crate) fn new(brain: Brain, tasks: Vec<(TaskId, JoinHandle<()>)>) -> Self {
        Self { brain, tasks }
    }

    /// The brain these tasks belong to.
    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    /// True while any startup task is still running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|(_, handle)| !handle.is_finished())
    }

    /// Names of the startup tasks still running.
    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Wait for every startup task to end on its own.
    ///
    /// Recurring tasks only end when the brain is stopped from elsewhere.
    pub async fn join(self) {
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                tracing::warn!(task = %name, error = %err, "startup task did not finish cleanly");
            }
        }
    }

    /// Stop the brain and wait for the startup tasks to wind down.
    ///
    /// Tasks get the worker shutdown grace period plus one poll interval to
    /// finish; whatever is left after that is aborted.
    pub async fn shutdown(mut self) {
        self.brain.stop();

        let grace = self.brain.config().worker.shutdown_grace() + SHUTDOWN_POLL_INTERVAL;
        let start = tokio::time::Instant::now();
        let deadline = start + grace;

        loop {
            self.tasks.retain(|(_, handle)| !handle.is_finished());

            if self.tasks.is_empty() {
                tracing::info!("all tasks stopped in {:?}", start.elapsed());
                return;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "shutdown grace ({:?}) exceeded with {} task(s) still running",
                    grace,
                    self.tasks.len()
                );
                break;
            }

            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        for (name, handle) in self.tasks.drain(..) {
            tracing::debug!(task = %name, "aborting task");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::Payload;
    use crate::core::task::TaskSpec;
    use crate::testing::RecordingSink;

    fn recurring_brain(sink: &RecordingSink) -> Brain {
        Brain::builder(sink.clone())
            .task(
                TaskSpec::cooperative("mp_states_display", |_ctx| async { Ok(Payload::Empty) })
                    .run_on_start(true)
                    .refresh_rate(Duration::from_secs(1)),
            )
            .task(
                TaskSpec::cooperative("mp_start", |_ctx| async { Ok(Payload::Empty) })
                    .run_on_start(true),
            )
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_tasks_finish_recurring_keep_running() {
        let sink = RecordingSink::new();
        let brain = recurring_brain(&sink);

        let handle = brain.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.is_running());
        assert_eq!(
            handle.running_tasks(),
            vec![TaskId::new("mp_states_display")]
        );

        handle.shutdown().await;
        assert!(brain.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_stragglers() {
        let sink = RecordingSink::new();
        let brain = Brain::builder(sink.clone())
            .task(
                TaskSpec::cooperative("mp_start", |_ctx| async { Ok(Payload::Empty) })
                    .run_on_start(true),
            )
            .build()
            .unwrap();

        let mut handle = brain.start();
        // a task spawned outside the executors ignores the stop signal
        handle.tasks.push((
            TaskId::new("stubborn"),
            tokio::spawn(tokio::time::sleep(Duration::from_secs(3600))),
        ));

        let started = tokio::time::Instant::now();
        handle.shutdown().await;

        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_join_waits_for_one_shot_tasks() {
        let sink = RecordingSink::new();
        let brain = Brain::builder(sink.clone())
            .task(
                TaskSpec::cooperative("mp_start", |_ctx| async { Ok(Payload::json(&"up")) })
                    .run_on_start(true),
            )
            .build()
            .unwrap();

        brain.start().join().await;

        assert!(sink.contains("[MP] mp_start: SUCCESS"));
    }
}
