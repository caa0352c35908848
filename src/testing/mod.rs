//! Testing utilities for users of the taskbrain library.
//!
//! This module provides helpers for testing brains and task bodies:
//!
//! - [`RecordingSink`]: A log sink that keeps every line for later assertions
//! - [`local_worker_context`]: A [`WorkerContext`] wired straight to a
//!   [`SharedState`], for calling process bodies without spawning a worker
//! - [`fixture_builder`]: A brain declaring one task per worker behavior the
//!   process tests need. Binaries that serve it as workers let integration
//!   tests run real child processes.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;

use crate::brain::{Brain, BrainBuilder, LogSink, TracingSink};
use crate::config::ConfigError;
use crate::core::context::WorkerContext;
use crate::core::output::Payload;
use crate::core::task::{TaskError, TaskSpec};
use crate::core::types::TaskId;
use crate::state::{AttributeStore, RemoteState, SharedState};

/// A log sink that records every line.
///
/// Clones share the same record.
///
/// # Example
///
/// ```
/// use taskbrain::testing::RecordingSink;
/// use taskbrain::LogSink;
/// use tracing::Level;
///
/// let sink = RecordingSink::new();
/// sink.log("[MP] mp_start: SUCCESS (result: null)", Level::DEBUG);
///
/// assert!(sink.contains("mp_start: SUCCESS"));
/// assert_eq!(sink.count_at(Level::DEBUG), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<(String, Level)>>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line recorded so far, oldest first.
    pub fn lines(&self) -> Vec<(String, Level)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// True if any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.count_containing(needle) > 0
    }

    /// Number of lines containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|(line, _)| line.contains(needle))
            .count()
    }

    /// Number of lines recorded at `level`.
    pub fn count_at(&self, level: Level) -> usize {
        self.lines().iter().filter(|(_, l)| *l == level).count()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, message: &str, level: Level) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((message.to_string(), level));
        }
    }
}

/// A worker context whose state calls go straight to `shared`.
///
/// Lets a process body run in the current process, e.g. in a unit test.
pub fn local_worker_context(task: &str, shared: SharedState) -> WorkerContext {
    WorkerContext::new(
        TaskId::new(task),
        RemoteState::local(shared),
        Arc::new(TracingSink),
    )
}

/// Builder for the fixture brain.
///
/// All fixture tasks are declared with `run_on_start` off; tests enable the
/// ones they need through [`BrainConfig`](crate::config::BrainConfig)
/// overrides, or call them on demand.
///
/// | task               | mode        | behavior                                        |
/// |--------------------|-------------|-------------------------------------------------|
/// | `answer`           | process     | returns `42`                                    |
/// | `opaque`           | process     | returns a local value (untransferable)          |
/// | `nothing`          | process     | returns nothing                                 |
/// | `explode`          | process     | exits the worker with status 3                  |
/// | `fail`             | process     | returns an error                                |
/// | `sleepy`           | process     | sleeps 10s, times out after 300ms               |
/// | `bump_worker`      | process     | every 100ms, increments `worker_hits`           |
/// | `deferred_counter` | process     | deferred loop every 100ms; stalls once          |
/// | `stuck_setup`      | process     | deferred loop whose setup never finishes        |
/// | `peek_local`       | process     | reads an attribute that is not mirrored         |
/// | `coop_bump`        | cooperative | increments `coop_hits`                          |
/// | `inc_a`            | cooperative | every second, increments `a`                    |
/// | `inc_b`            | process     | every second, increments `b`                    |
pub fn fixture_builder() -> BrainBuilder {
    fixture_builder_with(TracingSink)
}

/// [`fixture_builder`] reporting through `sink`.
pub fn fixture_builder_with(sink: impl LogSink + 'static) -> BrainBuilder {
    Brain::builder(sink)
        .mirror("worker_hits", 0u64)
        .mirror("coop_hits", 0u64)
        .mirror("setups", 0u64)
        .mirror("loop_ticks", 0u64)
        .mirror("a", 0i64)
        .mirror("b", 0i64)
        .declare("pending")
        .task(TaskSpec::process("answer", |_ctx| Ok(Payload::json(&42))))
        .task(TaskSpec::process("opaque", |_ctx| {
            Ok(Payload::local(Mutex::new(0u8)))
        }))
        .task(TaskSpec::process("nothing", |_ctx| Ok(Payload::Empty)))
        .task(TaskSpec::process("explode", |_ctx| std::process::exit(3)))
        .task(TaskSpec::process("fail", |_ctx| {
            Err(TaskError::failed("fixture failure"))
        }))
        .task(
            TaskSpec::process("sleepy", |_ctx| {
                std::thread::sleep(Duration::from_secs(10));
                Ok(Payload::Empty)
            })
            .timeout(Duration::from_millis(300)),
        )
        .task(
            TaskSpec::process("bump_worker", |ctx| {
                let hits = ctx.shared().update("worker_hits", |n: u64| n + 1)?;
                Ok(Payload::json(&hits))
            })
            .refresh_rate(Duration::from_millis(100)),
        )
        .task(
            TaskSpec::deferred_loop(
                "deferred_counter",
                |ctx| ctx.shared().update("setups", |n: u64| n + 1).map_err(TaskError::from),
                |ctx, lifetime: &mut u64| {
                    let ticks = ctx.shared().update("loop_ticks", |n: u64| n + 1)?;
                    // the first worker hangs on its third tick and gets killed
                    if *lifetime == 1 && ctx.tick() == 3 {
                        std::thread::sleep(Duration::from_secs(10));
                    }
                    Ok(Payload::json(&ticks))
                },
            )
            .refresh_rate(Duration::from_millis(100))
            .timeout(Duration::from_millis(500)),
        )
        .task(
            TaskSpec::deferred_loop(
                "stuck_setup",
                |_ctx| {
                    std::thread::sleep(Duration::from_secs(30));
                    Ok(())
                },
                |_ctx, _state: &mut ()| Ok(Payload::Empty),
            )
            .refresh_rate(Duration::from_millis(100))
            .timeout(Duration::from_millis(300)),
        )
        .task(TaskSpec::process("peek_local", |ctx| {
            let value = ctx.shared().get::<i64>("parent_only")?;
            Ok(Payload::json(&value))
        }))
        .task(TaskSpec::cooperative("coop_bump", |ctx| async move {
            let hits = ctx.shared().update("coop_hits", |n: u64| n + 1)?;
            Ok(Payload::json(&hits))
        }))
        .task(
            TaskSpec::cooperative("inc_a", |ctx| async move {
                let a = ctx.shared().update("a", |n: i64| n + 1)?;
                Ok(Payload::json(&a))
            })
            .refresh_rate(Duration::from_secs(1)),
        )
        .task(
            TaskSpec::process("inc_b", |ctx| {
                let b = ctx.shared().update("b", |n: i64| n + 1)?;
                Ok(Payload::json(&b))
            })
            .refresh_rate(Duration::from_secs(1)),
        )
}

/// The fixture brain with default configuration.
pub fn fixture_brain() -> Result<Brain, ConfigError> {
    fixture_builder().build()
}
