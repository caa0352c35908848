//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::task::TaskOptions;

/// Brain configuration (YAML).
///
/// ```yaml
/// worker:
///   shutdown_grace_ms: 2000
///   respawn_delay_ms: 500
///   startup_timeout_ms: 10000
/// tasks:
///   sb_incrementer:
///     refresh_rate: 0.5
///   call_tasks:
///     run_on_start: false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Worker process supervision.
    pub worker: WorkerConfig,
    /// Per-task option overrides, applied before validation.
    pub tasks: BTreeMap<String, TaskOverride>,
}

impl BrainConfig {
    /// Add or replace the override for one task.
    pub fn with_task(mut self, name: impl Into<String>, task: TaskOverride) -> Self {
        self.tasks.insert(name.into(), task);
        self
    }
}

/// Worker supervision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How long a worker may take to exit on its own before it is killed.
    pub shutdown_grace_ms: u64,
    /// Minimum pause before a crashed worker is respawned.
    pub respawn_delay_ms: u64,
    /// How long a worker may take from spawn to its first tick, for tasks
    /// without a timeout of their own.
    pub startup_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 2000,
            respawn_delay_ms: 500,
            startup_timeout_ms: 10_000,
        }
    }
}

impl WorkerConfig {
    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Respawn delay.
    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }

    /// Startup bound.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Partial [`TaskOptions`]; only the fields present are changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskOverride {
    pub process: Option<bool>,
    pub run_on_start: Option<bool>,
    pub refresh_rate: Option<f64>,
    pub timeout: Option<f64>,
    pub define_loop_later: Option<bool>,
}

impl TaskOverride {
    /// Override `run_on_start` only.
    pub fn run_on_start(run_on_start: bool) -> Self {
        Self {
            run_on_start: Some(run_on_start),
            ..Self::default()
        }
    }

    /// Apply the present fields to `options`.
    pub fn apply(&self, options: &mut TaskOptions) {
        if let Some(process) = self.process {
            options.process = process;
        }
        if let Some(run_on_start) = self.run_on_start {
            options.run_on_start = run_on_start;
        }
        if let Some(refresh_rate) = self.refresh_rate {
            options.refresh_rate = Some(refresh_rate);
        }
        if let Some(timeout) = self.timeout {
            options.timeout = Some(timeout);
        }
        if let Some(define_loop_later) = self.define_loop_later {
            options.define_loop_later = define_loop_later;
        }
    }
}
