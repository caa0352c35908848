//! Core identifier and mode types.
//!
//! These types are shared by descriptors, executors, and the worker protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a declared task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a task's body executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Inside the parent's cooperative runtime, interleaved at await points.
    Cooperative,
    /// In a dedicated OS process, in parallel with the parent.
    IsolatedProcess,
}

impl ExecutionMode {
    /// Short tag used in status lines (`MP` for the main process, `SP` for a subprocess).
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionMode::Cooperative => "MP",
            ExecutionMode::IsolatedProcess => "SP",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Cooperative => write!(f, "cooperative"),
            ExecutionMode::IsolatedProcess => write!(f, "isolated-process"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_creation() {
        let task_id = TaskId::new("mp_incrementer");
        assert_eq!(task_id.as_str(), "mp_incrementer");
    }

    #[test]
    fn test_task_id_display() {
        let task_id = TaskId::new("sb_start");
        assert_eq!(format!("{}", task_id), "sb_start");
    }

    #[test]
    fn test_task_id_equality() {
        let id1 = TaskId::new("task_a");
        let id2 = TaskId::new("task_a");
        let id3 = TaskId::new("task_b");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_ids_are_hashable() {
        use std::collections::HashSet;

        let mut task_ids: HashSet<TaskId> = HashSet::new();
        task_ids.insert(TaskId::new("task1"));
        task_ids.insert(TaskId::new("task2"));
        task_ids.insert(TaskId::new("task1"));

        assert_eq!(task_ids.len(), 2);
    }

    #[test]
    fn test_task_id_from_str() {
        let id1: TaskId = "my_task".into();
        let id2 = TaskId::new("my_task");
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_execution_mode_tags() {
        assert_eq!(ExecutionMode::Cooperative.tag(), "MP");
        assert_eq!(ExecutionMode::IsolatedProcess.tag(), "SP");
        assert_eq!(ExecutionMode::IsolatedProcess.to_string(), "isolated-process");
    }

    #[test]
    fn test_execution_mode_serde_names() {
        let json = serde_json::to_string(&ExecutionMode::IsolatedProcess).unwrap();
        assert_eq!(json, "\"isolated_process\"");
    }
}
