//! Brain error types.

use thiserror::Error;

/// Errors returned by brain operations.
#[derive(Debug, Error)]
pub enum BrainError {
    /// No task with this name was declared.
    #[error("task not found: {0}")]
    UnknownTask(String),

    /// The brain was shut down; no new invocations are accepted.
    #[error("brain is stopped")]
    Stopped,
}
