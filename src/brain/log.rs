//! Log sinks.
//!
//! The brain reports one status line per task outcome through a [`LogSink`].
//! The default [`TracingSink`] forwards lines to `tracing`; any closure taking
//! a message and a level works as well.

use tracing::Level;

/// Receives the brain's status lines.
pub trait LogSink: Send + Sync {
    /// Record one line at `level`.
    fn log(&self, message: &str, level: Level);
}

impl<F> LogSink for F
where
    F: Fn(&str, Level) + Send + Sync,
{
    fn log(&self, message: &str, level: Level) {
        self(message, level)
    }
}

/// Forwards lines to `tracing` events under the `taskbrain` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str, level: Level) {
        match level {
            Level::ERROR => tracing::error!(target: "taskbrain", "{}", message),
            Level::WARN => tracing::warn!(target: "taskbrain", "{}", message),
            Level::INFO => tracing::info!(target: "taskbrain", "{}", message),
            Level::DEBUG => tracing::debug!(target: "taskbrain", "{}", message),
            _ => tracing::trace!(target: "taskbrain", "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink = move |message: &str, level: Level| {
            captured.lock().unwrap().push((message.to_string(), level));
        };

        sink.log("[MP] MainBrain started", Level::INFO);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, "[MP] MainBrain started");
        assert_eq!(lines[0].1, Level::INFO);
    }

    #[test]
    fn test_tracing_sink_accepts_every_level() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            TracingSink.log("status", level);
        }
    }
}
