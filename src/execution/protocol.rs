//! Parent/worker wire protocol.
//!
//! Newline-delimited JSON over the worker's stdin (parent to worker) and
//! stdout (worker to parent). A session looks like:
//!
//! ```text
//! parent -> Hello { task, mode, mirrored, refresh_ms }
//! worker -> Ready { pid }
//! worker -> TickStarted { tick }
//! worker -> State { id, request }        (zero or more per tick)
//! parent -> StateReply { id, reply }
//! worker -> Output { tick, output }
//! ...
//! ```
//!
//! The worker's stderr is not part of the protocol.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::core::output::WireOutput;
use crate::state::{StateReply, StateRequest};

/// Errors on the parent/worker link.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reading or writing the pipe failed.
    #[error("worker link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A line could not be decoded.
    #[error("failed to decode message '{line}': {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The other side closed the link.
    #[error("worker link closed")]
    Closed,

    /// A well-formed message arrived out of sequence.
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

/// How a worker runs its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum WorkerMode {
    /// Run the body once, report, and exit.
    Once,
    /// Run the body every `refresh_ms` until killed.
    Routine,
}

/// Messages sent from the parent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ParentMessage {
    Hello {
        task: String,
        mode: WorkerMode,
        mirrored: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_ms: Option<u64>,
    },
    StateReply {
        id: u64,
        reply: StateReply,
    },
}

/// Messages sent from a worker to the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WorkerMessage {
    Ready { pid: u32 },
    TickStarted { tick: u64 },
    State { id: u64, request: StateRequest },
    Output { tick: u64, output: WireOutput },
}

/// Encode one message as a single line, newline included.
pub(crate) fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message).map_err(ProtocolError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line, surrounding whitespace ignored.
pub(crate) fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(|source| ProtocolError::Decode {
        line: line.trim().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::{Payload, TaskOutput};

    #[test]
    fn test_one_message_per_line() {
        let line = encode_line(&WorkerMessage::TickStarted { tick: 3 }).unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(line, "{\"type\":\"tick_started\",\"tick\":3}\n");
    }

    #[test]
    fn test_hello_decodes_without_refresh() {
        let message: ParentMessage = decode_line(
            r#"{"type":"hello","task":"sb_start","mode":"once","mirrored":["share_attr1"]}"#,
        )
        .unwrap();

        assert_eq!(
            message,
            ParentMessage::Hello {
                task: "sb_start".into(),
                mode: WorkerMode::Once,
                mirrored: vec!["share_attr1".into()],
                refresh_ms: None,
            }
        );
    }

    #[test]
    fn test_output_message_keeps_execution_state() {
        let output = TaskOutput::success(Payload::local(5u8));
        let line = encode_line(&WorkerMessage::Output {
            tick: 1,
            output: output.to_wire(),
        })
        .unwrap();

        let WorkerMessage::Output { output, .. } = decode_line(&line).unwrap() else {
            panic!("expected output message");
        };
        let output: TaskOutput = output.into();
        assert!(output.is_success());
        assert!(output.result.is_untransferable());
    }

    #[test]
    fn test_non_protocol_line_is_a_decode_error() {
        let result = decode_line::<WorkerMessage>("hello from a stray println\n");

        assert!(matches!(
            result,
            Err(ProtocolError::Decode { line, .. }) if line == "hello from a stray println"
        ));
    }
}
