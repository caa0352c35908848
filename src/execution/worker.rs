//! Worker process entry.
//!
//! A worker is the embedding binary re-executed with [`WORKER_ENV`] set to a
//! task name. It rebuilds the same brain, reads a `Hello` from stdin and then
//! runs that one task synchronously, talking to the parent over stdout.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::protocol::{
    ParentMessage, ProtocolError, WorkerMessage, WorkerMode, decode_line, encode_line,
};
use crate::brain::Brain;
use crate::core::context::WorkerContext;
use crate::core::deferred::LoopInstance;
use crate::core::output::TaskOutput;
use crate::core::task::{ProcessFn, TaskBody, TaskError, panic_message};
use crate::state::{RemoteState, StateError, StateReply, StateRequest, StateTransport};

/// Environment variable naming the task a worker process should serve.
pub const WORKER_ENV: &str = "TASKBRAIN_WORKER";

/// Errors that end a worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The link to the parent failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The parent asked for a task this binary does not declare.
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    /// The task cannot run inside a worker.
    #[error("task '{0}' is not a process task")]
    NotAProcessTask(String),

    /// The one-time setup phase failed.
    #[error("setup of '{task}' failed: {source}")]
    Setup {
        task: String,
        #[source]
        source: TaskError,
    },
}

/// Worker end of the parent link.
pub(crate) struct WorkerLink<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
}

impl<R: BufRead, W: Write> WorkerLink<R, W> {
    pub(crate) fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_id: 0,
        }
    }

    pub(crate) fn send(&mut self, message: &WorkerMessage) -> Result<(), ProtocolError> {
        let line = encode_line(message)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub(crate) fn receive(&mut self) -> Result<ParentMessage, ProtocolError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(ProtocolError::Closed);
            }
            if !line.trim().is_empty() {
                return decode_line(&line);
            }
        }
    }
}

impl<R: BufRead, W: Write> StateTransport for WorkerLink<R, W> {
    fn request(&mut self, request: StateRequest) -> Result<StateReply, StateError> {
        self.next_id += 1;
        let id = self.next_id;
        let channel = |err: ProtocolError| StateError::Channel(err.to_string());

        self.send(&WorkerMessage::State { id, request })
            .map_err(channel)?;
        match self.receive().map_err(channel)? {
            ParentMessage::StateReply { id: got, reply } if got == id => Ok(reply),
            other => Err(StateError::Channel(format!(
                "expected reply {}, got {:?}",
                id, other
            ))),
        }
    }
}

enum Runner {
    Plain(ProcessFn),
    Deferred(LoopInstance),
}

impl Runner {
    fn tick(&mut self, ctx: &WorkerContext) -> TaskOutput {
        let result = catch_unwind(AssertUnwindSafe(|| match self {
            Runner::Plain(body) => body(ctx),
            Runner::Deferred(instance) => instance.tick(ctx),
        }));
        match result {
            Ok(result) => TaskOutput::from_result(result),
            Err(panic) => TaskOutput::from_result(Err(TaskError::Panicked(panic_message(
                panic.as_ref(),
            )))),
        }
    }
}

/// Serve one worker session over `reader`/`writer`.
pub(crate) fn serve<R, W>(brain: &Brain, reader: R, writer: W) -> Result<(), WorkerError>
where
    R: BufRead + 'static,
    W: Write + 'static,
{
    let link = Rc::new(RefCell::new(WorkerLink::new(reader, writer)));

    let (task, mode, mirrored, refresh_ms) = match link.borrow_mut().receive()? {
        ParentMessage::Hello {
            task,
            mode,
            mirrored,
            refresh_ms,
        } => (task, mode, mirrored, refresh_ms),
        other => {
            return Err(ProtocolError::Unexpected(format!("{:?}", other)).into());
        }
    };

    let descriptor = brain
        .spec(&task)
        .ok_or_else(|| WorkerError::UnknownTask(task.clone()))?;

    link.borrow_mut().send(&WorkerMessage::Ready {
        pid: std::process::id(),
    })?;
    debug!(task = %task, mode = ?mode, "worker ready");

    let state = RemoteState::new(mirrored, link.clone());
    let ctx = WorkerContext::new(descriptor.name.clone(), state, brain.sink());

    let mut runner = match &descriptor.body {
        TaskBody::Process(body) => Runner::Plain(body.clone()),
        TaskBody::DeferredLoop(routine) => {
            let setup = catch_unwind(AssertUnwindSafe(|| routine.instantiate(&ctx)))
                .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))));
            match setup {
                Ok(instance) => Runner::Deferred(instance),
                Err(source) => {
                    let output = TaskOutput::error(format!("setup failed: {}", source));
                    link.borrow_mut().send(&WorkerMessage::Output {
                        tick: 0,
                        output: output.to_wire(),
                    })?;
                    return Err(WorkerError::Setup { task, source });
                }
            }
        }
        TaskBody::Cooperative(_) => return Err(WorkerError::NotAProcessTask(task)),
    };

    let interval = match (mode, refresh_ms) {
        (WorkerMode::Once, _) => None,
        (WorkerMode::Routine, Some(ms)) => Some(Duration::from_millis(ms.max(1))),
        (WorkerMode::Routine, None) => {
            return Err(ProtocolError::Unexpected("routine worker without refresh rate".into()).into());
        }
    };

    let mut next = Instant::now();
    for tick in 1u64.. {
        ctx.set_tick(tick);
        link.borrow_mut().send(&WorkerMessage::TickStarted { tick })?;
        let output = runner.tick(&ctx);
        link.borrow_mut().send(&WorkerMessage::Output {
            tick,
            output: output.to_wire(),
        })?;

        let Some(interval) = interval else {
            break;
        };
        // start-to-start spacing; an overrun starts the next tick immediately
        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else if now - next > interval {
            warn!(task = %task, tick, "worker tick overran its interval");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::TracingSink;
    use crate::core::output::Payload;
    use crate::core::task::TaskSpec;
    use crate::state::AttributeStore;
    use std::io::{self, Cursor};
    use std::time::Duration;

    /// Captures worker output; fails once `limit` writes happened.
    #[derive(Clone, Default)]
    struct Captured {
        buffer: Rc<RefCell<Vec<u8>>>,
        writes: Rc<RefCell<usize>>,
        limit: Option<usize>,
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut writes = self.writes.borrow_mut();
            if self.limit.is_some_and(|limit| *writes >= limit) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "parent gone"));
            }
            *writes += 1;
            self.buffer.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn messages(&self) -> Vec<WorkerMessage> {
            let text = String::from_utf8(self.buffer.borrow().clone()).unwrap();
            text.lines().map(|line| decode_line(line).unwrap()).collect()
        }

        fn outputs(&self) -> Vec<(u64, TaskOutput)> {
            self.messages()
                .into_iter()
                .filter_map(|message| match message {
                    WorkerMessage::Output { tick, output } => Some((tick, output.into())),
                    _ => None,
                })
                .collect()
        }
    }

    fn script(messages: &[ParentMessage]) -> Cursor<Vec<u8>> {
        let text: String = messages.iter().map(|m| encode_line(m).unwrap()).collect();
        Cursor::new(text.into_bytes())
    }

    fn hello(task: &str, mode: WorkerMode, mirrored: &[&str]) -> ParentMessage {
        ParentMessage::Hello {
            task: task.into(),
            mode,
            mirrored: mirrored.iter().map(|name| name.to_string()).collect(),
            refresh_ms: (mode == WorkerMode::Routine).then_some(1),
        }
    }

    fn brain() -> Brain {
        Brain::builder(TracingSink)
            .mirror("n", 5i64)
            .task(TaskSpec::process("bump", |ctx| {
                let n = ctx.shared().update("n", |n: i64| n + 1)?;
                Ok(Payload::json(&n))
            }))
            .task(TaskSpec::process("peek_secret", |ctx| {
                ctx.shared().get::<i64>("secret")?;
                Ok(Payload::Empty)
            }))
            .task(TaskSpec::process("explode", |_ctx| -> Result<Payload, TaskError> {
                panic!("kaboom")
            }))
            .task(
                TaskSpec::deferred_loop(
                    "broken_setup",
                    |_ctx| Err::<u8, _>(TaskError::failed("no handle")),
                    |_ctx, _state: &mut u8| Ok(Payload::Empty),
                )
                .refresh_rate(Duration::from_millis(10)),
            )
            .task(
                TaskSpec::deferred_loop(
                    "counting",
                    |_ctx| Ok(0u64),
                    |ctx, count: &mut u64| {
                        *count += 1;
                        Ok(Payload::json(&(ctx.tick(), *count)))
                    },
                )
                .refresh_rate(Duration::from_millis(1)),
            )
            .task(TaskSpec::cooperative("coop", |_ctx| async {
                Ok(Payload::Empty)
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_once_session_brokers_state_through_parent() {
        let reader = script(&[
            hello("bump", WorkerMode::Once, &["n"]),
            ParentMessage::StateReply {
                id: 1,
                reply: StateReply::Value(Some(5.into())),
            },
            ParentMessage::StateReply {
                id: 2,
                reply: StateReply::Swapped,
            },
        ]);
        let writer = Captured::default();

        serve(&brain(), reader, writer.clone()).unwrap();

        let messages = writer.messages();
        assert!(matches!(messages[0], WorkerMessage::Ready { .. }));
        assert_eq!(messages[1], WorkerMessage::TickStarted { tick: 1 });
        assert_eq!(
            messages[2],
            WorkerMessage::State {
                id: 1,
                request: StateRequest::Read { name: "n".into() }
            }
        );
        assert_eq!(
            messages[3],
            WorkerMessage::State {
                id: 2,
                request: StateRequest::CompareAndSwap {
                    name: "n".into(),
                    expected: Some(5.into()),
                    new: 6.into(),
                }
            }
        );

        let outputs = writer.outputs();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].1.is_success());
        assert_eq!(outputs[0].1.value::<i64>(), Some(6));
    }

    #[test]
    fn test_unmirrored_read_fails_without_asking_parent() {
        let reader = script(&[hello("peek_secret", WorkerMode::Once, &["n"])]);
        let writer = Captured::default();

        serve(&brain(), reader, writer.clone()).unwrap();

        assert!(
            !writer
                .messages()
                .iter()
                .any(|m| matches!(m, WorkerMessage::State { .. }))
        );
        let (_, output) = &writer.outputs()[0];
        assert!(output.have_crashed());
        assert!(output.error.as_deref().unwrap().contains("not mirrored"));
    }

    #[test]
    fn test_panicking_body_reports_error() {
        let reader = script(&[hello("explode", WorkerMode::Once, &[])]);
        let writer = Captured::default();

        serve(&brain(), reader, writer.clone()).unwrap();

        let (_, output) = &writer.outputs()[0];
        assert!(output.have_crashed());
        assert!(output.error.as_deref().unwrap().contains("kaboom"));
    }

    #[test]
    fn test_setup_failure_reported_before_exit() {
        let reader = script(&[hello("broken_setup", WorkerMode::Routine, &[])]);
        let writer = Captured::default();

        let result = serve(&brain(), reader, writer.clone());

        assert!(matches!(result, Err(WorkerError::Setup { .. })));
        let outputs = writer.outputs();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].0, 0);
        assert!(outputs[0].1.have_crashed());
    }

    #[test]
    fn test_routine_runs_setup_once_and_ticks_until_link_breaks() {
        let reader = script(&[hello("counting", WorkerMode::Routine, &[])]);
        let writer = Captured {
            limit: Some(7),
            ..Captured::default()
        };

        let result = serve(&brain(), reader, writer.clone());

        assert!(matches!(
            result,
            Err(WorkerError::Protocol(ProtocolError::Io(_)))
        ));
        let outputs = writer.outputs();
        assert_eq!(outputs.len(), 3);
        for (tick, output) in outputs {
            assert_eq!(output.value::<(u64, u64)>(), Some((tick, tick)));
        }
    }

    #[test]
    fn test_unknown_and_cooperative_tasks_rejected() {
        let result = serve(
            &brain(),
            script(&[hello("missing", WorkerMode::Once, &[])]),
            Captured::default(),
        );
        assert!(matches!(result, Err(WorkerError::UnknownTask(_))));

        let result = serve(
            &brain(),
            script(&[hello("coop", WorkerMode::Once, &[])]),
            Captured::default(),
        );
        assert!(matches!(result, Err(WorkerError::NotAProcessTask(_))));
    }

    #[test]
    fn test_closed_link_before_hello() {
        let result = serve(&brain(), Cursor::new(Vec::new()), Captured::default());
        assert!(matches!(
            result,
            Err(WorkerError::Protocol(ProtocolError::Closed))
        ));
    }
}
