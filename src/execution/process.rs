//! Isolated-process execution.
//!
//! Each process task runs in its own OS process: the embedding binary,
//! re-executed through a [`WorkerCommand`] with [`WORKER_ENV`] set to the task
//! name. The parent supervises the child through a [`WorkerHandle`]:
//!
//! - it answers the worker's shared-state requests against the parent store,
//! - it measures every tick from the worker's `TickStarted` message and kills
//!   the child when the tick overruns its timeout,
//! - it respawns recurring workers after a timeout (immediately) or after an
//!   exit (at the next scheduled tick).
//!
//! Killing a worker is abrupt. Whatever the worker wrote to the shared store
//! before it was killed stays written.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Executor;
use super::protocol::{ParentMessage, ProtocolError, WorkerMessage, WorkerMode, decode_line, encode_line};
use super::worker::WORKER_ENV;
use crate::brain::Brain;
use crate::core::output::TaskOutput;
use crate::core::task::TaskDescriptor;
use crate::core::types::{ExecutionMode, TaskId};
use crate::state::SharedState;

/// How to launch a worker process.
///
/// # Example
///
/// ```ignore
/// let command = WorkerCommand::new("/usr/local/bin/my-brain")
///     .arg("serve")
///     .env("RUST_LOG", "debug");
/// ```
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    /// Launch `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// The running executable with the arguments it was started with.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).args(std::env::args_os().skip(1)))
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program to execute.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self, task: &TaskId) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd.env(WORKER_ENV, task.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// Lifecycle of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WorkerState {
    /// Spawned, waiting for the worker's `Ready`.
    Starting,
    /// The worker announced itself.
    Running,
    /// Killed because a tick overran its timeout.
    TimedOut,
    /// Exited normally, or was stopped by the parent.
    Exited,
    /// Exited unsuccessfully or broke the protocol.
    Crashed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::TimedOut => write!(f, "timed_out"),
            WorkerState::Exited => write!(f, "exited"),
            WorkerState::Crashed => write!(f, "crashed"),
        }
    }
}

/// What a worker told the parent, after state requests were served.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Ready { pid: u32 },
    TickStarted { tick: u64 },
    Output { tick: u64, output: TaskOutput },
}

/// Parent end of one worker process.
pub(crate) struct WorkerHandle {
    task: TaskId,
    child: Child,
    pid: Option<u32>,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    state: WorkerState,
}

impl WorkerHandle {
    /// Spawn a worker and greet it.
    pub(crate) async fn spawn(
        command: &WorkerCommand,
        task: &TaskId,
        hello: &ParentMessage,
    ) -> Result<Self, ProtocolError> {
        let mut child = command.command(task).spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::Unexpected("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::Unexpected("worker stdout not captured".into()))?;

        let mut handle = Self {
            task: task.clone(),
            pid: child.id(),
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            state: WorkerState::Starting,
        };
        debug!(task = %handle.task, pid = ?handle.pid, "worker spawned");
        handle.send(hello).await?;
        Ok(handle)
    }

    /// Current lifecycle state.
    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    async fn send(&mut self, message: &ParentMessage) -> Result<(), ProtocolError> {
        let line = encode_line(message)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Wait for the next event, serving state requests along the way.
    ///
    /// Returns `Ok(None)` once the worker closed its stdout. Lines that are not
    /// protocol messages are skipped.
    pub(crate) async fn next_event(
        &mut self,
        shared: &SharedState,
    ) -> Result<Option<WorkerEvent>, ProtocolError> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message = match decode_line::<WorkerMessage>(&line) {
                Ok(message) => message,
                Err(err) => {
                    warn!(task = %self.task, error = %err, "ignoring non-protocol worker output");
                    continue;
                }
            };
            match message {
                WorkerMessage::State { id, request } => {
                    let reply = shared.serve(request);
                    self.send(&ParentMessage::StateReply { id, reply }).await?;
                }
                WorkerMessage::Ready { pid } => {
                    self.state = WorkerState::Running;
                    return Ok(Some(WorkerEvent::Ready { pid }));
                }
                WorkerMessage::TickStarted { tick } => {
                    return Ok(Some(WorkerEvent::TickStarted { tick }));
                }
                WorkerMessage::Output { tick, output } => {
                    return Ok(Some(WorkerEvent::Output {
                        tick,
                        output: output.into(),
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Terminate the process and record `state`.
    pub(crate) async fn kill(&mut self, state: WorkerState) {
        if let Err(err) = self.child.kill().await {
            debug!(task = %self.task, error = %err, "worker already gone");
        }
        self.state = state;
        self.pid = None;
    }

    /// Wait up to `grace` for the process to exit on its own, then kill it.
    pub(crate) async fn reap(&mut self, grace: Duration) -> Option<ExitStatus> {
        let status = match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(task = %self.task, error = %err, "failed to wait for worker");
                None
            }
            Err(_) => {
                warn!(task = %self.task, pid = ?self.pid, "worker did not exit in time, killing");
                self.kill(WorkerState::Exited).await;
                return None;
            }
        };
        self.state = match status {
            Some(status) if status.success() => WorkerState::Exited,
            _ => WorkerState::Crashed,
        };
        self.pid = None;
        status
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// How long a worker may take from spawn to its first `TickStarted`.
fn startup_limit(brain: &Brain, task: &TaskDescriptor) -> Duration {
    task.timeout
        .unwrap_or_else(|| brain.config().worker.startup_timeout())
}

/// Milliseconds for the wire, saturating instead of wrapping.
fn wire_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn exit_description(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => format!("worker exited before reporting ({})", status),
        None => "worker exited before reporting".to_string(),
    }
}

/// Why one worker lifetime ended.
enum LifetimeEnd {
    StartupTimedOut(Duration),
    TimedOut(Duration),
    Exited,
    Broken(ProtocolError),
}

/// Runs process tasks in supervised worker processes.
pub struct ProcessExecutor {
    cancel: CancellationToken,
}

impl ProcessExecutor {
    /// Create an executor that stops when `cancel` fires.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    async fn spawn(
        &self,
        brain: &Brain,
        task: &TaskDescriptor,
        mode: WorkerMode,
    ) -> Result<WorkerHandle, ProtocolError> {
        let command = brain.worker_command()?;
        let hello = ParentMessage::Hello {
            task: task.name.to_string(),
            mode,
            // re-read on every spawn so respawns see attributes mirrored since
            mirrored: brain.shared().names(),
            refresh_ms: match mode {
                WorkerMode::Once => None,
                WorkerMode::Routine => task
                    .refresh_interval
                    .map(wire_millis),
            },
        };
        WorkerHandle::spawn(&command, &task.name, &hello).await
    }

    /// Run the body once in a fresh worker. `None` when stopped meanwhile.
    async fn run_once(&self, brain: &Brain, task: &TaskDescriptor) -> Option<TaskOutput> {
        let grace = brain.config().worker.shutdown_grace();
        let mut worker = match self.spawn(brain, task, WorkerMode::Once).await {
            Ok(worker) => worker,
            Err(err) => return Some(TaskOutput::error(format!("failed to spawn worker: {}", err))),
        };

        // until the first tick starts, spawn and setup are bounded instead
        let startup = startup_limit(brain, task);
        let mut deadline: Option<(Instant, Duration)> = Some((Instant::now() + startup, startup));
        let mut ticking = false;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    worker.kill(WorkerState::Exited).await;
                    return None;
                }
                _ = sleep_until_opt(deadline.map(|(at, _)| at)) => {
                    let limit = deadline.map(|(_, limit)| limit).unwrap_or_default();
                    if !ticking {
                        warn!(task = %task.name, ?limit, "worker did not start its tick in time");
                    }
                    worker.kill(WorkerState::TimedOut).await;
                    return Some(TaskOutput::timeout(limit));
                }
                event = worker.next_event(brain.shared()) => match event {
                    Ok(Some(WorkerEvent::Ready { pid })) => {
                        debug!(task = %task.name, pid, "worker running");
                    }
                    Ok(Some(WorkerEvent::TickStarted { .. })) => {
                        ticking = true;
                        deadline = task.timeout.map(|limit| (Instant::now() + limit, limit));
                    }
                    Ok(Some(WorkerEvent::Output { output, .. })) => {
                        worker.reap(grace).await;
                        return Some(output);
                    }
                    Ok(None) => {
                        let status = worker.reap(grace).await;
                        worker.state = WorkerState::Crashed;
                        return Some(TaskOutput::error(exit_description(status)));
                    }
                    Err(err) => {
                        worker.kill(WorkerState::Crashed).await;
                        return Some(TaskOutput::error(format!("worker link failed: {}", err)));
                    }
                }
            }
        }
    }

    /// Keep a recurring worker alive until the executor stops.
    async fn supervise(&self, brain: &Brain, task: &TaskDescriptor, interval: Duration) {
        let grace = brain.config().worker.shutdown_grace();
        let respawn_delay = brain.config().worker.respawn_delay();
        let startup = startup_limit(brain, task);
        let mut next_spawn = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = sleep_until(next_spawn) => {}
            }

            let mut worker = match self.spawn(brain, task, WorkerMode::Routine).await {
                Ok(worker) => worker,
                Err(err) => {
                    brain.report(
                        task,
                        &TaskOutput::error(format!("failed to spawn worker: {}", err)),
                    );
                    next_spawn = Instant::now() + interval.max(respawn_delay);
                    continue;
                }
            };

            let spawned = Instant::now();
            let mut in_flight: Option<Instant> = None;
            let mut last_tick: Option<Instant> = None;
            let mut reported_any = false;

            let end = loop {
                let deadline = match last_tick {
                    None => Some((spawned + startup, startup)),
                    Some(_) => in_flight
                        .zip(task.timeout)
                        .map(|(started, limit)| (started + limit, limit)),
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        worker.kill(WorkerState::Exited).await;
                        return;
                    }
                    _ = sleep_until_opt(deadline.map(|(at, _)| at)) => {
                        let limit = deadline.map(|(_, limit)| limit).unwrap_or_default();
                        if last_tick.is_none() {
                            break LifetimeEnd::StartupTimedOut(limit);
                        }
                        break LifetimeEnd::TimedOut(limit);
                    }
                    event = worker.next_event(brain.shared()) => match event {
                        Ok(Some(WorkerEvent::Ready { pid })) => {
                            debug!(task = %task.name, pid, "worker running");
                        }
                        Ok(Some(WorkerEvent::TickStarted { .. })) => {
                            let now = Instant::now();
                            in_flight = Some(now);
                            last_tick = Some(now);
                        }
                        Ok(Some(WorkerEvent::Output { output, .. })) => {
                            in_flight = None;
                            reported_any = true;
                            brain.report(task, &output);
                        }
                        Ok(None) => break LifetimeEnd::Exited,
                        Err(err) => break LifetimeEnd::Broken(err),
                    }
                }
            };

            match end {
                LifetimeEnd::StartupTimedOut(limit) => {
                    worker.kill(WorkerState::TimedOut).await;
                    brain.report(task, &TaskOutput::timeout(limit));
                    warn!(task = %task.name, ?limit, "worker did not start its first tick in time");
                    next_spawn = Instant::now() + respawn_delay;
                }
                LifetimeEnd::TimedOut(limit) => {
                    worker.kill(WorkerState::TimedOut).await;
                    brain.report(task, &TaskOutput::timeout(limit));
                    info!(task = %task.name, "respawning worker after timeout");
                    next_spawn = Instant::now();
                }
                LifetimeEnd::Exited | LifetimeEnd::Broken(_) => {
                    let reason = match &end {
                        LifetimeEnd::Broken(err) => {
                            worker.kill(WorkerState::Crashed).await;
                            format!("worker link failed: {}", err)
                        }
                        _ => exit_description(worker.reap(grace).await),
                    };
                    if in_flight.is_some() || !reported_any {
                        brain.report(task, &TaskOutput::error(reason.clone()));
                    }
                    warn!(task = %task.name, state = %worker.state(), reason = %reason, "worker ended");
                    let scheduled = last_tick
                        .map(|started| started + interval)
                        .unwrap_or_else(|| Instant::now() + interval);
                    next_spawn = scheduled.max(Instant::now() + respawn_delay);
                }
            }
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::IsolatedProcess
    }

    async fn start(&self, brain: &Brain, task: &TaskDescriptor) {
        match task.refresh_interval {
            Some(interval) => self.supervise(brain, task, interval).await,
            None => {
                if let Some(output) = self.run_once(brain, task).await {
                    brain.report(task, &output);
                }
            }
        }
    }

    async fn invoke_once(&self, brain: &Brain, task: &TaskDescriptor) -> TaskOutput {
        self.run_once(brain, task)
            .await
            .unwrap_or_else(|| TaskOutput::error("executor stopped"))
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}
