//! Worker process supervisor.
//!
//! [`Supervisor`] owns at most one live worker and the line framers for its
//! output streams. All mutation happens on one control flow: stream reader
//! tasks and the exit monitor only push [`StreamEvent`]s onto a channel, and
//! [`Supervisor::step`] applies them one at a time. Lines from one stream
//! therefore reach the sink in exactly the order their bytes were read.
//! Lines from stdout and stderr have no defined order relative to each
//! other.
//!
//! # States
//!
//! ```text
//! Unspawned ──send/start──▶ Spawning ──▶ Running ──exit+EOF / fault──▶ Terminated
//!                              │                                         │
//!                              └──────spawn failure──────────▶ Terminated│
//!                                                                        │
//!            Spawning ◀──────────────send (RespawnPolicy::OnDemand)──────┘
//! ```
//!
//! `Running` becomes `Terminated` once the exit has been observed *and* both
//! streams have reached EOF, so output written just before exit is still
//! delivered ahead of [`SupervisorEvent::Terminated`].
//!
//! Commands are written by a per-generation writer task. While a write is
//! pending the supervisor keeps applying stream events, so a worker that
//! echoes its input cannot wedge the supervisor on a full stdin pipe.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RespawnPolicy;
use crate::dispatch::{ActionRouter, Routed};
use crate::mode::ProtocolVariant;
use crate::models::command::{Action, Command};
use crate::models::message::{ProtocolMessage, StreamKind, SupervisorEvent};
use crate::worker::decoder::LineDecoder;
use crate::worker::framer::{LineFramer, MAX_LINE_BYTES};
use crate::worker::reader::run_stream_reader;
use crate::worker::spawner::{monitor_exit, spawn_worker, SpawnConfig};
use crate::worker::writer::{run_command_writer, CommandChannel, PendingWrite};
use crate::{AppError, Result};

/// Capacity of the internal stream event channel.
const STREAM_EVENT_BUFFER: usize = 64;

/// Capacity of the request channel behind [`SupervisorHandle`].
const REQUEST_BUFFER: usize = 32;

/// Capacity of each worker's command queue.
const WRITE_BUFFER: usize = 8;

// ── Inputs ───────────────────────────────────────────────────────────────────

/// Input to the supervisor state machine, produced by the I/O tasks of one
/// worker generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes read from a stream.
    Data {
        /// Worker generation the bytes belong to.
        generation: u64,
        /// Source stream.
        stream: StreamKind,
        /// The bytes, in read order.
        chunk: Bytes,
    },
    /// A stream reached EOF.
    Closed {
        /// Worker generation.
        generation: u64,
        /// Stream that closed.
        stream: StreamKind,
    },
    /// Reading a stream failed.
    Failed {
        /// Worker generation.
        generation: u64,
        /// Stream that failed.
        stream: StreamKind,
        /// Human-readable failure reason.
        reason: String,
    },
    /// The worker process exited.
    Exited {
        /// Worker generation.
        generation: u64,
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Human-readable exit description.
        reason: String,
    },
}

impl StreamEvent {
    /// Worker generation this event belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            Self::Data { generation, .. }
            | Self::Closed { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Exited { generation, .. } => *generation,
        }
    }
}

/// Lifecycle state of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No worker has been launched yet.
    Unspawned,
    /// A launch is in progress.
    Spawning,
    /// A worker is live.
    Running,
    /// The last worker is gone; a later send may launch a new one.
    Terminated,
}

/// Settings a supervisor is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Wire dialect, which decides the decoder per stream.
    pub variant: ProtocolVariant,
    /// How to launch the worker.
    pub spawn: SpawnConfig,
    /// Whether a send after termination respawns.
    pub respawn_policy: RespawnPolicy,
    /// Longest accepted output line, in bytes.
    pub max_line_bytes: usize,
    /// Capacity of the event sink channel created by [`spawn_supervisor`].
    pub event_buffer: usize,
}

impl SupervisorConfig {
    /// Settings with default policy and limits.
    #[must_use]
    pub fn new(variant: ProtocolVariant, spawn: SpawnConfig) -> Self {
        Self {
            variant,
            spawn,
            respawn_policy: RespawnPolicy::default(),
            max_line_bytes: MAX_LINE_BYTES,
            event_buffer: 256,
        }
    }
}

// ── Worker handle ────────────────────────────────────────────────────────────

/// Framer and decoder for one output stream.
#[derive(Debug)]
struct StreamPipeline {
    stream: StreamKind,
    framer: LineFramer,
    decoder: LineDecoder,
    open: bool,
}

impl StreamPipeline {
    fn new(stream: StreamKind, variant: ProtocolVariant, max_line_bytes: usize) -> Self {
        Self {
            stream,
            framer: LineFramer::with_max_length(max_line_bytes),
            decoder: variant.decoder_for(stream),
            open: true,
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolMessage> {
        let decoder = self.decoder;
        let stream = self.stream;
        self.framer
            .feed(chunk)
            .map(|line| decode_framed(decoder, stream, line))
            .collect()
    }

    fn finish(&mut self) -> Option<ProtocolMessage> {
        self.open = false;
        let decoder = self.decoder;
        let stream = self.stream;
        self.framer
            .finish()
            .map(|line| decode_framed(decoder, stream, line))
    }
}

fn decode_framed(decoder: LineDecoder, stream: StreamKind, line: Result<String>) -> ProtocolMessage {
    match line {
        Ok(line) => decoder.decode(&line),
        Err(err) => {
            warn!(stream = stream.as_str(), error = %err, "framing error, skipping line");
            ProtocolMessage::ErrorLine(err.to_string())
        }
    }
}

/// Everything owned for one live worker.
///
/// Dropping the handle cancels its writer, reader tasks and exit monitor; the
/// monitor then drops the child, which `kill_on_drop` terminates if it is
/// still running.
#[derive(Debug)]
struct WorkerHandle {
    generation: u64,
    pid: Option<u32>,
    /// `None` once the worker's stdin has been closed.
    writer: Option<mpsc::Sender<PendingWrite>>,
    stdout: StreamPipeline,
    stderr: StreamPipeline,
    exit: Option<(Option<i32>, String)>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    fn pipeline_mut(&mut self, stream: StreamKind) -> &mut StreamPipeline {
        match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit.as_ref().and_then(|(code, _)| *code)
    }

    fn drained(&self) -> bool {
        self.exit.is_some() && !self.stdout.open && !self.stderr.open
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

/// Owner of the worker process and its output pipelines.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    router: ActionRouter,
    state: WorkerState,
    worker: Option<WorkerHandle>,
    generation: u64,
    sink: mpsc::Sender<SupervisorEvent>,
    stream_tx: mpsc::Sender<StreamEvent>,
    stream_rx: mpsc::Receiver<StreamEvent>,
}

impl Supervisor {
    /// Create an unspawned supervisor delivering events to `sink`.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        router: ActionRouter,
        sink: mpsc::Sender<SupervisorEvent>,
    ) -> Self {
        let (stream_tx, stream_rx) = mpsc::channel(STREAM_EVENT_BUFFER);
        Self {
            config,
            router,
            state: WorkerState::Unspawned,
            worker: None,
            generation: 0,
            sink,
            stream_tx,
            stream_rx,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of spawn attempts so far; also the generation of the newest worker.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id of the live worker, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.worker.as_ref().and_then(|worker| worker.pid)
    }

    /// Launch the worker unless one is already live.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be launched, after
    /// emitting [`SupervisorEvent::SpawnFailed`].
    pub async fn start(&mut self) -> Result<()> {
        if self.is_live() {
            debug!(generation = self.generation, "worker already running");
            return Ok(());
        }
        self.spawn().await
    }

    /// Write `command` to the worker, spawning it first when allowed.
    ///
    /// An unspawned supervisor always spawns; a terminated one respawns only
    /// under [`RespawnPolicy::OnDemand`]. Spawn and write happen in one step:
    /// no other request is served in between. Stream events are still
    /// applied while the write is pending.
    ///
    /// # Errors
    ///
    /// - `AppError::WorkerUnavailable`: terminated and respawn is disabled.
    /// - `AppError::Spawn`: the worker could not be launched.
    /// - `AppError::Write`: the write to the worker's stdin failed.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        if !self.is_live() {
            if self.state != WorkerState::Unspawned
                && self.config.respawn_policy == RespawnPolicy::Fail
            {
                warn!(generation = self.generation, "command rejected, worker not running");
                return Err(AppError::WorkerUnavailable(
                    "worker has exited and respawn is disabled".into(),
                ));
            }
            self.spawn().await?;
        }

        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| AppError::WorkerUnavailable("worker not running".into()))?;
        let writer = worker
            .writer
            .clone()
            .ok_or_else(|| AppError::Write("worker stdin is closed".into()))?;
        debug!(generation = worker.generation, "sending command to worker");

        let (reply, outcome) = oneshot::channel();
        writer
            .send(PendingWrite {
                command: command.clone(),
                reply,
            })
            .await
            .map_err(|_| AppError::Write("write failed: worker stdin writer stopped".into()))?;
        self.await_write(outcome).await
    }

    /// Close the live worker's stdin once queued writes are done.
    ///
    /// Later sends to the same worker fail with `AppError::Write`. Does
    /// nothing when no worker is live.
    pub fn close_input(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            if worker.writer.take().is_some() {
                info!(generation = worker.generation, "closing worker stdin");
            }
        }
    }

    /// Route `action` through the action table and send the resulting command.
    ///
    /// Returns `false` when no handler is registered for the action type.
    ///
    /// # Errors
    ///
    /// Propagates [`Supervisor::send`] failures.
    pub async fn dispatch(&mut self, action: &Action) -> Result<bool> {
        match self.router.route(action) {
            Routed::Unhandled => {
                debug!(action_type = action.action_type.as_str(), "no handler for action");
                Ok(false)
            }
            Routed::Handled(None) => Ok(true),
            Routed::Handled(Some(command)) => {
                self.send(&command).await?;
                Ok(true)
            }
        }
    }

    /// Apply one stream event.
    ///
    /// Events from a generation other than the live worker's are stale and
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the sink has been dropped.
    pub async fn step(&mut self, event: StreamEvent) -> Result<()> {
        let Some(worker) = self
            .worker
            .as_mut()
            .filter(|worker| worker.generation == event.generation())
        else {
            debug!(generation = event.generation(), "dropping stale stream event");
            return Ok(());
        };

        match event {
            StreamEvent::Data { stream, chunk, .. } => {
                let messages = worker.pipeline_mut(stream).feed(&chunk);
                for message in messages {
                    self.emit(SupervisorEvent::Message { stream, message }).await?;
                }
            }
            StreamEvent::Closed { stream, .. } => {
                debug!(generation = worker.generation, stream = stream.as_str(), "stream closed");
                if let Some(message) = worker.pipeline_mut(stream).finish() {
                    self.emit(SupervisorEvent::Message { stream, message }).await?;
                }
                self.terminate_if_drained().await?;
            }
            StreamEvent::Failed { stream, reason, .. } => {
                warn!(
                    generation = worker.generation,
                    stream = stream.as_str(),
                    reason = reason.as_str(),
                    "worker stream fault"
                );
                let exit_code = worker.exit_code();
                // The healthy stream's fragment is flushed; chunks still
                // queued for this generation are dropped with the worker.
                let healthy = sibling(stream);
                let flushed = worker.pipeline_mut(healthy).finish();
                if let Some(message) = flushed {
                    self.emit(SupervisorEvent::Message {
                        stream: healthy,
                        message,
                    })
                    .await?;
                }
                self.emit(SupervisorEvent::StreamFault {
                    stream,
                    reason: reason.clone(),
                })
                .await?;
                self.terminate(exit_code, format!("{} {reason}", stream.as_str()))
                    .await?;
            }
            StreamEvent::Exited {
                exit_code, reason, ..
            } => {
                info!(
                    generation = worker.generation,
                    exit_code,
                    reason = reason.as_str(),
                    "worker process exited"
                );
                worker.exit = Some((exit_code, reason));
                self.terminate_if_drained().await?;
            }
        }
        Ok(())
    }

    /// Wait for the next event from the worker's I/O tasks and apply it.
    ///
    /// For callers that drive the state machine themselves instead of
    /// through [`Supervisor::run`]. Waits forever if no worker was ever
    /// spawned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the sink has been dropped.
    pub async fn step_next(&mut self) -> Result<()> {
        match self.stream_rx.recv().await {
            Some(event) => self.step(event).await,
            None => Err(AppError::Closed("stream event channel closed".into())),
        }
    }

    /// Drive the supervisor until every [`SupervisorHandle`] is dropped or
    /// the sink is closed.
    ///
    /// # Errors
    ///
    /// Returns `Ok(())` in both shutdown cases; request failures are
    /// reported to the requester, not here.
    pub async fn run(mut self, mut requests: mpsc::Receiver<Request>) -> Result<()> {
        loop {
            let next = tokio::select! {
                Some(event) = self.stream_rx.recv() => Next::Stream(event),
                request = requests.recv() => Next::Request(request),
            };

            match next {
                Next::Stream(event) => {
                    if let Err(err) = self.step(event).await {
                        debug!(error = %err, "event sink closed, stopping supervisor");
                        break;
                    }
                }
                Next::Request(None) => {
                    debug!("all supervisor handles dropped, stopping supervisor");
                    break;
                }
                Next::Request(Some(request)) => self.serve(request).await,
            }
        }

        info!(generation = self.generation, "supervisor stopped");
        Ok(())
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    fn is_live(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| worker.exit.is_none())
    }

    async fn serve(&mut self, request: Request) {
        match request {
            Request::Start { reply } => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Request::Send { command, reply } => {
                let result = self.send(&command).await;
                let _ = reply.send(result);
            }
            Request::Dispatch { action, reply } => {
                let result = self.dispatch(&action).await;
                let _ = reply.send(result);
            }
            Request::CloseInput { reply } => {
                self.close_input();
                let _ = reply.send(());
            }
            Request::State { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    /// Wait for a write outcome, applying stream events meanwhile.
    async fn await_write(&mut self, mut outcome: oneshot::Receiver<Result<()>>) -> Result<()> {
        loop {
            tokio::select! {
                result = &mut outcome => {
                    return result.unwrap_or_else(|_| {
                        Err(AppError::Write(
                            "write failed: worker stopped before the write completed".into(),
                        ))
                    });
                }
                Some(event) = self.stream_rx.recv() => self.step(event).await?,
            }
        }
    }

    async fn spawn(&mut self) -> Result<()> {
        // A worker whose exit was seen but whose streams are still open is
        // finalized now; output it has not yet delivered is discarded.
        if let Some(worker) = self.worker.as_ref() {
            let exit_code = worker.exit_code();
            debug!(generation = worker.generation, "retiring exited worker before respawn");
            self.terminate(exit_code, "superseded by respawn".into())
                .await?;
        }

        self.state = WorkerState::Spawning;
        self.generation += 1;
        let generation = self.generation;

        let connection = match spawn_worker(&self.config.spawn) {
            Ok(connection) => connection,
            Err(err) => {
                error!(generation, error = %err, "worker spawn failed");
                self.state = WorkerState::Terminated;
                self.emit(SupervisorEvent::SpawnFailed {
                    reason: err.to_string(),
                })
                .await?;
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let (writer, queue) = mpsc::channel(WRITE_BUFFER);
        tokio::spawn(run_command_writer(
            generation,
            CommandChannel::new(connection.stdin),
            queue,
            cancel.clone(),
        ));
        tokio::spawn(run_stream_reader(
            generation,
            StreamKind::Stdout,
            connection.stdout,
            self.stream_tx.clone(),
            cancel.clone(),
        ));
        tokio::spawn(run_stream_reader(
            generation,
            StreamKind::Stderr,
            connection.stderr,
            self.stream_tx.clone(),
            cancel.clone(),
        ));
        drop(monitor_exit(
            generation,
            connection.child,
            self.stream_tx.clone(),
            cancel.clone(),
        ));

        let variant = self.config.variant;
        let max_line_bytes = self.config.max_line_bytes;
        self.worker = Some(WorkerHandle {
            generation,
            pid: connection.pid,
            writer: Some(writer),
            stdout: StreamPipeline::new(StreamKind::Stdout, variant, max_line_bytes),
            stderr: StreamPipeline::new(StreamKind::Stderr, variant, max_line_bytes),
            exit: None,
            cancel,
        });
        self.state = WorkerState::Running;
        info!(generation, pid = connection.pid, "worker running");

        self.emit(SupervisorEvent::Spawned {
            pid: connection.pid,
            generation,
        })
        .await
    }

    async fn terminate_if_drained(&mut self) -> Result<()> {
        let Some(worker) = self.worker.as_ref().filter(|worker| worker.drained()) else {
            return Ok(());
        };
        let (exit_code, reason) = worker
            .exit
            .clone()
            .unwrap_or((None, "process exited".into()));
        self.terminate(exit_code, reason).await
    }

    async fn terminate(&mut self, exit_code: Option<i32>, reason: String) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            info!(
                generation = worker.generation,
                exit_code,
                reason = reason.as_str(),
                "worker terminated"
            );
        }
        self.state = WorkerState::Terminated;
        self.emit(SupervisorEvent::Terminated { exit_code, reason })
            .await
    }

    async fn emit(&self, event: SupervisorEvent) -> Result<()> {
        self.sink
            .send(event)
            .await
            .map_err(|_| AppError::Closed("event sink dropped".into()))
    }
}

fn sibling(stream: StreamKind) -> StreamKind {
    match stream {
        StreamKind::Stdout => StreamKind::Stderr,
        StreamKind::Stderr => StreamKind::Stdout,
    }
}

enum Next {
    Stream(StreamEvent),
    Request(Option<Request>),
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Request served by [`Supervisor::run`].
#[derive(Debug)]
pub enum Request {
    /// Launch the worker if it is not running.
    Start {
        /// Outcome of the launch.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send a command.
    Send {
        /// Command to write.
        command: Command,
        /// Outcome of the write.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Route and send an action.
    Dispatch {
        /// Action to route.
        action: Action,
        /// Whether a handler matched, or the send failure.
        reply: oneshot::Sender<Result<bool>>,
    },
    /// Close the worker's stdin.
    CloseInput {
        /// Acknowledgement.
        reply: oneshot::Sender<()>,
    },
    /// Report the lifecycle state.
    State {
        /// Current state.
        reply: oneshot::Sender<WorkerState>,
    },
}

/// Cloneable front end of a running [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    requests: mpsc::Sender<Request>,
}

impl SupervisorHandle {
    /// Launch the worker if it is not running.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::start`]; `AppError::Closed` if the supervisor is gone.
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| Request::Start { reply }).await?
    }

    /// Send `command` to the worker.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::send`]; `AppError::Closed` if the supervisor is gone.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.request(|reply| Request::Send { command, reply }).await?
    }

    /// Route `action` and send the resulting command.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::dispatch`]; `AppError::Closed` if the supervisor is gone.
    pub async fn dispatch(&self, action: Action) -> Result<bool> {
        self.request(|reply| Request::Dispatch { action, reply }).await?
    }

    /// Close the live worker's stdin so it sees end of input.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the supervisor is gone.
    pub async fn close_input(&self) -> Result<()> {
        self.request(|reply| Request::CloseInput { reply }).await
    }

    /// Current lifecycle state of the worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the supervisor is gone.
    pub async fn state(&self) -> Result<WorkerState> {
        self.request(|reply| Request::State { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| AppError::Closed("supervisor stopped".into()))?;
        response
            .await
            .map_err(|_| AppError::Closed("supervisor dropped the request".into()))
    }
}

/// Start a supervisor task.
///
/// Returns the handle for requests, the event sink receiver, and the task's
/// join handle. The worker is not launched until the first send or start.
#[must_use]
pub fn spawn_supervisor(
    config: SupervisorConfig,
    router: ActionRouter,
) -> (
    SupervisorHandle,
    mpsc::Receiver<SupervisorEvent>,
    JoinHandle<Result<()>>,
) {
    let (sink, events) = mpsc::channel(config.event_buffer.max(1));
    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
    let supervisor = Supervisor::new(config, router, sink);
    let task = tokio::spawn(supervisor.run(requests_rx));
    (
        SupervisorHandle {
            requests: requests_tx,
        },
        events,
        task,
    )
}
