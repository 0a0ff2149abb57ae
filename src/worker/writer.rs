//! Command channel to the worker's stdin.
//!
//! Serialises each [`Command`] to a single-line JSON string, appends `\n`,
//! and writes and flushes it before returning, so a write to a dead pipe is
//! reported to the caller of [`CommandChannel::send`] rather than dropped.
//!
//! [`run_command_writer`] owns the channel for one worker generation so the
//! supervisor never blocks on a full stdin pipe while the worker's output
//! waits to be drained. Dropping every [`PendingWrite`] sender closes the
//! worker's stdin.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::command::Command;
use crate::worker::codec::CommandCodec;
use crate::{AppError, Result};

/// Write half of a worker connection.
#[derive(Debug)]
pub struct CommandChannel<W> {
    sink: FramedWrite<W, CommandCodec>,
}

impl<W> CommandChannel<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap the worker's stdin.
    pub fn new(stdin: W) -> Self {
        Self {
            sink: FramedWrite::new(stdin, CommandCodec::new()),
        }
    }

    /// Encode `command` as one JSON line and write it to the worker.
    ///
    /// # Errors
    ///
    /// - [`AppError::Write`]`("write failed: …")` if the pipe is closed or
    ///   the write otherwise fails (e.g. the worker has exited).
    /// - [`AppError::Write`]`("failed to serialise command: …")` if the
    ///   command cannot be serialised.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.sink.send(command).await.map_err(|err| match err {
            AppError::Io(msg) => {
                warn!(error = msg.as_str(), "command write to worker stdin failed");
                AppError::Write(format!("write failed: {msg}"))
            }
            other => other,
        })?;
        debug!(fields = command.fields().len(), "command written to worker");
        Ok(())
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

// ── Writer task ──────────────────────────────────────────────────────────────

/// A command queued for the writer task, with the channel for its outcome.
#[derive(Debug)]
pub struct PendingWrite {
    /// Command to write.
    pub command: Command,
    /// Receives the result of the write.
    pub reply: oneshot::Sender<Result<()>>,
}

/// Writer task: writes queued commands in order until the queue closes or
/// `cancel` fires.
///
/// Each write result goes back through its [`PendingWrite::reply`]. A write
/// interrupted by cancellation drops its reply unanswered. When the task
/// ends the channel is dropped, which closes the worker's stdin.
pub async fn run_command_writer<W>(
    generation: u64,
    mut channel: CommandChannel<W>,
    mut queue: mpsc::Receiver<PendingWrite>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let pending = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "command writer cancelled");
                return;
            }

            pending = queue.recv() => pending,
        };

        let Some(PendingWrite { command, reply }) = pending else {
            debug!(generation, "command queue closed, closing worker stdin");
            return;
        };

        let result = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "command writer cancelled during write");
                return;
            }

            result = channel.send(&command) => result,
        };

        if reply.send(result).is_err() {
            debug!(generation, "write requester gone before completion");
        }
    }
}
