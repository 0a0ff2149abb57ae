//! Decoded protocol messages and the events delivered to the sink.

use serde::{Deserialize, Serialize};

/// Readable output stream of the worker process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    /// Lower-case stream name used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One interpreter step as reported on the interpreter's stderr.
///
/// The wire form uses camel-case keys and carries `memory` as a
/// whitespace-separated string of cell values; see
/// [`parse_history_record`](crate::worker::decoder::parse_history_record).
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Index of the instruction that was just executed.
    pub last_instruction_index: Option<u64>,
    /// The instruction that was just executed.
    pub last_instruction: Option<String>,
    /// Position of the memory pointer after the step.
    pub current_pointer: Option<u64>,
    /// Memory cell values, leftmost cell first.
    pub memory: Vec<i64>,
}

/// Image state pushed by the image worker inside a `Success` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSnapshot {
    /// Path of the open image.
    pub path: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Encoded image payload, passed through untouched.
    pub data: serde_json::Value,
    /// Whether an undo step is available.
    pub can_undo: bool,
    /// Whether a redo step is available.
    pub can_redo: bool,
}

/// A single decoded protocol line.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// Plain program output, relayed verbatim.
    Output(String),
    /// Interpreter step record.
    HistoryRecord(HistoryRecord),
    /// Image worker state update.
    Image(ImageSnapshot),
    /// A line that could not be decoded, or a diagnostic line.
    ErrorLine(String),
    /// The worker closed its project.
    Closed,
}

/// Event handed to the sink by the supervisor.
///
/// Protocol messages and lifecycle diagnostics share one channel so the
/// consumer observes both in a single, consistent order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// A line from one of the worker's streams was decoded.
    Message {
        /// Stream the line was read from.
        stream: StreamKind,
        /// The decoded line.
        message: ProtocolMessage,
    },
    /// A worker process was launched.
    Spawned {
        /// OS process id, if the platform reported one.
        pid: Option<u32>,
        /// Spawn counter for this supervisor, starting at 1.
        generation: u64,
    },
    /// The worker process could not be launched.
    SpawnFailed {
        /// Human-readable failure reason.
        reason: String,
    },
    /// Reading one of the worker's streams failed.
    StreamFault {
        /// Stream that failed.
        stream: StreamKind,
        /// Human-readable failure reason.
        reason: String,
    },
    /// The worker process is gone and its handle has been released.
    Terminated {
        /// Process exit code, if available.
        exit_code: Option<i32>,
        /// Human-readable reason for termination.
        reason: String,
    },
}
