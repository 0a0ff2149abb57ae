//! Protocol line decoding.
//!
//! Each complete line from a worker stream is turned into exactly one
//! [`ProtocolMessage`]. Decoding never fails: a line that cannot be parsed is
//! data, not a fault, and is demoted to [`ProtocolMessage::ErrorLine`] with
//! the raw text so the stream keeps flowing.
//!
//! # Recognized worker responses (stdout, worker variant)
//!
//! | Line                                   | Maps to                          |
//! |----------------------------------------|----------------------------------|
//! | `"ProjectClosed"`                      | [`ProtocolMessage::Closed`]      |
//! | `{"Success": {path, width, height, …}}`| [`ProtocolMessage::Image`]       |
//! | *(any other JSON)*                     | `ErrorLine`; logged at `WARN`    |
//!
//! # Interpreter trace (stderr, interpreter variant)
//!
//! `{"lastInstructionIndex": 2, "lastInstruction": "+", "currentPointer": 0,
//! "memory": " 0 1 2"}` maps to [`ProtocolMessage::HistoryRecord`]. The
//! `memory` string is split on whitespace and every token parsed on its own;
//! one bad token rejects the whole line.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::models::message::{HistoryRecord, ImageSnapshot, ProtocolMessage};
use crate::{AppError, Result};

/// Termination sentinel sent by the image worker.
pub const PROJECT_CLOSED: &str = "ProjectClosed";

/// Key of the structured success payload in worker responses.
pub const SUCCESS_KEY: &str = "Success";

/// Per-stream line decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDecoder {
    /// No parsing; the line is program output.
    PlainText,
    /// Image worker JSON responses.
    WorkerResponse,
    /// Interpreter step records.
    InterpreterTrace,
    /// Free-form diagnostics, relayed as error lines.
    Diagnostic,
}

impl LineDecoder {
    /// Decode one line. Total: every input yields exactly one message.
    #[must_use]
    pub fn decode(self, line: &str) -> ProtocolMessage {
        match self {
            Self::PlainText => ProtocolMessage::Output(line.to_owned()),
            Self::WorkerResponse => decode_worker_response(line),
            Self::InterpreterTrace => decode_history_record(line),
            Self::Diagnostic => {
                warn!(raw_line = line, "worker stderr");
                ProtocolMessage::ErrorLine(line.to_owned())
            }
        }
    }
}

// ── Worker responses ─────────────────────────────────────────────────────────

/// Decode an image worker response, demoting failures to `ErrorLine`.
#[must_use]
pub fn decode_worker_response(line: &str) -> ProtocolMessage {
    match parse_worker_response(line) {
        Ok(message) => message,
        Err(AppError::Protocol(reason)) => {
            warn!(reason = reason.as_str(), raw_line = line, "unrecognized worker response");
            ProtocolMessage::ErrorLine(line.to_owned())
        }
        Err(err) => {
            warn!(error = %err, raw_line = line, "worker response decode failed");
            ProtocolMessage::ErrorLine(line.to_owned())
        }
    }
}

/// Parse an image worker response line.
///
/// # Errors
///
/// - [`AppError::Decode`]: not valid JSON, or a `Success` payload with
///   missing or mistyped fields.
/// - [`AppError::Protocol`]: well-formed JSON of an unrecognized shape.
pub fn parse_worker_response(line: &str) -> Result<ProtocolMessage> {
    match serde_json::from_str::<Value>(line)? {
        Value::String(sentinel) if sentinel == PROJECT_CLOSED => Ok(ProtocolMessage::Closed),
        Value::Object(mut response) if response.contains_key(SUCCESS_KEY) => {
            let payload = response.remove(SUCCESS_KEY).unwrap_or(Value::Null);
            let snapshot: ImageSnapshot = serde_json::from_value(payload)
                .map_err(|e| AppError::Decode(format!("invalid Success payload: {e}")))?;
            Ok(ProtocolMessage::Image(snapshot))
        }
        other => Err(AppError::Protocol(format!("unrecognized response: {other}"))),
    }
}

// ── Interpreter trace ────────────────────────────────────────────────────────

/// Wire shape of an interpreter step record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceLine {
    last_instruction_index: Option<u64>,
    last_instruction: Option<String>,
    current_pointer: Option<u64>,
    memory: String,
}

/// Decode an interpreter step record, demoting failures to `ErrorLine`.
#[must_use]
pub fn decode_history_record(line: &str) -> ProtocolMessage {
    match parse_history_record(line) {
        Ok(record) => ProtocolMessage::HistoryRecord(record),
        Err(err) => {
            warn!(error = %err, raw_line = line, "interpreter trace decode failed");
            ProtocolMessage::ErrorLine(line.to_owned())
        }
    }
}

/// Parse an interpreter step record.
///
/// # Errors
///
/// Returns [`AppError::Decode`] if the line is not a JSON object of the
/// expected shape or its `memory` field holds a non-numeric token.
pub fn parse_history_record(line: &str) -> Result<HistoryRecord> {
    let trace: TraceLine = serde_json::from_str(line)?;
    Ok(HistoryRecord {
        last_instruction_index: trace.last_instruction_index,
        last_instruction: trace.last_instruction,
        current_pointer: trace.current_pointer,
        memory: parse_memory(&trace.memory)?,
    })
}

/// Parse a whitespace-separated list of cell values.
///
/// Leading, trailing and repeated whitespace is ignored; an empty string is
/// an empty memory.
///
/// # Errors
///
/// Returns [`AppError::Decode`] naming the first token that is not an integer.
pub fn parse_memory(raw: &str) -> Result<Vec<i64>> {
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<i64>()
                .map_err(|e| AppError::Decode(format!("invalid memory cell `{token}`: {e}")))
        })
        .collect()
}
