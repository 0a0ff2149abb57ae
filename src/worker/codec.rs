//! NDJSON encoder for commands sent to the worker.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] so every [`Command`] becomes one
//! compact JSON object followed by exactly one `\n`.
//!
//! # Usage
//!
//! Use [`CommandCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedWrite`] over the worker's stdin.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedWrite;
//! use worker_bridge::worker::codec::CommandCodec;
//!
//! let sink = FramedWrite::new(child_stdin, CommandCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Encoder, LinesCodec, LinesCodecError};

use crate::models::command::Command;
use crate::{AppError, Result};

/// Line encoder for outbound worker commands.
#[derive(Debug, Default)]
pub struct CommandCodec(LinesCodec);

impl CommandCodec {
    /// Create a new `CommandCodec`.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new())
    }
}

impl Encoder<&Command> for CommandCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated JSON line into `dst`.
    ///
    /// Compact `serde_json` output escapes control characters inside
    /// strings, so the encoded object never contains a raw newline.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Write`] if serialization fails, or
    /// [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(item)
            .map_err(|e| AppError::Write(format!("failed to serialise command: {e}")))?;
        self.0.encode(line, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("command line exceeded codec limit".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
