//! Protocol variant: which wire dialect the supervised worker speaks.
//!
//! `ProtocolVariant` is used both as the `--variant` CLI flag value and as
//! the `variant` key in the TOML configuration. It decides which decoder is
//! attached to each of the worker's output streams.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::message::StreamKind;
use crate::worker::decoder::LineDecoder;

/// Wire dialect spoken by the worker process.
///
/// Defaults to [`ProtocolVariant::Interpreter`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Step-tracing interpreter: plain program output on stdout, one JSON
    /// history record per executed instruction on stderr.
    #[default]
    Interpreter,
    /// Image worker: one JSON response per line on stdout; stderr carries
    /// free-form diagnostics.
    Worker,
}

impl ProtocolVariant {
    /// Decoder attached to the given output stream for this variant.
    #[must_use]
    pub fn decoder_for(self, stream: StreamKind) -> LineDecoder {
        match (self, stream) {
            (Self::Interpreter, StreamKind::Stdout) => LineDecoder::PlainText,
            (Self::Interpreter, StreamKind::Stderr) => LineDecoder::InterpreterTrace,
            (Self::Worker, StreamKind::Stdout) => LineDecoder::WorkerResponse,
            (Self::Worker, StreamKind::Stderr) => LineDecoder::Diagnostic,
        }
    }
}
