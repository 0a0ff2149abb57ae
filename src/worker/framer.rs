//! Line framing for worker output streams.
//!
//! Worker stdout/stderr bytes arrive in chunks of arbitrary size. A chunk may
//! hold several complete lines, no line at all, or end in the middle of a
//! line (or of a multi-byte UTF-8 character). [`LineFramer`] recovers the
//! complete `\n`-delimited lines in order and holds back the trailing
//! fragment until its delimiter arrives.
//!
//! The buffer update itself is the pure function [`frame_chunk`]; the framer
//! only adds the per-line length limit on top of it.

use crate::{AppError, Result};

/// Maximum line length accepted from a worker stream: 1 MiB.
///
/// A longer line is discarded up to its delimiter and reported once as
/// [`AppError::Protocol`]`("line too long: …")`.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Result of framing one chunk against the previous pending fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Framed {
    /// Lines completed by this chunk, delimiter removed, in stream order.
    pub completed: Vec<Vec<u8>>,
    /// Bytes after the last delimiter; possibly empty.
    pub pending: Vec<u8>,
}

/// Split `chunk` on `\n` and join it with the `pending` fragment.
///
/// The first piece of the chunk extends `pending`; every later piece starts
/// a new fragment, which completes the one before it. The last piece becomes
/// the new pending fragment. A chunk without a delimiter therefore completes
/// nothing, and a chunk ending on a delimiter leaves an empty fragment.
#[must_use]
pub fn frame_chunk(pending: Vec<u8>, chunk: &[u8]) -> Framed {
    let mut pieces = chunk.split(|byte| *byte == b'\n');
    let mut current = pending;
    if let Some(first) = pieces.next() {
        current.extend_from_slice(first);
    }

    let mut completed = Vec::new();
    for piece in pieces {
        completed.push(std::mem::replace(&mut current, piece.to_vec()));
    }

    Framed {
        completed,
        pending: current,
    }
}

/// Stateful line framer for one worker output stream.
///
/// Create a fresh framer for every spawned process; framer state never
/// carries over from one process to the next.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineFramer {
    /// Create a framer with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a framer that rejects lines longer than `max_line_bytes`.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    /// Feed a chunk and iterate over the lines it completes.
    ///
    /// The pending fragment is updated before this returns; the returned
    /// iterator only converts the completed lines. Each item is either a
    /// line (lossy UTF-8, delimiter removed) or an
    /// [`AppError::Protocol`] for a line that exceeded the length limit.
    pub fn feed(&mut self, chunk: &[u8]) -> FramedLines {
        let Framed { completed, pending } = frame_chunk(std::mem::take(&mut self.pending), chunk);

        // The first completed line is the tail of a line already reported
        // as oversized.
        let overflowed = self.discarding && !completed.is_empty();
        if !completed.is_empty() {
            self.discarding = false;
        }

        self.pending = pending;
        if self.discarding || self.pending.len() > self.max_line_bytes {
            self.pending.clear();
            self.discarding = true;
        }

        FramedLines {
            lines: completed.into_iter(),
            overflowed,
            max_line_bytes: self.max_line_bytes,
        }
    }

    /// Flush the pending fragment at end of stream.
    ///
    /// Returns `None` when nothing is pending, so a stream ending on a
    /// delimiter produces no spurious empty line.
    pub fn finish(&mut self) -> Option<Result<String>> {
        let pending = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) {
            return Some(Err(line_too_long(self.max_line_bytes)));
        }
        if pending.is_empty() {
            return None;
        }
        Some(Ok(String::from_utf8_lossy(&pending).into_owned()))
    }

    /// Bytes received after the last delimiter.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the lines completed by one [`LineFramer::feed`] call.
#[derive(Debug)]
pub struct FramedLines {
    lines: std::vec::IntoIter<Vec<u8>>,
    overflowed: bool,
    max_line_bytes: usize,
}

impl Iterator for FramedLines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        if std::mem::take(&mut self.overflowed) || line.len() > self.max_line_bytes {
            return Some(Err(line_too_long(self.max_line_bytes)));
        }
        Some(Ok(String::from_utf8_lossy(&line).into_owned()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lines.size_hint()
    }
}

fn line_too_long(max_line_bytes: usize) -> AppError {
    AppError::Protocol(format!("line too long: exceeded {max_line_bytes} bytes"))
}
