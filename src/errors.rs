//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every supervisor failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The worker process could not be launched.
    Spawn(String),
    /// A protocol line was not valid JSON or had a malformed field.
    Decode(String),
    /// Stream framing violation (for example an over-long line).
    Protocol(String),
    /// A command was sent while no worker is running and respawn is disabled.
    WorkerUnavailable(String),
    /// Writing a command to the worker's stdin failed.
    Write(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The supervisor event loop has shut down.
    Closed(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::WorkerUnavailable(msg) => write!(f, "worker unavailable: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
