//! Global configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::mode::ProtocolVariant;
use crate::worker::framer::MAX_LINE_BYTES;
use crate::worker::spawner::SpawnConfig;
use crate::worker::supervisor::SupervisorConfig;
use crate::{AppError, Result};

/// Command line used when none is configured.
pub const DEFAULT_WORKER_COMMAND: &str = "brainfuck --debug --delay 10";

/// What a command sent after the worker has terminated does.
///
/// The first command always spawns an unspawned worker; this policy only
/// governs respawning.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespawnPolicy {
    /// Spawn a fresh worker, then write the command.
    #[default]
    OnDemand,
    /// Reject the command with `AppError::WorkerUnavailable`.
    Fail,
}

/// How to launch the worker process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Shell-style command line: executable followed by leading arguments.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments appended after those in `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the worker.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the worker.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

fn default_command() -> String {
    DEFAULT_WORKER_COMMAND.into()
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_event_buffer() -> usize {
    256
}

/// Global configuration parsed from `bridge.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Wire dialect spoken by the worker.
    #[serde(default)]
    pub variant: ProtocolVariant,
    /// Behaviour of a send after the worker has terminated.
    #[serde(default)]
    pub respawn_policy: RespawnPolicy,
    /// Longest accepted output line, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Capacity of the event sink channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Worker launch settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::default(),
            respawn_policy: RespawnPolicy::default(),
            max_line_bytes: default_max_line_bytes(),
            event_buffer: default_event_buffer(),
            worker: WorkerConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits and that the worker command line is usable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(AppError::Config("max_line_bytes must be greater than 0".into()));
        }
        if self.event_buffer == 0 {
            return Err(AppError::Config("event_buffer must be greater than 0".into()));
        }
        self.spawn_config().map(|_| ())
    }

    /// Build the spawn settings, splitting `worker.command` shell-style.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the command line has unbalanced quotes
    /// or names no executable.
    pub fn spawn_config(&self) -> Result<SpawnConfig> {
        let mut words = shell_words::split(&self.worker.command)
            .map_err(|err| AppError::Config(format!("invalid worker command: {err}")))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| AppError::Config("worker command is empty".into()))?;

        let mut spawn = SpawnConfig::new(program);
        spawn.args = words.chain(self.worker.args.iter().cloned()).collect();
        spawn.working_dir.clone_from(&self.worker.working_dir);
        spawn.env.clone_from(&self.worker.env);
        Ok(spawn)
    }

    /// Build the full supervisor configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`GlobalConfig::spawn_config`] failures.
    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        Ok(SupervisorConfig {
            variant: self.variant,
            spawn: self.spawn_config()?,
            respawn_policy: self.respawn_policy,
            max_line_bytes: self.max_line_bytes,
            event_buffer: self.event_buffer,
        })
    }
}
