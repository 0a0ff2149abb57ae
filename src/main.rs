#![forbid(unsafe_code)]

//! `worker-bridge`: supervises one line-delimited JSON worker process.
//!
//! Reads JSON objects from stdin, one per line, and sends each to the worker
//! as a command (or routes it as an action when its `type` has a forwarding
//! handler). Every supervisor event is written to stdout as one JSON line.
//! Logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use worker_bridge::config::{GlobalConfig, RespawnPolicy};
use worker_bridge::dispatch::ActionRouter;
use worker_bridge::mode::ProtocolVariant;
use worker_bridge::models::command::{Action, Command};
use worker_bridge::models::message::SupervisorEvent;
use worker_bridge::worker::supervisor::{spawn_supervisor, SupervisorHandle};
use worker_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "worker-bridge", about = "Line-delimited JSON worker supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured protocol variant.
    #[arg(long, value_enum)]
    variant: Option<ProtocolVariant>,

    /// Override the configured respawn policy.
    #[arg(long, value_enum)]
    respawn_policy: Option<RespawnPolicy>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Action type whose stdin objects are forwarded through the action table.
    #[arg(long = "forward-action")]
    forward_actions: Vec<String>,

    /// Launch the worker immediately instead of on the first command.
    #[arg(long)]
    start: bool,

    /// Extra worker arguments, e.g. the program file for the interpreter.
    #[arg(last = true)]
    worker_args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("worker-bridge bootstrap");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(policy) = args.respawn_policy {
        config.respawn_policy = policy;
    }
    config.worker.args.extend(args.worker_args.iter().cloned());
    config.validate()?;
    info!(variant = ?config.variant, command = config.worker.command.as_str(), "configuration loaded");

    // ── Start supervisor ────────────────────────────────
    let router = ActionRouter::forwarding(args.forward_actions.iter().cloned())?;
    let (handle, mut events, supervisor_task) =
        spawn_supervisor(config.supervisor_config()?, router);

    // A failed start is reported on the event stream like any other spawn.
    if args.start || !args.worker_args.is_empty() {
        if let Err(err) = handle.start().await {
            error!(%err, "initial worker start failed");
        }
    }

    let mut stdin_task = tokio::spawn(forward_stdin(handle.clone()));
    let mut stdin_done = false;
    let mut worker_live = false;
    let mut out = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // ── Relay events until input ends and the worker is gone ──
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                relay(&mut out, &event, &mut worker_live).await?;
                if stdin_done && !worker_live {
                    break;
                }
            }
            result = &mut stdin_task, if !stdin_done => {
                stdin_done = true;
                if let Err(err) = result {
                    error!(%err, "stdin forwarding task failed");
                }
                // Every spawn caused by forwarded input is already queued.
                while let Ok(event) = events.try_recv() {
                    relay(&mut out, &event, &mut worker_live).await?;
                }
                if !worker_live {
                    break;
                }
            }
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Dropping the last handle stops the supervisor, which kills a live worker.
    drop(handle);
    stdin_task.abort();
    if let Ok(Err(err)) = supervisor_task.await {
        error!(%err, "supervisor stopped with error");
    }
    info!("worker-bridge shut down");
    Ok(())
}

/// Forward stdin JSON lines to the worker until EOF, then close the
/// worker's stdin.
async fn forward_stdin(handle: SupervisorHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(%err, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::from_json_str(&line) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, raw_line = line.as_str(), "ignoring invalid input line");
                continue;
            }
        };
        if let Err(err) = forward_one(&handle, command).await {
            error!(%err, "failed to deliver command");
            if matches!(err, AppError::Closed(_)) {
                return;
            }
        }
    }

    if let Err(err) = handle.close_input().await {
        debug!(%err, "supervisor gone before worker stdin could be closed");
    }
}

async fn forward_one(handle: &SupervisorHandle, command: Command) -> Result<()> {
    if let Some(action) = Action::from_command(&command) {
        if handle.dispatch(action).await? {
            return Ok(());
        }
    }
    handle.send(command).await
}

async fn relay(
    out: &mut tokio::io::Stdout,
    event: &SupervisorEvent,
    worker_live: &mut bool,
) -> Result<()> {
    match event {
        SupervisorEvent::Spawned { .. } => *worker_live = true,
        SupervisorEvent::Terminated { .. } | SupervisorEvent::SpawnFailed { .. } => {
            *worker_live = false;
        }
        SupervisorEvent::Message { .. } | SupervisorEvent::StreamFault { .. } => {}
    }
    write_event(out, event).await
}

async fn write_event(out: &mut tokio::io::Stdout, event: &SupervisorEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event)
        .map_err(|err| AppError::Io(format!("failed to serialise event: {err}")))?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
