//! Unit tests for the supervisor state machine, driven through
//! [`Supervisor::step`] and [`Supervisor::step_next`] without a handle.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use worker_bridge::config::RespawnPolicy;
use worker_bridge::dispatch::ActionRouter;
use worker_bridge::mode::ProtocolVariant;
use worker_bridge::models::command::Command;
use worker_bridge::models::message::{ProtocolMessage, StreamKind, SupervisorEvent};
use worker_bridge::worker::spawner::SpawnConfig;
use worker_bridge::worker::supervisor::{StreamEvent, Supervisor, SupervisorConfig, WorkerState};
use worker_bridge::AppError;

fn supervisor(spawn: SpawnConfig) -> (Supervisor, mpsc::Receiver<SupervisorEvent>) {
    let (sink, events) = mpsc::channel(64);
    let config = SupervisorConfig::new(ProtocolVariant::Interpreter, spawn);
    (Supervisor::new(config, ActionRouter::new(), sink), events)
}

fn data(generation: u64, text: &'static str) -> StreamEvent {
    StreamEvent::Data {
        generation,
        stream: StreamKind::Stdout,
        chunk: Bytes::from_static(text.as_bytes()),
    }
}

/// A new supervisor has launched nothing.
#[test]
fn new_supervisor_is_unspawned() {
    let (supervisor, _events) = supervisor(SpawnConfig::new("cat"));

    assert_eq!(supervisor.state(), WorkerState::Unspawned);
    assert_eq!(supervisor.generation(), 0);
    assert_eq!(supervisor.pid(), None);
}

/// Stream events with no live worker are dropped silently.
#[tokio::test]
async fn events_without_worker_are_ignored() {
    let (mut supervisor, mut events) = supervisor(SpawnConfig::new("cat"));

    supervisor.step(data(1, "orphan\n")).await.expect("step");
    supervisor
        .step(StreamEvent::Exited {
            generation: 1,
            exit_code: Some(0),
            reason: "process exited with code 0".into(),
        })
        .await
        .expect("step");

    assert!(events.try_recv().is_err());
    assert_eq!(supervisor.state(), WorkerState::Unspawned);
}

/// Events from an earlier generation never reach the sink once a newer
/// worker is live.
#[cfg(unix)]
#[tokio::test]
async fn stale_generation_events_are_dropped() {
    let (mut supervisor, mut events) =
        supervisor(SpawnConfig::new("sh").arg("-c").arg("exit 0"));

    supervisor.start().await.expect("first start");
    while supervisor.state() != WorkerState::Terminated {
        timeout(Duration::from_secs(10), supervisor.step_next())
            .await
            .expect("worker exits")
            .expect("step");
    }
    while events.try_recv().is_ok() {}

    supervisor.start().await.expect("second start");
    assert_eq!(supervisor.generation(), 2);
    assert!(matches!(
        events.try_recv(),
        Ok(SupervisorEvent::Spawned { generation: 2, .. })
    ));

    supervisor.step(data(1, "stale\n")).await.expect("step");
    assert!(events.try_recv().is_err(), "stale output must be dropped");

    supervisor.step(data(2, "fresh\n")).await.expect("step");
    assert_eq!(
        events.try_recv().expect("fresh output"),
        SupervisorEvent::Message {
            stream: StreamKind::Stdout,
            message: ProtocolMessage::Output("fresh".to_owned()),
        }
    );
}

/// `Terminated` waits for both EOFs after the exit is observed.
#[cfg(unix)]
#[tokio::test]
async fn termination_waits_for_both_streams() {
    let (mut supervisor, mut events) = supervisor(SpawnConfig::new("cat"));
    supervisor.start().await.expect("start");
    let generation = supervisor.generation();
    while events.try_recv().is_ok() {}

    supervisor
        .step(StreamEvent::Exited {
            generation,
            exit_code: Some(0),
            reason: "process exited with code 0".into(),
        })
        .await
        .expect("step");
    supervisor
        .step(StreamEvent::Closed {
            generation,
            stream: StreamKind::Stdout,
        })
        .await
        .expect("step");
    assert!(events.try_recv().is_err(), "stderr still open");
    assert_eq!(supervisor.state(), WorkerState::Running);

    supervisor
        .step(StreamEvent::Closed {
            generation,
            stream: StreamKind::Stderr,
        })
        .await
        .expect("step");
    assert!(matches!(
        events.try_recv(),
        Ok(SupervisorEvent::Terminated {
            exit_code: Some(0),
            ..
        })
    ));
    assert_eq!(supervisor.state(), WorkerState::Terminated);
}

/// A read failure reports the fault and terminates the worker.
#[cfg(unix)]
#[tokio::test]
async fn stream_fault_terminates_worker() {
    let (mut supervisor, mut events) = supervisor(SpawnConfig::new("cat"));
    supervisor.start().await.expect("start");
    let generation = supervisor.generation();
    while events.try_recv().is_ok() {}

    supervisor
        .step(StreamEvent::Failed {
            generation,
            stream: StreamKind::Stderr,
            reason: "read failed: boom".into(),
        })
        .await
        .expect("step");

    assert_eq!(
        events.try_recv().expect("fault event"),
        SupervisorEvent::StreamFault {
            stream: StreamKind::Stderr,
            reason: "read failed: boom".into(),
        }
    );
    assert!(matches!(
        events.try_recv(),
        Ok(SupervisorEvent::Terminated { exit_code: None, .. })
    ));
    assert_eq!(supervisor.state(), WorkerState::Terminated);
    assert_eq!(supervisor.pid(), None);
}

/// A fault on one stream still flushes the other stream's pending fragment
/// before the worker is terminated.
#[cfg(unix)]
#[tokio::test]
async fn stream_fault_flushes_healthy_stream() {
    let (mut supervisor, mut events) = supervisor(SpawnConfig::new("cat"));
    supervisor.start().await.expect("start");
    let generation = supervisor.generation();
    while events.try_recv().is_ok() {}

    supervisor.step(data(generation, "done\npartial")).await.expect("step");
    supervisor
        .step(StreamEvent::Failed {
            generation,
            stream: StreamKind::Stderr,
            reason: "read failed: boom".into(),
        })
        .await
        .expect("step");

    let output = |text: &str| SupervisorEvent::Message {
        stream: StreamKind::Stdout,
        message: ProtocolMessage::Output(text.to_owned()),
    };
    assert_eq!(events.try_recv().expect("complete line"), output("done"));
    assert_eq!(events.try_recv().expect("flushed fragment"), output("partial"));
    assert!(matches!(
        events.try_recv(),
        Ok(SupervisorEvent::StreamFault {
            stream: StreamKind::Stderr,
            ..
        })
    ));
    assert!(matches!(
        events.try_recv(),
        Ok(SupervisorEvent::Terminated { .. })
    ));
}

/// Once the exit is seen the worker no longer accepts commands, even while
/// its streams drain, and the rejection says it exited.
#[cfg(unix)]
#[tokio::test]
async fn send_after_exit_before_drain_is_rejected_as_exited() {
    let (sink, mut events) = mpsc::channel(64);
    let mut config = SupervisorConfig::new(ProtocolVariant::Interpreter, SpawnConfig::new("cat"));
    config.respawn_policy = RespawnPolicy::Fail;
    let mut supervisor = Supervisor::new(config, ActionRouter::new(), sink);
    supervisor.start().await.expect("start");
    let generation = supervisor.generation();
    while events.try_recv().is_ok() {}

    supervisor
        .step(StreamEvent::Exited {
            generation,
            exit_code: Some(0),
            reason: "process exited with code 0".into(),
        })
        .await
        .expect("step");
    assert_eq!(supervisor.state(), WorkerState::Running, "streams still open");

    let result = supervisor.send(&Command::new().with_field("n", 1)).await;

    assert!(
        matches!(result, Err(AppError::WorkerUnavailable(ref msg)) if msg.contains("exited")),
        "got: {result:?}"
    );
}

/// After the worker's stdin is closed, further sends to it fail.
#[cfg(unix)]
#[tokio::test]
async fn send_after_close_input_is_write_error() {
    let (mut supervisor, _events) = supervisor(SpawnConfig::new("sleep").arg("5"));
    supervisor.start().await.expect("start");

    supervisor.close_input();
    let result = supervisor.send(&Command::new().with_field("n", 1)).await;

    assert!(
        matches!(result, Err(AppError::Write(ref msg)) if msg.contains("closed")),
        "got: {result:?}"
    );
}
