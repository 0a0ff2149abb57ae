//! Integration tests for the `worker-bridge` binary.
//!
//! Runs the built binary with a temporary config, feeds NDJSON on its stdin
//! and checks the event lines it prints on stdout.

#![cfg(unix)]

use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

const RUN_TIMEOUT: Duration = Duration::from_secs(20);

fn config_file(worker_command: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    writeln!(file, "[worker]\ncommand = \"{worker_command}\"").expect("write config");
    file
}

/// Run the binary to completion and parse every stdout line as JSON.
async fn run_bridge(config: &tempfile::NamedTempFile, extra: &[&str], input: &str) -> Vec<Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_worker-bridge"))
        .arg("--config")
        .arg(config.path())
        .args(extra)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn worker-bridge");

    let mut stdin = child.stdin.take().expect("stdin piped");
    stdin.write_all(input.as_bytes()).await.expect("write input");
    drop(stdin);

    let output = timeout(RUN_TIMEOUT, child.wait_with_output())
        .await
        .expect("worker-bridge exits")
        .expect("collect output");
    assert!(output.status.success(), "exit status: {:?}", output.status);

    String::from_utf8(output.stdout)
        .expect("utf-8 stdout")
        .lines()
        .map(|line| serde_json::from_str(line).expect("event line is JSON"))
        .collect()
}

fn event_names(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .map(|event| event["event"].as_str().expect("tagged event"))
        .collect()
}

/// Input is echoed back through `cat`, and end of input ends the run.
#[tokio::test]
async fn relays_worker_output_and_exits_at_end_of_input() {
    let config = config_file("cat");

    let events = run_bridge(&config, &[], "{\"n\":1}\n").await;

    assert_eq!(event_names(&events), vec!["spawned", "message", "terminated"]);
    assert_eq!(events[1]["stream"], "stdout");
    assert_eq!(events[1]["message"]["kind"], "output");
    assert_eq!(events[1]["message"]["payload"], "{\"n\":1}");
    assert_eq!(events[2]["exit_code"], 0);
}

/// A failed launch on the first command is printed as an event.
#[tokio::test]
async fn spawn_failure_on_first_command_is_printed() {
    let config = config_file("/nonexistent/worker-bridge-test-binary");

    let events = run_bridge(&config, &[], "{\"a\":1}\n").await;

    assert_eq!(event_names(&events), vec!["spawn_failed"]);
}

/// A failed launch requested by `--start` is printed too, and the run
/// carries on with its input.
#[tokio::test]
async fn spawn_failure_at_start_is_printed() {
    let config = config_file("/nonexistent/worker-bridge-test-binary");

    let events = run_bridge(&config, &["--start"], "{\"a\":1}\n").await;

    assert_eq!(event_names(&events), vec!["spawn_failed", "spawn_failed"]);
    assert!(events[0]["reason"]
        .as_str()
        .expect("reason")
        .contains("failed to spawn worker"));
}
