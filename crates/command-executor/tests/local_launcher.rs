//! Integration tests for the local launcher

use command_executor::{Command, Error, Launcher, LocalLauncher, LogSource, ProcessHandle};
use futures::StreamExt;
use std::time::Duration;

#[smol_potat::test]
async fn test_launch_streams_output_lines() {
    let mut command = Command::new("echo");
    command.arg("hello world");

    let (mut events, mut handle) = LocalLauncher.launch(command).await.unwrap();

    let mut lines = Vec::new();
    while let Some(event) = events.next().await {
        if let Some((source, line)) = event.line() {
            lines.push((source, line.to_string()));
        }
    }

    let status = handle.wait().await.unwrap();
    assert!(status.success());
    assert_eq!(lines, vec![(LogSource::Stdout, "hello world".to_string())]);
}

#[smol_potat::test]
async fn test_execute_captures_stdout_and_stderr() {
    let command = Command::shell("sh", "echo out; echo err >&2");

    let result = LocalLauncher.execute(command).await.unwrap();

    assert!(result.success());
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert!(result.output.contains("out\n"));
    assert!(result.output.contains("err\n"));
}

#[smol_potat::test]
async fn test_execute_reports_exit_code() {
    let command = Command::shell("sh", "exit 3");

    let result = LocalLauncher.execute(command).await.unwrap();

    assert!(!result.success());
    assert_eq!(result.status.code, Some(3));
}

#[smol_potat::test]
async fn test_execute_passes_env_and_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let mut command = Command::shell("sh", "cat marker.txt; echo \" $GREETING\"");
    command.current_dir(dir.path()).env("GREETING", "hi");

    let result = LocalLauncher.execute(command).await.unwrap();

    assert!(result.success());
    assert_eq!(result.stdout, "present hi\n");
}

#[smol_potat::test]
async fn test_execute_with_sees_every_line() {
    let command = Command::shell("sh", "echo one; echo two");
    let mut seen = Vec::new();

    let result = LocalLauncher
        .execute_with(command, |_, line| seen.push(line.to_string()))
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
}

#[smol_potat::test]
async fn test_missing_program_is_spawn_error() {
    let command = Command::new("definitely-not-a-real-program-xyz");

    let err = LocalLauncher.execute(command).await.unwrap_err();

    match err {
        Error::SpawnFailed { program, .. } => {
            assert_eq!(program, "definitely-not-a-real-program-xyz");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[cfg(unix)]
#[smol_potat::test]
async fn test_terminate_stops_long_running_process() {
    let mut command = Command::new("sleep");
    command.arg("30");

    let (_events, mut handle) = LocalLauncher.launch(command).await.unwrap();
    smol::Timer::after(Duration::from_millis(50)).await;
    handle.terminate().await.unwrap();

    let status = handle.wait().await.unwrap();
    assert!(status.terminated_by_signal());
    assert!(!status.success());
}
