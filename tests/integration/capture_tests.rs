//! Background capture behaviour with a scripted pane. Paused-time tests
//! let the settle and polling sleeps elapse instantly.

use std::sync::Arc;

use agent_relay::bridge::capture::capture_shell_output;
use agent_relay::services::session::SessionService;

use super::test_helpers::MockRunner;

fn service(runner: &Arc<MockRunner>) -> SessionService {
    let runner: Arc<dyn agent_relay::remote::RemoteRunner> = runner.clone();
    SessionService::new(runner, vec!["testhost".to_owned()])
}

#[tokio::test(start_paused = true)]
async fn capture_abandons_when_foreground_is_an_agent() {
    let runner = MockRunner::new();
    runner.respond("pane_current_command", 0, "claude");
    runner.respond("capture-pane", 0, "$ claude\nWelcome to Claude");
    let sessions = service(&runner);

    let output = capture_shell_output(&sessions, "testhost", "demo", "$ ").await;
    assert!(output.is_none());

    // No pane polling happened after the foreground check.
    assert!(!runner
        .commands()
        .iter()
        .any(|cmd| cmd.contains("capture-pane")));
}

#[tokio::test(start_paused = true)]
async fn capture_returns_stable_diffed_output() {
    let runner = MockRunner::new();
    runner.respond("pane_current_command", 0, "bash");
    runner.respond("capture-pane", 0, "$ ls\nfile-a\nfile-b\n$");
    let sessions = service(&runner);

    let output = capture_shell_output(&sessions, "testhost", "demo", "$ ls").await;
    let output = output.expect("captured output");
    assert!(output.contains("file-a"));
    assert!(output.contains("file-b"));
    assert!(!output.contains("$ ls"), "common prefix must be dropped");
}

#[tokio::test(start_paused = true)]
async fn capture_abandons_when_shell_morphs_into_agent() {
    let runner = MockRunner::new();
    // First foreground check says bash; once polling starts the pane
    // reports an agent. The mock's first matching pattern wins, so
    // flip the scripted response between phases via clear.
    runner.respond("pane_current_command", 0, "bash");
    runner.respond("capture-pane", 0, "$ claude\nstarting...");
    let sessions = service(&runner);

    let handle = tokio::spawn({
        let sessions = sessions.clone();
        async move { capture_shell_output(&sessions, "testhost", "demo", "$").await }
    });

    // Let the settle sleep and first poll run, then morph the pane.
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    runner.clear_responses();
    runner.respond("pane_current_command", 0, "claude");
    runner.respond("capture-pane", 0, "$ claude\nstarting...");

    let output = handle.await.expect("join");
    assert!(output.is_none());
}

#[tokio::test(start_paused = true)]
async fn capture_redacts_secrets_in_output() {
    let runner = MockRunner::new();
    runner.respond("pane_current_command", 0, "zsh");
    runner.respond("capture-pane", 0, "$ env\nAPI_TOKEN=sk-secret-value\nHOME=/root");
    let sessions = service(&runner);

    let output = capture_shell_output(&sessions, "testhost", "demo", "$ env")
        .await
        .expect("captured");
    assert!(!output.contains("sk-secret-value"));
    assert!(output.contains("HOME=/root"));
}
