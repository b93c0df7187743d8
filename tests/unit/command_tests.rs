use std::collections::{BTreeMap, HashSet};

use agent_relay::bridge::command::{
    format_sessions_report, send_failure_message, BridgeCommand,
};

#[test]
fn parses_new_with_optional_host_and_cwd() {
    assert_eq!(
        BridgeCommand::parse("!new demo"),
        Some(BridgeCommand::New {
            name: "demo".into(),
            host: None,
            working_dir: None,
        })
    );
    assert_eq!(
        BridgeCommand::parse("!new demo dev-box /srv/app"),
        Some(BridgeCommand::New {
            name: "demo".into(),
            host: Some("dev-box".into()),
            working_dir: Some("/srv/app".into()),
        })
    );
}

#[test]
fn parses_kill_and_sessions_aliases() {
    assert_eq!(
        BridgeCommand::parse("!kill demo"),
        Some(BridgeCommand::Kill { name: "demo".into() })
    );
    assert_eq!(BridgeCommand::parse("!sessions"), Some(BridgeCommand::Sessions));
    assert_eq!(BridgeCommand::parse("!ls"), Some(BridgeCommand::Sessions));
}

#[test]
fn parses_queue_subcommands() {
    assert_eq!(BridgeCommand::parse("!queue"), Some(BridgeCommand::QueueList));
    assert_eq!(
        BridgeCommand::parse("!queue execute"),
        Some(BridgeCommand::QueueExecute)
    );
    assert_eq!(
        BridgeCommand::parse("!queue add demo retry the build"),
        Some(BridgeCommand::QueueAdd {
            name: "demo".into(),
            command: "retry the build".into(),
        })
    );
}

#[test]
fn missing_arguments_yield_unknown() {
    assert_eq!(BridgeCommand::parse("!new"), Some(BridgeCommand::Unknown));
    assert_eq!(BridgeCommand::parse("!kill"), Some(BridgeCommand::Unknown));
    assert_eq!(BridgeCommand::parse("!queue add demo"), Some(BridgeCommand::Unknown));
    assert_eq!(BridgeCommand::parse("!bogus"), Some(BridgeCommand::Unknown));
}

#[test]
fn whitespace_runs_collapse_between_tokens() {
    assert_eq!(
        BridgeCommand::parse("!new   demo    dev-box"),
        Some(BridgeCommand::New {
            name: "demo".into(),
            host: Some("dev-box".into()),
            working_dir: None,
        })
    );
}

#[test]
fn non_commands_are_none() {
    assert_eq!(BridgeCommand::parse("hello there"), None);
    assert_eq!(BridgeCommand::parse(""), None);
}

#[test]
fn report_classifies_synced_and_orphans() {
    let mut tmux = BTreeMap::new();
    tmux.insert("both".to_owned(), "host-a".to_owned());
    tmux.insert("tmux-only".to_owned(), "host-b".to_owned());
    let mut threads = HashSet::new();
    threads.insert("both".to_owned());
    threads.insert("thread-only".to_owned());

    let report = format_sessions_report(&tmux, &threads);
    assert!(report.contains("both"));
    assert!(report.contains("synced"));
    assert!(report.contains("no thread"));
    assert!(report.contains("orphan thread"));
}

#[test]
fn report_handles_empty_state() {
    assert_eq!(
        format_sessions_report(&BTreeMap::new(), &HashSet::new()),
        "No sessions found."
    );
}

#[test]
fn failure_message_names_session_and_host() {
    let message = send_failure_message("demo", "dev-box");
    assert_eq!(
        message,
        "Failed to send to `demo` on `dev-box`. The session may have exited."
    );
}
