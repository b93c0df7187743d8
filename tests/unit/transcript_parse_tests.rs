use agent_relay::services::message::{parse_slack_ts, parse_transcript_line};
use agent_relay::services::transcript::sanitize_working_dir;
use agent_relay::models::message::MessageRole;

#[test]
fn user_string_content() {
    let line = r#"{"type":"user","message":{"role":"user","content":"hello there"}}"#;
    let entry = parse_transcript_line(line, 5000).expect("entry");
    assert_eq!(entry.role, MessageRole::User);
    assert_eq!(entry.content, "hello there");
}

#[test]
fn user_block_list_content() {
    let line = r#"{"type":"user","message":{"content":[{"type":"text","text":"part one"},"bare part"]}}"#;
    let entry = parse_transcript_line(line, 5000).expect("entry");
    assert_eq!(entry.content, "part one\nbare part");
}

#[test]
fn assistant_keeps_only_text_blocks() {
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"text","text":"visible"},
        {"type":"tool_use","name":"bash","input":{"cmd":"ls"}},
        {"type":"tool_result","content":"hidden"},
        {"type":"text","text":"also visible"}
    ]}}"#;
    let entry = parse_transcript_line(line, 5000).expect("entry");
    assert_eq!(entry.role, MessageRole::Assistant);
    assert_eq!(entry.content, "visible\nalso visible");
}

#[test]
fn tool_result_and_system_lines_are_skipped() {
    assert!(parse_transcript_line(r#"{"type":"tool_result","content":"x"}"#, 5000).is_none());
    assert!(parse_transcript_line(r#"{"type":"system","message":{"content":"x"}}"#, 5000).is_none());
    assert!(parse_transcript_line("not json at all", 5000).is_none());
}

#[test]
fn empty_content_is_skipped() {
    let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"bash"}]}}"#;
    assert!(parse_transcript_line(line, 5000).is_none());
}

#[test]
fn long_content_is_truncated_with_marker() {
    let text = "z".repeat(6000);
    let line = format!(r#"{{"type":"user","message":{{"content":"{text}"}}}}"#);
    let entry = parse_transcript_line(&line, 5000).expect("entry");
    assert!(entry.content.ends_with("...(truncated)"));
    assert!(entry.content.len() < 5100);
}

#[test]
fn timestamp_prefers_iso_field() {
    let line = r#"{"type":"user","timestamp":"2026-02-13T10:30:00Z","message":{"content":"hi"}}"#;
    let entry = parse_transcript_line(line, 5000).expect("entry");
    let ts = entry.timestamp.expect("timestamp");
    assert_eq!(ts.to_rfc3339(), "2026-02-13T10:30:00+00:00");
}

#[test]
fn timestamp_falls_back_to_millis_field() {
    let line = r#"{"type":"user","costInMillis":1700000000000,"message":{"content":"hi"}}"#;
    let entry = parse_transcript_line(line, 5000).expect("entry");
    assert!(entry.timestamp.is_some());
}

#[test]
fn missing_timestamp_is_none() {
    let line = r#"{"type":"user","message":{"content":"hi"}}"#;
    let entry = parse_transcript_line(line, 5000).expect("entry");
    assert!(entry.timestamp.is_none());
}

#[test]
fn slack_ts_parses_unix_float() {
    let ts = parse_slack_ts("1726000000.000100").expect("ts");
    assert_eq!(ts.timestamp(), 1_726_000_000);
    assert!(parse_slack_ts("not-a-ts").is_none());
}

#[test]
fn working_dir_sanitisation_replaces_slashes() {
    assert_eq!(sanitize_working_dir("/home/user/project"), "home-user-project");
    assert_eq!(sanitize_working_dir("relative/dir"), "relative-dir");
}
