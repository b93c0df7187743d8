use agent_relay::models::message::MessageSource;
use agent_relay::services::message::{dedup_hash, line_hash};

#[test]
fn source_id_key_ignores_session_and_content() {
    let a = dedup_hash("session-a", MessageSource::Discord, Some("111"), "hello");
    let b = dedup_hash("session-b", MessageSource::Discord, Some("111"), "different");
    assert_eq!(a, b);
}

#[test]
fn source_id_key_distinguishes_sources() {
    let discord = dedup_hash("s", MessageSource::Discord, Some("111"), "x");
    let slack = dedup_hash("s", MessageSource::Slack, Some("111"), "x");
    assert_ne!(discord, slack);
}

#[test]
fn content_key_uses_session_source_and_prefix() {
    let a = dedup_hash("s", MessageSource::Hook, None, "hello");
    let b = dedup_hash("s", MessageSource::Hook, None, "hello");
    let c = dedup_hash("other", MessageSource::Hook, None, "hello");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn content_key_only_considers_first_200_bytes() {
    let prefix = "x".repeat(200);
    let a = dedup_hash("s", MessageSource::Hook, None, &format!("{prefix}AAA"));
    let b = dedup_hash("s", MessageSource::Hook, None, &format!("{prefix}BBB"));
    assert_eq!(a, b);

    let short_a = dedup_hash("s", MessageSource::Hook, None, "aaa");
    let short_b = dedup_hash("s", MessageSource::Hook, None, "bbb");
    assert_ne!(short_a, short_b);
}

#[test]
fn empty_source_id_falls_back_to_content_key() {
    let with_empty = dedup_hash("s", MessageSource::Hook, Some(""), "hello");
    let without = dedup_hash("s", MessageSource::Hook, None, "hello");
    assert_eq!(with_empty, without);
}

#[test]
fn line_hash_is_stable_32_hex() {
    let hash = line_hash("{\"type\":\"user\"}");
    assert_eq!(hash.len(), 32);
    assert_eq!(hash, line_hash("{\"type\":\"user\"}"));
    assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
}
