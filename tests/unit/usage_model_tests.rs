use agent_relay::models::usage::UsageSnapshot;

fn snapshot(requests: Option<i64>, input: Option<i64>, output: Option<i64>, tokens: Option<i64>) -> UsageSnapshot {
    UsageSnapshot {
        provider: "anthropic".into(),
        poll_status_code: 200,
        requests_remaining: requests,
        input_tokens_remaining: input,
        output_tokens_remaining: output,
        tokens_remaining: tokens,
        ..UsageSnapshot::default()
    }
}

#[test]
fn at_limit_flags_zero_remaining() {
    let snap = snapshot(Some(0), Some(100), Some(0), None);
    assert_eq!(snap.kinds_at_limit(), vec!["requests", "output_tokens"]);
}

#[test]
fn at_limit_ignores_missing_values() {
    let snap = snapshot(None, None, None, None);
    assert!(snap.kinds_at_limit().is_empty());
}

#[test]
fn reset_requires_strict_increase() {
    let previous = snapshot(Some(0), Some(50), Some(10), Some(5));
    let current = snapshot(Some(50), Some(50), Some(5), Some(5));
    assert_eq!(current.kinds_reset_since(&previous), vec!["requests"]);
}

#[test]
fn reset_ignores_kinds_missing_on_either_side() {
    let previous = snapshot(Some(0), None, None, None);
    let current = snapshot(None, Some(100), None, None);
    assert!(current.kinds_reset_since(&previous).is_empty());
}
