use agent_relay::services::platform::ThreadNameFormat;

fn format() -> ThreadNameFormat {
    ThreadNameFormat::new("[agent] {session} - {host}").expect("valid template")
}

#[test]
fn renders_session_and_host() {
    assert_eq!(format().render("demo", "dev-box"), "[agent] demo - dev-box");
}

#[test]
fn parses_rendered_names_back() {
    let fmt = format();
    assert_eq!(fmt.parse("[agent] demo - dev-box").as_deref(), Some("demo"));
    assert_eq!(
        fmt.parse("[agent] fix_auth-2 - host.example").as_deref(),
        Some("fix_auth-2")
    );
}

#[test]
fn accepts_legacy_prefix_only_variant() {
    assert_eq!(format().parse("[agent] demo").as_deref(), Some("demo"));
}

#[test]
fn rejects_unrelated_names() {
    let fmt = format();
    assert_eq!(fmt.parse("general chat"), None);
    assert_eq!(fmt.parse("[other] demo - host"), None);
}

#[test]
fn custom_templates_parse() {
    let fmt = ThreadNameFormat::new("agent/{session}@{host}").expect("valid");
    assert_eq!(fmt.render("demo", "h1"), "agent/demo@h1");
    assert_eq!(fmt.parse("agent/demo@h1").as_deref(), Some("demo"));
}
