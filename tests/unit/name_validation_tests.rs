use agent_relay::models::session::is_valid_session_name;

#[test]
fn accepts_alphanumeric_dash_underscore() {
    assert!(is_valid_session_name("fix-auth"));
    assert!(is_valid_session_name("demo_2"));
    assert!(is_valid_session_name("A1-b2_C3"));
}

#[test]
fn rejects_empty_name() {
    assert!(!is_valid_session_name(""));
}

#[test]
fn rejects_shell_metacharacters() {
    assert!(!is_valid_session_name("demo;rm -rf"));
    assert!(!is_valid_session_name("demo session"));
    assert!(!is_valid_session_name("demo$(id)"));
    assert!(!is_valid_session_name("demo/../etc"));
}

#[test]
fn rejects_names_over_64_bytes() {
    let name = "a".repeat(64);
    assert!(is_valid_session_name(&name));
    let name = "a".repeat(65);
    assert!(!is_valid_session_name(&name));
}

#[test]
fn rejects_non_ascii() {
    assert!(!is_valid_session_name("démo"));
}
