use std::collections::HashMap;
use std::io::Write;

use agent_relay::config::{load_env_file, Config, ThreadCleanup};

fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn defaults_apply_with_empty_map() {
    let config = Config::from_map(&HashMap::new()).expect("config");
    assert_eq!(config.port, 8080);
    assert_eq!(config.ssh_hosts, vec!["localhost".to_owned()]);
    assert_eq!(config.poll_interval, 30);
    assert!(config.enable_session_poller);
    assert!(!config.enable_usage_poller);
    assert_eq!(config.thread_cleanup, ThreadCleanup::Archive);
    assert_eq!(config.usage_retention_hours, 168);
}

#[test]
fn ssh_hosts_split_and_trim() {
    let config =
        Config::from_map(&map(&[("SSH_HOSTS", "dev-a, dev-b ,,dev-c")])).expect("config");
    assert_eq!(config.ssh_hosts, vec!["dev-a", "dev-b", "dev-c"]);
    assert_eq!(config.default_host(), "dev-a");
}

#[test]
fn flags_accept_true_one_yes() {
    for value in ["true", "1", "yes"] {
        let config =
            Config::from_map(&map(&[("ENABLE_COMMAND_QUEUE", value)])).expect("config");
        assert!(config.enable_command_queue, "{value}");
    }
    let config = Config::from_map(&map(&[("ENABLE_SESSION_POLLER", "false")])).expect("config");
    assert!(!config.enable_session_poller);
}

#[test]
fn bad_numeric_value_is_an_error() {
    assert!(Config::from_map(&map(&[("DASHBOARD_PORT", "not-a-port")])).is_err());
    assert!(Config::from_map(&map(&[("POLL_INTERVAL", "soon")])).is_err());
}

#[test]
fn zero_poll_interval_fails_validation() {
    assert!(Config::from_map(&map(&[("POLL_INTERVAL", "0")])).is_err());
}

#[test]
fn thread_cleanup_delete_recognized() {
    let config = Config::from_map(&map(&[("THREAD_CLEANUP", "DELETE")])).expect("config");
    assert_eq!(config.thread_cleanup, ThreadCleanup::Delete);
    let config = Config::from_map(&map(&[("THREAD_CLEANUP", "bogus")])).expect("config");
    assert_eq!(config.thread_cleanup, ThreadCleanup::Archive);
}

#[test]
fn platform_availability_requires_token_and_channel() {
    let config = Config::from_map(&map(&[("DISCORD_BOT_TOKEN", "t")])).expect("config");
    assert!(!config.has_discord());
    let config = Config::from_map(&map(&[
        ("DISCORD_BOT_TOKEN", "t"),
        ("DISCORD_CHANNEL_ID", "c"),
    ]))
    .expect("config");
    assert!(config.has_discord());
}

#[test]
fn env_file_parses_quotes_and_comments() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        "# comment line\nSLACK_BOT_TOKEN=\"xoxb-123\"\nSSH_HOSTS='dev-a,dev-b'\n\nBROKEN LINE"
    )
    .expect("write");

    let env = load_env_file(file.path().to_str().expect("path")).expect("env");
    assert_eq!(env.get("SLACK_BOT_TOKEN").map(String::as_str), Some("xoxb-123"));
    assert_eq!(env.get("SSH_HOSTS").map(String::as_str), Some("dev-a,dev-b"));
    assert!(!env.contains_key("# comment line"));
}

#[test]
fn missing_env_file_is_an_error() {
    assert!(load_env_file("/nonexistent/.notify-env").is_err());
}
