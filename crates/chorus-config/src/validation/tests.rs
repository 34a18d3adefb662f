//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

fn user(token: &str, id: &str) -> StaticUser {
    StaticUser {
        token: token.into(),
        id: id.into(),
        display_name: id.to_uppercase(),
        avatar: None,
    }
}

#[test]
fn default_config_validates() {
    let config = ChorusConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_unparseable_bind() {
    let mut config = ChorusConfig::default();
    config.server.bind = "localhost".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.bind"));
}

#[test]
fn catches_zero_hello_timeout() {
    let mut config = ChorusConfig::default();
    config.server.hello_timeout_secs = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.hello_timeout_secs"));
}

#[test]
fn catches_duplicate_tokens_and_ids() {
    let mut config = ChorusConfig::default();
    config.server.auth.users = vec![user("t1", "alice"), user("t1", "alice")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("users[1].token is duplicated"));
    assert!(err.contains("users[1].id"));
}

#[test]
fn catches_invalid_user_id() {
    let mut config = ChorusConfig::default();
    config.server.auth.users = vec![user("t1", "not valid")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("users[0].id"));
}

#[test]
fn catches_users_in_trust_mode() {
    let mut config = ChorusConfig::default();
    config.server.auth.mode = AuthMode::Trust;
    config.server.auth.users = vec![user("t1", "alice")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("trust mode"));
}

#[test]
fn catches_zero_content_len() {
    let mut config = ChorusConfig::default();
    config.server.messages.max_content_len = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.messages.max_content_len"));
}

#[test]
fn catches_non_websocket_url() {
    let mut config = ChorusConfig::default();
    config.client.url = "http://example.com".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("client.url"));
}

#[test]
fn catches_cap_below_base_delay() {
    let mut config = ChorusConfig::default();
    config.client.connection.reconnect_delay_ms = 2_000;
    config.client.connection.max_reconnect_delay_ms = 1_000;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("max_reconnect_delay_ms"));
}

#[test]
fn catches_ack_cap_below_base() {
    let mut config = ChorusConfig::default();
    config.client.connection.max_ack_timeout_ms = 100;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("max_ack_timeout_ms"));
}

#[test]
fn catches_threshold_out_of_range() {
    let mut config = ChorusConfig::default();
    config.client.speaking.threshold = 1.5;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("client.speaking.threshold"));
}

#[test]
fn catches_empty_log_level() {
    let mut config = ChorusConfig::default();
    config.logging.level = "  ".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("logging.level"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = ChorusConfig::default();
    config.server.hello_timeout_secs = 0;
    config.client.speaking.poll_interval_ms = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.hello_timeout_secs"));
    assert!(err.contains("client.speaking.poll_interval_ms"));
    assert!(err.contains("; "));
}
