//! Validation for the `[client]` section.

use super::helpers::{validate_at_least, validate_range, validate_range_f64};
use crate::schema::ChorusConfig;

/// Connection timing: ranges plus base <= cap orderings.
pub(crate) fn validate_connection(errors: &mut Vec<String>, config: &ChorusConfig) {
    let conn = &config.client.connection;

    if !(config.client.url.starts_with("ws://") || config.client.url.starts_with("wss://")) {
        errors.push(format!(
            "client.url = {:?} must start with ws:// or wss://",
            config.client.url
        ));
    }

    validate_range(
        errors,
        "client.connection.connect_timeout_secs",
        conn.connect_timeout_secs,
        1,
        120,
    );
    validate_range(
        errors,
        "client.connection.reconnect_delay_ms",
        conn.reconnect_delay_ms,
        10,
        60_000,
    );
    validate_at_least(
        errors,
        "client.connection.max_reconnect_delay_ms",
        conn.max_reconnect_delay_ms,
        "reconnect_delay_ms",
        conn.reconnect_delay_ms,
    );
    validate_range(
        errors,
        "client.connection.max_reconnect_attempts",
        conn.max_reconnect_attempts,
        0,
        100,
    );
    validate_range(
        errors,
        "client.connection.ack_timeout_ms",
        conn.ack_timeout_ms,
        100,
        120_000,
    );
    validate_at_least(
        errors,
        "client.connection.max_ack_timeout_ms",
        conn.max_ack_timeout_ms,
        "ack_timeout_ms",
        conn.ack_timeout_ms,
    );
    validate_range(
        errors,
        "client.connection.heartbeat_interval_secs",
        conn.heartbeat_interval_secs,
        1,
        300,
    );
}

pub(crate) fn validate_speaking(errors: &mut Vec<String>, config: &ChorusConfig) {
    let speaking = &config.client.speaking;
    validate_range_f64(
        errors,
        "client.speaking.threshold",
        speaking.threshold,
        0.0,
        1.0,
    );
    // 1.0 would freeze the smoothed level forever.
    validate_range_f64(
        errors,
        "client.speaking.smoothing",
        speaking.smoothing,
        0.0,
        0.99,
    );
    validate_range(
        errors,
        "client.speaking.poll_interval_ms",
        speaking.poll_interval_ms,
        10,
        1000,
    );
}
