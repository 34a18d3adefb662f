//! Validation for the `[server]` section.

use std::collections::HashSet;
use std::net::SocketAddr;

use chorus_common::{validate_id, IdKind};

use super::helpers::validate_range;
use crate::schema::{AuthMode, ChorusConfig};

/// Bind address and hello timeout.
pub(crate) fn validate_listener(errors: &mut Vec<String>, config: &ChorusConfig) {
    if config.server.bind.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "server.bind = {:?} is not a socket address",
            config.server.bind
        ));
    }
    validate_range(
        errors,
        "server.hello_timeout_secs",
        config.server.hello_timeout_secs,
        1,
        120,
    );
}

/// Static token table: non-empty unique tokens, valid unique ids.
pub(crate) fn validate_auth(errors: &mut Vec<String>, config: &ChorusConfig) {
    let auth = &config.server.auth;
    if auth.mode == AuthMode::Trust && !auth.users.is_empty() {
        errors.push("server.auth.users is ignored in trust mode; remove it or use mode = \"static\"".into());
    }

    let mut tokens = HashSet::new();
    let mut ids = HashSet::new();
    for (i, user) in auth.users.iter().enumerate() {
        if user.token.is_empty() {
            errors.push(format!("server.auth.users[{i}].token must not be empty"));
        } else if !tokens.insert(user.token.as_str()) {
            errors.push(format!("server.auth.users[{i}].token is duplicated"));
        }
        if let Err(e) = validate_id(IdKind::Identity, &user.id) {
            errors.push(format!("server.auth.users[{i}].id: {e}"));
        } else if !ids.insert(user.id.as_str()) {
            errors.push(format!("server.auth.users[{i}].id {:?} is duplicated", user.id));
        }
        if user.display_name.trim().is_empty() {
            errors.push(format!("server.auth.users[{i}].display_name must not be empty"));
        }
    }
}

pub(crate) fn validate_rooms(errors: &mut Vec<String>, config: &ChorusConfig) {
    validate_range(
        errors,
        "server.rooms.max_participants",
        config.server.rooms.max_participants,
        0,
        1000,
    );
}

pub(crate) fn validate_messages(errors: &mut Vec<String>, config: &ChorusConfig) {
    validate_range(
        errors,
        "server.messages.max_content_len",
        config.server.messages.max_content_len,
        1,
        100_000,
    );
    validate_range(
        errors,
        "server.messages.history_per_channel",
        config.server.messages.history_per_channel,
        1,
        100_000,
    );
}
