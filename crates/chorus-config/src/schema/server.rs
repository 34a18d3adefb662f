//! Presence server configuration types.

use serde::{Deserialize, Serialize};

/// How hello tokens are turned into identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Tokens must match an entry in `users`.
    #[default]
    Static,
    /// Development only: the token is `id` or `id:display name`.
    Trust,
}

/// One entry of the static token table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticUser {
    pub token: String,
    pub id: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

/// Identity claims lookup settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub users: Vec<StaticUser>,
}

/// Signaling relay behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayPolicyConfig {
    /// Reject `signal.relay` when the target has no live session instead of
    /// dropping it silently.
    pub report_absent_target: bool,
}

/// Voice room behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Reject `room.statusUpdate` for an unknown room or non-participant
    /// instead of ignoring it.
    pub report_missing_status_target: bool,
    /// Maximum participants per room. 0 means unlimited.
    pub max_participants: u32,
}

/// Chat message fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Maximum message length in characters.
    pub max_content_len: u32,
    /// Messages retained per channel by the in-memory store.
    pub history_per_channel: u32,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_content_len: 4000,
            history_per_channel: 500,
        }
    }
}

/// Presence server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
    /// Seconds a new connection has to send its hello frame.
    pub hello_timeout_secs: u32,
    pub auth: AuthConfig,
    pub relay: RelayPolicyConfig,
    pub rooms: RoomsConfig,
    pub messages: MessagesConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7400".into(),
            hello_timeout_secs: 10,
            auth: AuthConfig::default(),
            relay: RelayPolicyConfig::default(),
            rooms: RoomsConfig::default(),
            messages: MessagesConfig::default(),
        }
    }
}
