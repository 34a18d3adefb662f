//! Client connection and audio configuration types.

use serde::{Deserialize, Serialize};

/// Reconnect, backoff, and acknowledgment timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u32,
    /// Base reconnect delay; doubles per attempt.
    pub reconnect_delay_ms: u32,
    pub max_reconnect_delay_ms: u32,
    /// Retries after a recoverable loss before giving up.
    pub max_reconnect_attempts: u32,
    pub ack_timeout_ms: u32,
    /// Extra ack wait per retry it took to reach the current connection.
    pub ack_timeout_per_retry_ms: u32,
    pub max_ack_timeout_ms: u32,
    pub heartbeat_interval_secs: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            reconnect_delay_ms: 500,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: 8,
            ack_timeout_ms: 5_000,
            ack_timeout_per_retry_ms: 1_000,
            max_ack_timeout_ms: 15_000,
            heartbeat_interval_secs: 25,
        }
    }
}

/// Speaking detection on the local microphone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakingConfig {
    /// RMS level (0.0 - 1.0) at or above which the user counts as speaking.
    pub threshold: f64,
    /// Exponential smoothing factor in `[0, 1)`. 0 disables smoothing.
    pub smoothing: f64,
    pub poll_interval_ms: u32,
}

impl Default for SpeakingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            smoothing: 0.6,
            poll_interval_ms: 50,
        }
    }
}

/// Client-side settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the presence server.
    pub url: String,
    /// Token presented in the hello frame.
    pub token: String,
    pub connection: ConnectionConfig,
    pub speaking: SpeakingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:7400".into(),
            token: String::new(),
            connection: ConnectionConfig::default(),
            speaking: SpeakingConfig::default(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("connection", &self.connection)
            .field("speaking", &self.speaking)
            .finish()
    }
}
