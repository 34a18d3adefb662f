//! Configuration, state, event, and command types for the lifecycle manager.

use std::time::Duration;

use chorus_common::{ChatRecord, ClientOp, Participant, PublicIdentity, SessionId};
use chorus_config::ConnectionConfig;
use tokio::sync::oneshot;

use crate::errors::ClientError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub ack_timeout: Duration,
    pub ack_timeout_per_retry: Duration,
    pub max_ack_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for LifecycleConfig {
    fn from(c: &ConnectionConfig) -> Self {
        let ms = |v: u32| Duration::from_millis(u64::from(v));
        let secs = |v: u32| Duration::from_secs(u64::from(v));
        Self {
            connect_timeout: secs(c.connect_timeout_secs),
            reconnect_delay: ms(c.reconnect_delay_ms),
            max_reconnect_delay: ms(c.max_reconnect_delay_ms),
            max_reconnect_attempts: c.max_reconnect_attempts,
            ack_timeout: ms(c.ack_timeout_ms),
            ack_timeout_per_retry: ms(c.ack_timeout_per_retry_ms),
            max_ack_timeout: ms(c.max_ack_timeout_ms),
            heartbeat_interval: secs(c.heartbeat_interval_secs),
        }
    }
}

impl LifecycleConfig {
    /// Ack wait for an op, stretched by the retries the current connection
    /// took to establish.
    pub fn ack_timeout(&self, recent_retries: u32) -> Duration {
        self.ack_timeout
            .saturating_add(self.ack_timeout_per_retry.saturating_mul(recent_retries))
            .min(self.max_ack_timeout)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Why a connection (or connection attempt) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossKind {
    /// Timeout, transport error, or a close the server did not intend.
    Recoverable(String),
    /// The server closed us on purpose, or refused the token.
    Unrecoverable(ClientError),
}

impl LossKind {
    pub fn to_error(&self) -> ClientError {
        match self {
            Self::Recoverable(reason) => ClientError::TransientNetwork(reason.clone()),
            Self::Unrecoverable(e) => e.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Positive acknowledgment of an op.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub id: u64,
    pub data: Option<serde_json::Value>,
}

/// Events pushed to subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Handshake completed.
    Connected {
        session_id: SessionId,
        identity: PublicIdentity,
    },
    /// The connection ended; `error` says why.
    Lost { error: ClientError },
    CommunityRoster {
        community_id: String,
        members: Vec<PublicIdentity>,
    },
    RoomRoster {
        room_id: String,
        participants: Vec<Participant>,
    },
    Signal {
        from: String,
        payload: serde_json::Value,
    },
    Message(ChatRecord),
    ServerError(String),
}

#[derive(Debug)]
pub(crate) enum Command {
    Send {
        op: ClientOp,
        reply: oneshot::Sender<Result<Ack, ClientError>>,
    },
    ForceReconnect,
    Close {
        done: oneshot::Sender<()>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_converts_units() {
        let config = LifecycleConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.max_reconnect_attempts, 8);
    }

    #[test]
    fn ack_timeout_grows_then_caps() {
        let config = LifecycleConfig::default();
        assert_eq!(config.ack_timeout(0), Duration::from_secs(5));
        assert_eq!(config.ack_timeout(3), Duration::from_secs(8));
        assert_eq!(config.ack_timeout(50), Duration::from_secs(15));
    }

    #[test]
    fn loss_kind_maps_to_client_error() {
        let loss = LossKind::Recoverable("reset".into());
        assert_eq!(loss.to_error(), ClientError::TransientNetwork("reset".into()));

        let loss = LossKind::Unrecoverable(ClientError::Authentication("bad token".into()));
        assert!(matches!(loss.to_error(), ClientError::Authentication(_)));
    }
}
