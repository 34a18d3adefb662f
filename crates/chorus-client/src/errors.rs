use std::time::Duration;

/// Failure of a transport operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport closed")]
    Closed,
}

/// Local media could not be captured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device unsupported: {0}")]
    Unsupported(String),
}

/// A peer connection operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer connection failed: {0}")]
    Connection(String),

    #[error("bad signal from {from}: {reason}")]
    BadSignal { from: String, reason: String },
}

/// Everything a caller of the client API can get back as a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The server refused the token. Not retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The connection dropped without the server meaning to close it.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The server closed the connection on purpose. Not retried.
    #[error("closed by server (code {code}): {reason}")]
    ServerClosed { code: u16, reason: String },

    #[error("media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    /// The server answered with a negative acknowledgment.
    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("no acknowledgment after {after:?}")]
    SendTimeout { after: Duration },

    #[error("not connected")]
    NotConnected,

    #[error("client shut down")]
    Shutdown,

    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        Self::TransientNetwork(e.to_string())
    }
}
