//! chorus-client: connection lifecycle, peer-link orchestration, and speaking
//! detection for voice rooms.
//!
//! The [`LifecycleManager`] owns the single server connection. A
//! [`CallSession`] ties it to the [`PeerOrchestrator`] and the
//! [`SpeakingMonitor`] for one room at a time.

pub mod call;
pub mod errors;
pub mod identity;
pub mod lifecycle;
pub mod peers;
pub mod speaking;

pub use call::{CallSession, MediaDevices};
pub use errors::{ClientError, MediaError, PeerError, TransportError};
pub use identity::Identity;
pub use lifecycle::{
    Ack, ClientEvent, ClientHub, ConnectionState, Connector, LifecycleConfig, LifecycleManager,
    TransportLink, WsConnector,
};
pub use peers::{
    IceCandidate, LocalTrack, MediaKind, PeerConnection, PeerFactory, PeerOrchestrator,
    RenderSink, SignalPayload,
};
pub use speaking::{AudioLevelSource, SpeakingDetector, SpeakingMonitor};
