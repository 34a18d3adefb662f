//! Signaling payloads and the seams to the platform's media stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::PeerError;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// ICE candidate as exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// What peers put inside `signal.relay` payloads. The server never parses
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
}

impl SignalPayload {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A payload addressed to a remote identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSignal {
    pub to: String,
    pub payload: SignalPayload,
}

pub type SignalOutbox = mpsc::UnboundedSender<OutgoingSignal>;

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Camera,
    Screen,
}

/// Outgoing sender slot a track occupies. Camera and screen share the video
/// slot, so swapping one for the other is a track replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSlot {
    Audio,
    Video,
}

impl MediaKind {
    pub fn slot(self) -> TrackSlot {
        match self {
            Self::Audio => TrackSlot::Audio,
            Self::Camera | Self::Screen => TrackSlot::Video,
        }
    }
}

/// Handle to a captured local track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Platform seams
// ---------------------------------------------------------------------------

/// One negotiated connection to a remote participant.
///
/// `close` is synchronous: after it returns the connection sends and
/// receives nothing.
#[async_trait]
pub trait PeerConnection: Send {
    /// Create and apply a local offer; returns its SDP.
    async fn create_offer(&mut self) -> Result<String, PeerError>;

    /// Apply a remote offer, create and apply the answer; returns its SDP.
    async fn accept_offer(&mut self, sdp: &str) -> Result<String, PeerError>;

    async fn accept_answer(&mut self, sdp: &str) -> Result<(), PeerError>;

    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), PeerError>;

    /// Put `track` on the slot's sender, or clear it.
    fn set_track(&mut self, slot: TrackSlot, track: Option<&LocalTrack>);

    fn close(&mut self);
}

/// Where a remote participant's media is rendered.
pub trait RenderSink: Send {
    fn release(&mut self);
}

/// Builds connections and sinks for remote participants.
///
/// Connections report their own ICE candidates by sending
/// `OutgoingSignal`s on the outbox they are given.
pub trait PeerFactory: Send + Sync {
    fn connect(&self, remote_id: &str, outbox: SignalOutbox)
        -> Result<Box<dyn PeerConnection>, PeerError>;

    fn render_sink(&self, remote_id: &str) -> Box<dyn RenderSink>;
}
