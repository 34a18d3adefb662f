//! Peer-connection orchestration for voice rooms.
//!
//! The orchestrator owns one link per remote participant and reconciles
//! that set against each room roster. Offers, answers and candidates leave
//! through a [`SignalOutbox`] that the call session relays to the server.

mod orchestrator;
mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use orchestrator::PeerOrchestrator;
pub use types::{
    IceCandidate, LocalTrack, MediaKind, OutgoingSignal, PeerConnection, PeerFactory, RenderSink,
    SignalOutbox, SignalPayload, TrackSlot,
};
