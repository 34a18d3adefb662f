//! Keeps the set of peer links in step with the room roster.

use std::collections::HashMap;
use std::sync::Arc;

use chorus_common::Participant;
use tracing::{debug, info, warn};

use super::types::{
    IceCandidate, LocalTrack, MediaKind, OutgoingSignal, PeerConnection, PeerFactory, RenderSink,
    SignalOutbox, SignalPayload, TrackSlot,
};
use crate::errors::PeerError;

struct PeerLink {
    conn: Box<dyn PeerConnection>,
    sink: Box<dyn RenderSink>,
    has_remote_description: bool,
    /// Candidates that arrived before the remote description.
    queued: Vec<IceCandidate>,
}

impl PeerLink {
    async fn apply_queued(&mut self) -> Result<(), PeerError> {
        for candidate in std::mem::take(&mut self.queued) {
            self.conn.add_candidate(&candidate).await?;
        }
        Ok(())
    }

    fn teardown(mut self) {
        self.conn.close();
        self.sink.release();
    }
}

/// Owns one [`PeerLink`] per remote participant.
pub struct PeerOrchestrator {
    factory: Arc<dyn PeerFactory>,
    outbox: SignalOutbox,
    links: HashMap<String, PeerLink>,
    tracks: HashMap<TrackSlot, LocalTrack>,
}

impl PeerOrchestrator {
    pub fn new(factory: Arc<dyn PeerFactory>, outbox: SignalOutbox) -> Self {
        Self {
            factory,
            outbox,
            links: HashMap::new(),
            tracks: HashMap::new(),
        }
    }

    pub fn remote_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Create and destroy links so there is exactly one per roster
    /// participant other than `local_id`. If `local_id` is not in the
    /// roster every link is closed.
    ///
    /// A link that fails to set up is skipped; the first such error is
    /// returned after the rest of the roster has been processed.
    pub async fn reconcile(
        &mut self,
        local_id: &str,
        roster: &[Participant],
    ) -> Result<(), PeerError> {
        let Some(local) = roster.iter().find(|p| p.identity_id == local_id) else {
            self.close_all();
            return Ok(());
        };

        let stale: Vec<String> = self
            .links
            .keys()
            .filter(|id| !roster.iter().any(|p| &p.identity_id == *id) || *id == local_id)
            .cloned()
            .collect();
        for id in stale {
            if let Some(link) = self.links.remove(&id) {
                info!(peer = %id, "Closing peer link");
                link.teardown();
            }
        }

        let mut first_error = None;
        for remote in roster.iter().filter(|p| p.identity_id != local_id) {
            if self.links.contains_key(&remote.identity_id) {
                continue;
            }
            let initiator = initiates(local, remote);
            if let Err(e) = self.open_link(&remote.identity_id, initiator).await {
                warn!(peer = %remote.identity_id, error = %e, "Peer link setup failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn open_link(&mut self, remote_id: &str, initiator: bool) -> Result<(), PeerError> {
        let mut conn = self.factory.connect(remote_id, self.outbox.clone())?;
        for (slot, track) in &self.tracks {
            conn.set_track(*slot, Some(track));
        }

        let offer = if initiator {
            match conn.create_offer().await {
                Ok(sdp) => Some(sdp),
                Err(e) => {
                    conn.close();
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(peer = %remote_id, initiator, "Opened peer link");
        self.links.insert(
            remote_id.to_string(),
            PeerLink {
                conn,
                sink: self.factory.render_sink(remote_id),
                has_remote_description: false,
                queued: Vec::new(),
            },
        );
        if let Some(sdp) = offer {
            self.emit(remote_id, SignalPayload::Offer { sdp });
        }
        Ok(())
    }

    /// Apply a payload relayed from `from`.
    pub async fn handle_signal(
        &mut self,
        from: &str,
        payload: serde_json::Value,
    ) -> Result<(), PeerError> {
        let payload: SignalPayload =
            serde_json::from_value(payload).map_err(|e| PeerError::BadSignal {
                from: from.to_string(),
                reason: e.to_string(),
            })?;

        if !self.links.contains_key(from) {
            match payload {
                // The offer can beat our copy of the roster.
                SignalPayload::Offer { .. } => self.open_link(from, false).await?,
                _ => {
                    debug!(peer = %from, "Signal for unknown peer dropped");
                    return Err(PeerError::BadSignal {
                        from: from.to_string(),
                        reason: "no link to this peer".into(),
                    });
                }
            }
        }
        let Some(link) = self.links.get_mut(from) else {
            return Ok(());
        };

        match payload {
            SignalPayload::Offer { sdp } => {
                let answer = link.conn.accept_offer(&sdp).await?;
                link.has_remote_description = true;
                link.apply_queued().await?;
                self.emit(from, SignalPayload::Answer { sdp: answer });
            }
            SignalPayload::Answer { sdp } => {
                link.conn.accept_answer(&sdp).await?;
                link.has_remote_description = true;
                link.apply_queued().await?;
            }
            SignalPayload::Candidate(candidate) => {
                if link.has_remote_description {
                    link.conn.add_candidate(&candidate).await?;
                } else {
                    debug!(peer = %from, "Queueing early candidate");
                    link.queued.push(candidate);
                }
            }
        }
        Ok(())
    }

    /// Swap the outgoing track for `kind` on every link without
    /// renegotiating. `None` clears the slot.
    pub fn replace_track(&mut self, kind: MediaKind, track: Option<LocalTrack>) {
        let slot = kind.slot();
        match &track {
            Some(track) => {
                self.tracks.insert(slot, track.clone());
            }
            None => {
                self.tracks.remove(&slot);
            }
        }
        for link in self.links.values_mut() {
            link.conn.set_track(slot, track.as_ref());
        }
    }

    /// Forget every outgoing track. Links opened later start without media.
    pub fn clear_tracks(&mut self) {
        for slot in std::mem::take(&mut self.tracks).into_keys() {
            for link in self.links.values_mut() {
                link.conn.set_track(slot, None);
            }
        }
    }

    /// Tear every link down. Returns once all are closed. Outgoing tracks
    /// are kept for the next links.
    pub fn close_all(&mut self) {
        for (id, link) in self.links.drain() {
            debug!(peer = %id, "Closing peer link");
            link.teardown();
        }
    }

    fn emit(&self, to: &str, payload: SignalPayload) {
        let _ = self.outbox.send(OutgoingSignal {
            to: to.to_string(),
            payload,
        });
    }
}

impl Drop for PeerOrchestrator {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// The participant who joined earlier makes the offer; ties go to the
/// smaller identity id.
fn initiates(local: &Participant, remote: &Participant) -> bool {
    (local.joined_at, &local.identity_id) < (remote.joined_at, &remote.identity_id)
}
