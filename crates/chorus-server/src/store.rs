//! Presence state: connections, community memberships, and voice rooms.
//!
//! Every mutation reports the rosters it changed as [`RosterChange`]s; the
//! hub hands those to the broadcaster while still holding the state lock.

use chorus_common::{Participant, PublicIdentity, SessionId, StatusPatch};
use tracing::debug;

use crate::registry::{
    ConnectionRegistry, MembershipIndex, RoomFull, SessionHandle, StatusOutcome,
    VoiceRoomRegistry,
};

/// A roster that needs to be pushed to its audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Community(String),
    Room {
        room_id: String,
        /// Identity that just left, so its own view can be cleared.
        departed: Option<String>,
    },
}

impl RosterChange {
    pub fn room(room_id: &str) -> Self {
        Self::Room {
            room_id: room_id.to_string(),
            departed: None,
        }
    }

    pub fn room_departure(room_id: &str, identity_id: &str) -> Self {
        Self::Room {
            room_id: room_id.to_string(),
            departed: Some(identity_id.to_string()),
        }
    }
}

/// Storage for all presence and voice-room state.
///
/// Implementations are plain synchronous data structures; callers serialize
/// access.
pub trait PresenceStore: Send {
    /// Bind a session, evicting any previous session of the same identity.
    fn bind_session(&mut self, handle: SessionHandle) -> Option<SessionHandle>;

    /// Unbind a session. `None` if it was already replaced or unknown.
    fn unbind_session(&mut self, session_id: &SessionId) -> Option<PublicIdentity>;

    fn session_for(&self, identity_id: &str) -> Option<&SessionHandle>;

    fn live_sessions(&self) -> Vec<SessionHandle>;

    /// Whether `session_id` is still the live session of its identity.
    fn is_current(&self, session_id: &SessionId) -> bool;

    fn join_community(&mut self, identity_id: &str, community_id: &str) -> Vec<RosterChange>;

    fn leave_community(&mut self, identity_id: &str, community_id: &str) -> Vec<RosterChange>;

    /// Connected members of a community, sorted by id.
    fn community_members(&self, community_id: &str) -> Vec<PublicIdentity>;

    fn communities_of(&self, identity_id: &str) -> Vec<String>;

    fn join_room(
        &mut self,
        room_id: &str,
        participant: Participant,
    ) -> Result<Vec<RosterChange>, RoomFull>;

    fn leave_room(&mut self, room_id: &str, identity_id: &str) -> Vec<RosterChange>;

    fn update_status(
        &mut self,
        room_id: &str,
        identity_id: &str,
        patch: &StatusPatch,
    ) -> (StatusOutcome, Vec<RosterChange>);

    fn room_participants(&self, room_id: &str) -> Vec<Participant>;

    fn room_of(&self, identity_id: &str) -> Option<String>;

    /// Remove an identity from every community and its room.
    fn drop_identity(&mut self, identity_id: &str) -> Vec<RosterChange>;
}

/// [`PresenceStore`] over the in-memory registries.
#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    connections: ConnectionRegistry,
    communities: MembershipIndex,
    rooms: VoiceRoomRegistry,
}

impl InMemoryPresenceStore {
    pub fn new(max_participants: usize) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            communities: MembershipIndex::new(),
            rooms: VoiceRoomRegistry::new(max_participants),
        }
    }
}

impl PresenceStore for InMemoryPresenceStore {
    fn bind_session(&mut self, handle: SessionHandle) -> Option<SessionHandle> {
        self.connections.register(handle)
    }

    fn unbind_session(&mut self, session_id: &SessionId) -> Option<PublicIdentity> {
        self.connections.unregister(session_id)
    }

    fn session_for(&self, identity_id: &str) -> Option<&SessionHandle> {
        self.connections.lookup(identity_id)
    }

    fn live_sessions(&self) -> Vec<SessionHandle> {
        self.connections.sessions().cloned().collect()
    }

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.connections
            .identity_of(session_id)
            .and_then(|id| self.connections.lookup(id))
            .is_some_and(|handle| handle.session_id == *session_id)
    }

    fn join_community(&mut self, identity_id: &str, community_id: &str) -> Vec<RosterChange> {
        if self.communities.join(identity_id, community_id) {
            vec![RosterChange::Community(community_id.to_string())]
        } else {
            Vec::new()
        }
    }

    fn leave_community(&mut self, identity_id: &str, community_id: &str) -> Vec<RosterChange> {
        if self.communities.leave(identity_id, community_id) {
            vec![RosterChange::Community(community_id.to_string())]
        } else {
            Vec::new()
        }
    }

    fn community_members(&self, community_id: &str) -> Vec<PublicIdentity> {
        self.communities
            .members_of(community_id)
            .iter()
            .filter_map(|id| self.connections.lookup(id))
            .map(|handle| handle.identity.clone())
            .collect()
    }

    fn communities_of(&self, identity_id: &str) -> Vec<String> {
        self.communities.communities_of(identity_id)
    }

    fn join_room(
        &mut self,
        room_id: &str,
        participant: Participant,
    ) -> Result<Vec<RosterChange>, RoomFull> {
        let identity_id = participant.identity_id.clone();
        let outcome = self.rooms.join(room_id, participant)?;

        let mut changes = Vec::new();
        if let Some(previous) = outcome.left_room {
            changes.push(RosterChange::room_departure(&previous, &identity_id));
        }
        if outcome.changed {
            changes.push(RosterChange::room(room_id));
        }
        Ok(changes)
    }

    fn leave_room(&mut self, room_id: &str, identity_id: &str) -> Vec<RosterChange> {
        if self.rooms.leave(room_id, identity_id) {
            vec![RosterChange::room_departure(room_id, identity_id)]
        } else {
            debug!(room = %room_id, identity = %identity_id, "Leave for room not joined");
            Vec::new()
        }
    }

    fn update_status(
        &mut self,
        room_id: &str,
        identity_id: &str,
        patch: &StatusPatch,
    ) -> (StatusOutcome, Vec<RosterChange>) {
        let outcome = self.rooms.update_status(room_id, identity_id, patch);
        let changes = match outcome {
            StatusOutcome::Applied => vec![RosterChange::room(room_id)],
            StatusOutcome::Unchanged | StatusOutcome::Missing => Vec::new(),
        };
        (outcome, changes)
    }

    fn room_participants(&self, room_id: &str) -> Vec<Participant> {
        self.rooms.participants(room_id)
    }

    fn room_of(&self, identity_id: &str) -> Option<String> {
        self.rooms.room_of(identity_id).map(str::to_string)
    }

    fn drop_identity(&mut self, identity_id: &str) -> Vec<RosterChange> {
        let mut changes = Vec::new();
        for community_id in self.communities.communities_of(identity_id) {
            changes.extend(self.leave_community(identity_id, &community_id));
        }
        if let Some(room_id) = self.rooms.remove_identity(identity_id) {
            changes.push(RosterChange::room_departure(&room_id, identity_id));
        }
        changes
    }
}
