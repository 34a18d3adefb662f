//! Voice room registry: per-room participant maps, born on first join and
//! removed on last leave.

use std::collections::HashMap;

use chorus_common::{Participant, StatusPatch};
use tracing::{debug, info};

/// A voice room with at least one participant.
#[derive(Debug, Clone)]
pub struct VoiceRoom {
    pub room_id: String,
    pub participants: HashMap<String, Participant>,
}

impl VoiceRoom {
    fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            participants: HashMap::new(),
        }
    }

    /// Participants ordered by join time, then identity id.
    pub fn roster(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity_id.cmp(&b.identity_id))
        });
        list
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room the identity was moved out of, if any.
    pub left_room: Option<String>,
    /// False when the identity re-joined the same room with identical flags.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("room is full ({max} participants)")]
pub struct RoomFull {
    pub max: usize,
}

/// Result of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Applied,
    /// The participant exists but the patch changed nothing.
    Unchanged,
    /// Unknown room, or the identity is not a participant of it.
    Missing,
}

/// All voice rooms plus the identity -> room index that enforces the
/// single-room rule.
#[derive(Debug, Default)]
pub struct VoiceRoomRegistry {
    rooms: HashMap<String, VoiceRoom>,
    identity_rooms: HashMap<String, String>,
    /// 0 = unlimited.
    max_participants: usize,
}

impl VoiceRoomRegistry {
    pub fn new(max_participants: usize) -> Self {
        Self {
            max_participants,
            ..Self::default()
        }
    }

    /// Put `participant` into `room_id`, moving it out of any other room.
    ///
    /// Re-joining the same room keeps the single entry and its original
    /// `joined_at`, refreshing only the media flags.
    pub fn join(&mut self, room_id: &str, participant: Participant) -> Result<JoinOutcome, RoomFull> {
        let identity_id = participant.identity_id.clone();

        if self.identity_rooms.get(&identity_id).map(String::as_str) == Some(room_id) {
            let existing = self
                .rooms
                .get_mut(room_id)
                .and_then(|room| room.participants.get_mut(&identity_id));
            let changed = match existing {
                Some(existing) => existing.apply(&StatusPatch {
                    audio: Some(participant.audio_enabled),
                    video: Some(participant.video_enabled),
                    screen: Some(participant.screen_sharing),
                    speaking: None,
                }),
                None => false,
            };
            return Ok(JoinOutcome {
                left_room: None,
                changed,
            });
        }

        if self.max_participants > 0 {
            let occupied = self.rooms.get(room_id).map_or(0, |r| r.participants.len());
            if occupied >= self.max_participants {
                return Err(RoomFull {
                    max: self.max_participants,
                });
            }
        }

        let left_room = self.remove_identity(&identity_id);

        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!(room = %room_id, "Voice room created");
            VoiceRoom::new(room_id)
        });
        room.participants.insert(identity_id.clone(), participant);
        self.identity_rooms.insert(identity_id, room_id.to_string());

        Ok(JoinOutcome {
            left_room,
            changed: true,
        })
    }

    /// Remove `identity_id` from `room_id`. Returns false if it was not there.
    pub fn leave(&mut self, room_id: &str, identity_id: &str) -> bool {
        if self.identity_rooms.get(identity_id).map(String::as_str) != Some(room_id) {
            return false;
        }
        self.identity_rooms.remove(identity_id);
        self.remove_from_room(room_id, identity_id);
        true
    }

    /// Remove `identity_id` from whatever room it is in, returning that room.
    pub fn remove_identity(&mut self, identity_id: &str) -> Option<String> {
        let room_id = self.identity_rooms.remove(identity_id)?;
        self.remove_from_room(&room_id, identity_id);
        Some(room_id)
    }

    /// Merge `patch` into the participant's flags.
    pub fn update_status(
        &mut self,
        room_id: &str,
        identity_id: &str,
        patch: &StatusPatch,
    ) -> StatusOutcome {
        let Some(participant) = self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.participants.get_mut(identity_id))
        else {
            debug!(room = %room_id, identity = %identity_id, "Status update for missing participant");
            return StatusOutcome::Missing;
        };
        if participant.apply(patch) {
            StatusOutcome::Applied
        } else {
            StatusOutcome::Unchanged
        }
    }

    pub fn room_of(&self, identity_id: &str) -> Option<&str> {
        self.identity_rooms.get(identity_id).map(String::as_str)
    }

    pub fn get(&self, room_id: &str) -> Option<&VoiceRoom> {
        self.rooms.get(room_id)
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Roster of a room; empty if the room does not exist.
    pub fn participants(&self, room_id: &str) -> Vec<Participant> {
        self.rooms.get(room_id).map(VoiceRoom::roster).unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn remove_from_room(&mut self, room_id: &str, identity_id: &str) {
        let now_empty = match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.participants.remove(identity_id);
                room.participants.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(room_id);
            info!(room = %room_id, "Voice room closed (empty)");
        }
    }
}
