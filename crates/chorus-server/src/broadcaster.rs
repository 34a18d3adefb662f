//! Presence broadcaster: turns roster changes into roster pushes.

use std::collections::HashSet;

use chorus_common::{ServerMessage, SessionId};
use tracing::debug;

use crate::registry::SessionHandle;
use crate::store::{PresenceStore, RosterChange};
use crate::subscriptions::Subscriptions;

/// Push the current roster for `change` to its audience.
///
/// Each recipient session gets the roster exactly once. Returns the number of
/// sessions it was queued for.
pub fn broadcast(store: &dyn PresenceStore, watchers: &Subscriptions, change: &RosterChange) -> usize {
    match change {
        RosterChange::Community(community_id) => {
            let members = store.community_members(community_id);
            let recipients: Vec<&SessionHandle> = members
                .iter()
                .filter_map(|m| store.session_for(&m.id))
                .collect();
            let msg = ServerMessage::CommunityRoster {
                community_id: community_id.clone(),
                members,
            };
            deliver(recipients, &msg, community_id)
        }
        RosterChange::Room { room_id, departed } => {
            let participants = store.room_participants(room_id);
            let mut recipients: Vec<&SessionHandle> = participants
                .iter()
                .filter_map(|p| store.session_for(&p.identity_id))
                .collect();
            recipients.extend(watchers.subscribers(room_id));
            if let Some(session) = departed.as_deref().and_then(|id| store.session_for(id)) {
                recipients.push(session);
            }
            let msg = ServerMessage::RoomRoster {
                room_id: room_id.clone(),
                participants,
            };
            deliver(recipients, &msg, room_id)
        }
    }
}

/// Broadcast every change in order.
pub fn broadcast_all(
    store: &dyn PresenceStore,
    watchers: &Subscriptions,
    changes: &[RosterChange],
) -> usize {
    changes
        .iter()
        .map(|change| broadcast(store, watchers, change))
        .sum()
}

fn deliver(recipients: Vec<&SessionHandle>, msg: &ServerMessage, topic: &str) -> usize {
    let mut seen: HashSet<&SessionId> = HashSet::new();
    let mut sent = 0;
    for session in recipients {
        if !seen.insert(&session.session_id) {
            continue;
        }
        if session.send(msg.clone()) {
            sent += 1;
        } else {
            debug!(session = %session.session_id, topic = %topic, "Roster dropped, writer gone");
        }
    }
    sent
}
