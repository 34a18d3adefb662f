//! The hub: owns all presence state and applies client events to it.
//!
//! Every event (connect, disconnect, client op) takes the state lock once,
//! applies its mutation, queues the ack and every resulting broadcast, and
//! only then releases the lock. Chat ops are the exception: the message
//! store is awaited without the lock, which is retaken for the fan-out.
//! Per-connection tasks never touch the registries directly.

use std::sync::Arc;

use chorus_common::{
    close_codes, ClientFrame, ClientOp, Participant, PublicIdentity, ServerMessage, SessionId,
};
use chorus_config::ServerConfig;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{self, AuthError, ClaimsProvider};
use crate::broadcaster::broadcast_all;
use crate::messages::{MemoryMessageStore, MessageStore, NewMessage};
use crate::registry::{Outbound, SessionHandle, StatusOutcome};
use crate::relay::{relay, RelayOutcome};
use crate::store::{InMemoryPresenceStore, PresenceStore, RosterChange};
use crate::subscriptions::Subscriptions;

/// Records returned in the `channel.subscribe` ack.
const HISTORY_ON_SUBSCRIBE: usize = 50;

/// Behavior switches for ambiguous cases.
#[derive(Debug, Clone)]
pub struct HubPolicy {
    /// Negative ack for `signal.relay` to an identity with no live session.
    pub report_absent_target: bool,
    /// Negative ack for `room.statusUpdate` when the sender is not in the room.
    pub report_missing_status_target: bool,
    /// Maximum chat message length in characters.
    pub max_content_len: usize,
}

impl Default for HubPolicy {
    fn default() -> Self {
        Self {
            report_absent_target: false,
            report_missing_status_target: false,
            max_content_len: 4000,
        }
    }
}

impl From<&ServerConfig> for HubPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            report_absent_target: config.relay.report_absent_target,
            report_missing_status_target: config.rooms.report_missing_status_target,
            max_content_len: config.messages.max_content_len as usize,
        }
    }
}

struct HubState {
    presence: Box<dyn PresenceStore>,
    /// Sessions watching a room without participating.
    watchers: Subscriptions,
    /// Chat channel subscribers.
    channels: Subscriptions,
}

/// What has to go out after the ack.
enum Effect {
    None,
    Rosters(Vec<RosterChange>),
    /// Sent to the requesting session only.
    Reply(ServerMessage),
}

/// Ops that wait on the message store. They run after the state lock is
/// released.
enum ChannelOp {
    History {
        channel_id: String,
    },
    Save {
        channel_id: String,
        content: String,
        client_temp_id: String,
    },
}

enum Applied {
    Done(ServerMessage, Effect),
    Deferred(ChannelOp),
}

pub struct Hub {
    state: Mutex<HubState>,
    claims: Arc<dyn ClaimsProvider>,
    messages: Arc<dyn MessageStore>,
    policy: HubPolicy,
}

impl Hub {
    pub fn new(
        presence: Box<dyn PresenceStore>,
        claims: Arc<dyn ClaimsProvider>,
        messages: Arc<dyn MessageStore>,
        policy: HubPolicy,
    ) -> Self {
        Self {
            state: Mutex::new(HubState {
                presence,
                watchers: Subscriptions::new(),
                channels: Subscriptions::new(),
            }),
            claims,
            messages,
            policy,
        }
    }

    /// Build a hub with in-memory stores from server config.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            Box::new(InMemoryPresenceStore::new(
                config.rooms.max_participants as usize,
            )),
            auth::from_config(&config.auth),
            Arc::new(MemoryMessageStore::new(
                config.messages.history_per_channel as usize,
            )),
            HubPolicy::from(config),
        )
    }

    pub async fn authenticate(&self, token: &str) -> Result<PublicIdentity, AuthError> {
        self.claims.resolve(token).await
    }

    /// Bind a new session for `identity`.
    ///
    /// A previous session of the same identity is evicted: its transport is
    /// told to close and its memberships are cleaned up here, once.
    pub async fn connect(
        &self,
        identity: PublicIdentity,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> SessionHandle {
        let handle = SessionHandle::new(identity, tx);
        let mut state = self.state.lock().await;
        let HubState {
            presence,
            watchers,
            channels,
        } = &mut *state;

        if let Some(evicted) = presence.bind_session(handle.clone()) {
            watchers.remove_session(&evicted.session_id);
            channels.remove_session(&evicted.session_id);
            let changes = presence.drop_identity(&handle.identity.id);
            broadcast_all(&**presence, watchers, &changes);
        }

        info!(
            session = %handle.session_id,
            identity = %handle.identity.id,
            "Session bound"
        );
        handle
    }

    /// Tear down a session. Only the identity's current session triggers the
    /// membership cascade.
    pub async fn disconnect(&self, session_id: &SessionId) {
        let mut state = self.state.lock().await;
        let HubState {
            presence,
            watchers,
            channels,
        } = &mut *state;

        watchers.remove_session(session_id);
        channels.remove_session(session_id);

        match presence.unbind_session(session_id) {
            Some(identity) => {
                let changes = presence.drop_identity(&identity.id);
                let sent = broadcast_all(&**presence, watchers, &changes);
                info!(
                    session = %session_id,
                    identity = %identity.id,
                    rosters = changes.len(),
                    recipients = sent,
                    "Session unbound"
                );
            }
            None => debug!(session = %session_id, "Replaced session closed, nothing to clean"),
        }
    }

    /// Ask every live session to close. Returns how many were told.
    pub async fn shutdown(&self) -> usize {
        let state = self.state.lock().await;
        let sessions = state.presence.live_sessions();
        for session in &sessions {
            session.close(close_codes::SERVER_SHUTDOWN, "server shutting down");
        }
        info!(sessions = sessions.len(), "Closing all sessions");
        sessions.len()
    }

    /// Apply one client op. The session receives exactly one ack for it.
    pub async fn handle(&self, session: &SessionHandle, frame: ClientFrame) {
        let ClientFrame { id, op } = frame;
        debug!(session = %session.session_id, op = op.name(), id, "Client op");

        let mut state = self.state.lock().await;

        if !state.presence.is_current(&session.session_id) {
            session.send(ServerMessage::rejected(id, "session replaced"));
            return;
        }
        if let Err(e) = op.validate() {
            warn!(session = %session.session_id, op = op.name(), error = %e, "Rejected op");
            session.send(ServerMessage::rejected(id, e.to_string()));
            return;
        }

        let channel_op = match self.apply(&mut state, session, id, op) {
            Applied::Done(ack, effect) => {
                session.send(ack);
                let HubState {
                    presence, watchers, ..
                } = &mut *state;
                match effect {
                    Effect::None => {}
                    Effect::Rosters(changes) => {
                        broadcast_all(&**presence, watchers, &changes);
                    }
                    Effect::Reply(msg) => {
                        session.send(msg);
                    }
                }
                return;
            }
            Applied::Deferred(channel_op) => channel_op,
        };
        drop(state);

        match channel_op {
            ChannelOp::History { channel_id } => {
                let ack = self.history_ack(id, &channel_id).await;
                session.send(ack);
            }
            ChannelOp::Save {
                channel_id,
                content,
                client_temp_id,
            } => {
                self.save_message(session, id, channel_id, &content, &client_temp_id)
                    .await;
            }
        }
    }

    async fn history_ack(&self, id: u64, channel_id: &str) -> ServerMessage {
        let history = match self.messages.recent(channel_id, HISTORY_ON_SUBSCRIBE).await {
            Ok(records) => records,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "History unavailable");
                Vec::new()
            }
        };
        match serde_json::to_value(&history) {
            Ok(data) => ServerMessage::ok_with(id, serde_json::json!({ "history": data })),
            Err(_) => ServerMessage::ok(id),
        }
    }

    /// Save, ack the sender, then fan out to whoever is subscribed by then.
    async fn save_message(
        &self,
        session: &SessionHandle,
        id: u64,
        channel_id: String,
        content: &str,
        client_temp_id: &str,
    ) {
        let saved = self
            .messages
            .save(NewMessage {
                author: &session.identity,
                channel_id: &channel_id,
                content,
                client_temp_id,
            })
            .await;

        let record = match saved {
            Ok(record) => record,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Message save failed");
                session.send(ServerMessage::rejected(id, e.to_string()));
                return;
            }
        };
        let data = match serde_json::to_value(&record) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Failed to encode saved message");
                session.send(ServerMessage::rejected(id, "internal error"));
                return;
            }
        };
        session.send(ServerMessage::ok_with(id, data));

        let message = ServerMessage::MessageCreated { message: record };
        let state = self.state.lock().await;
        for subscriber in state.channels.subscribers(&channel_id) {
            subscriber.send(message.clone());
        }
    }

    fn apply(
        &self,
        state: &mut HubState,
        session: &SessionHandle,
        id: u64,
        op: ClientOp,
    ) -> Applied {
        let identity_id = session.identity.id.as_str();
        let presence = &mut state.presence;

        let (ack, effect) = match op {
            ClientOp::Hello { .. } => (
                ServerMessage::rejected(id, "already authenticated"),
                Effect::None,
            ),

            ClientOp::Ping => (ServerMessage::ok(id), Effect::None),

            ClientOp::JoinCommunity { community_id } => {
                let changes = presence.join_community(identity_id, &community_id);
                (ServerMessage::ok(id), Effect::Rosters(changes))
            }

            ClientOp::LeaveCommunity { community_id } => {
                let changes = presence.leave_community(identity_id, &community_id);
                (ServerMessage::ok(id), Effect::Rosters(changes))
            }

            ClientOp::JoinRoom { room_id, media } => {
                let participant = Participant::new(&session.identity, media, Utc::now());
                match presence.join_room(&room_id, participant) {
                    Ok(changes) if changes.is_empty() => {
                        // Nothing changed, so nobody else hears about it. The
                        // joiner still gets the roster to rebuild its view.
                        debug!(identity = %identity_id, room = %room_id, "Repeated room join");
                        let roster = ServerMessage::RoomRoster {
                            participants: presence.room_participants(&room_id),
                            room_id,
                        };
                        (ServerMessage::ok(id), Effect::Reply(roster))
                    }
                    Ok(changes) => {
                        info!(identity = %identity_id, room = %room_id, "Joined voice room");
                        (ServerMessage::ok(id), Effect::Rosters(changes))
                    }
                    Err(full) => (ServerMessage::rejected(id, full.to_string()), Effect::None),
                }
            }

            ClientOp::LeaveRoom { room_id } => {
                let changes = presence.leave_room(&room_id, identity_id);
                if !changes.is_empty() {
                    info!(identity = %identity_id, room = %room_id, "Left voice room");
                }
                (ServerMessage::ok(id), Effect::Rosters(changes))
            }

            ClientOp::UpdateStatus { room_id, patch } => {
                let (outcome, changes) = presence.update_status(&room_id, identity_id, &patch);
                let ack = match outcome {
                    StatusOutcome::Missing if self.policy.report_missing_status_target => {
                        ServerMessage::rejected(id, "not a participant of this room")
                    }
                    _ => ServerMessage::ok(id),
                };
                (ack, Effect::Rosters(changes))
            }

            ClientOp::WatchRoom { room_id } => {
                state.watchers.add(&room_id, session);
                let snapshot = ServerMessage::RoomRoster {
                    participants: state.presence.room_participants(&room_id),
                    room_id,
                };
                (ServerMessage::ok(id), Effect::Reply(snapshot))
            }

            ClientOp::UnwatchRoom { room_id } => {
                state.watchers.remove(&room_id, &session.session_id);
                (ServerMessage::ok(id), Effect::None)
            }

            ClientOp::RelaySignal { to, payload } => {
                let ack = match relay(&**presence, identity_id, &to, payload) {
                    RelayOutcome::TargetAbsent if self.policy.report_absent_target => {
                        ServerMessage::rejected(id, "relay target absent")
                    }
                    _ => ServerMessage::ok(id),
                };
                (ack, Effect::None)
            }

            ClientOp::SubscribeChannel { channel_id } => {
                state.channels.add(&channel_id, session);
                return Applied::Deferred(ChannelOp::History { channel_id });
            }

            ClientOp::UnsubscribeChannel { channel_id } => {
                state.channels.remove(&channel_id, &session.session_id);
                (ServerMessage::ok(id), Effect::None)
            }

            ClientOp::SendMessage {
                channel_id,
                content,
                client_temp_id,
            } => {
                if content.trim().is_empty() {
                    (ServerMessage::rejected(id, "message is empty"), Effect::None)
                } else if content.chars().count() > self.policy.max_content_len {
                    let reason = format!(
                        "message exceeds {} characters",
                        self.policy.max_content_len
                    );
                    (ServerMessage::rejected(id, reason), Effect::None)
                } else {
                    return Applied::Deferred(ChannelOp::Save {
                        channel_id,
                        content,
                        client_temp_id,
                    });
                }
            }
        };
        Applied::Done(ack, effect)
    }
}
