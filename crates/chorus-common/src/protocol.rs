//! Wire protocol between chorus clients and the presence server.
//!
//! Every frame is a JSON text message. Clients send [`ClientFrame`]s, each
//! carrying a client-chosen `id` that the server echoes back in exactly one
//! [`ServerMessage::Ack`]. Everything else the server pushes (rosters, relayed
//! signals, chat records) is unsolicited.
//!
//! Signaling payloads are carried as opaque JSON; the server never looks
//! inside them.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::id::{validate_id, IdKind, SessionId};
use crate::types::{ChatRecord, MediaFlags, Participant, PublicIdentity, StatusPatch};

/// WebSocket close codes used by the server.
pub mod close_codes {
    /// Another session for the same identity took over.
    pub const SESSION_REPLACED: u16 = 4001;
    /// The hello frame was missing, late, or its token was rejected.
    pub const AUTH_FAILED: u16 = 4003;
    /// The server is shutting down on purpose.
    pub const SERVER_SHUTDOWN: u16 = 4010;

    /// Whether a close code means the server closed us on purpose.
    pub fn is_server_initiated(code: u16) -> bool {
        code == 1000 || (4000..5000).contains(&code)
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// A request envelope. `id` is echoed in the matching ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub id: u64,
    pub op: ClientOp,
}

impl ClientFrame {
    pub fn new(id: u64, op: ClientOp) -> Self {
        Self { id, op }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Operations a client can request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientOp {
    #[serde(rename = "hello")]
    Hello { token: String },

    #[serde(rename = "identity.join")]
    JoinCommunity { community_id: String },

    #[serde(rename = "identity.leave")]
    LeaveCommunity { community_id: String },

    #[serde(rename = "room.join")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        media: MediaFlags,
    },

    #[serde(rename = "room.leave")]
    LeaveRoom { room_id: String },

    #[serde(rename = "room.statusUpdate")]
    UpdateStatus { room_id: String, patch: StatusPatch },

    #[serde(rename = "room.watch")]
    WatchRoom { room_id: String },

    #[serde(rename = "room.unwatch")]
    UnwatchRoom { room_id: String },

    #[serde(rename = "signal.relay")]
    RelaySignal {
        to: String,
        payload: serde_json::Value,
    },

    #[serde(rename = "channel.subscribe")]
    SubscribeChannel { channel_id: String },

    #[serde(rename = "channel.unsubscribe")]
    UnsubscribeChannel { channel_id: String },

    #[serde(rename = "message.send")]
    SendMessage {
        channel_id: String,
        content: String,
        client_temp_id: String,
    },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientOp {
    /// Wire name of the operation, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::JoinCommunity { .. } => "identity.join",
            Self::LeaveCommunity { .. } => "identity.leave",
            Self::JoinRoom { .. } => "room.join",
            Self::LeaveRoom { .. } => "room.leave",
            Self::UpdateStatus { .. } => "room.statusUpdate",
            Self::WatchRoom { .. } => "room.watch",
            Self::UnwatchRoom { .. } => "room.unwatch",
            Self::RelaySignal { .. } => "signal.relay",
            Self::SubscribeChannel { .. } => "channel.subscribe",
            Self::UnsubscribeChannel { .. } => "channel.unsubscribe",
            Self::SendMessage { .. } => "message.send",
            Self::Ping => "ping",
        }
    }

    /// Check every identifier the operation carries.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::Hello { .. } | Self::Ping => Ok(()),
            Self::JoinCommunity { community_id } | Self::LeaveCommunity { community_id } => {
                validate_id(IdKind::Community, community_id)
            }
            Self::JoinRoom { room_id, .. }
            | Self::LeaveRoom { room_id }
            | Self::UpdateStatus { room_id, .. }
            | Self::WatchRoom { room_id }
            | Self::UnwatchRoom { room_id } => validate_id(IdKind::Room, room_id),
            Self::RelaySignal { to, .. } => validate_id(IdKind::Identity, to),
            Self::SubscribeChannel { channel_id }
            | Self::UnsubscribeChannel { channel_id }
            | Self::SendMessage { channel_id, .. } => validate_id(IdKind::Channel, channel_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Messages the server pushes to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        session_id: SessionId,
        identity: PublicIdentity,
    },

    #[serde(rename = "ack")]
    Ack {
        id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "community.roster")]
    CommunityRoster {
        community_id: String,
        members: Vec<PublicIdentity>,
    },

    #[serde(rename = "room.roster")]
    RoomRoster {
        room_id: String,
        participants: Vec<Participant>,
    },

    #[serde(rename = "signal.received")]
    SignalReceived {
        from: String,
        payload: serde_json::Value,
    },

    #[serde(rename = "message.created")]
    MessageCreated { message: ChatRecord },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn ok(id: u64) -> Self {
        Self::Ack {
            id,
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn ok_with(id: u64, data: serde_json::Value) -> Self {
        Self::Ack {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn rejected(id: u64, reason: impl Into<String>) -> Self {
        Self::Ack {
            id,
            ok: false,
            data: None,
            error: Some(reason.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_uses_dotted_op_names() {
        let frame = ClientFrame::new(
            7,
            ClientOp::JoinRoom {
                room_id: "R1".into(),
                media: MediaFlags {
                    audio: true,
                    ..MediaFlags::default()
                },
            },
        );
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["op"]["type"], "room.join");
        assert_eq!(json["op"]["media"]["audio"], true);
    }

    #[test]
    fn parses_status_update_from_text() {
        let text = r#"{"id":3,"op":{"type":"room.statusUpdate","room_id":"R1","patch":{"video":true}}}"#;
        let frame = ClientFrame::parse(text).unwrap();
        match frame.op {
            ClientOp::UpdateStatus { room_id, patch } => {
                assert_eq!(room_id, "R1");
                assert_eq!(patch.video, Some(true));
                assert_eq!(patch.audio, None);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn room_join_media_is_optional() {
        let text = r#"{"id":1,"op":{"type":"room.join","room_id":"R1"}}"#;
        let frame = ClientFrame::parse(text).unwrap();
        assert!(matches!(
            frame.op,
            ClientOp::JoinRoom { media, .. } if media == MediaFlags::default()
        ));
    }

    #[test]
    fn relay_payload_stays_opaque() {
        let text = r#"{"id":9,"op":{"type":"signal.relay","to":"bob","payload":{"anything":[1,2,{"x":null}]}}}"#;
        let frame = ClientFrame::parse(text).unwrap();
        match frame.op {
            ClientOp::RelaySignal { to, payload } => {
                assert_eq!(to, "bob");
                assert_eq!(payload["anything"][2]["x"], serde_json::Value::Null);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_malformed() {
        let err = ClientFrame::parse(r#"{"id":1,"op":{"type":"room.explode"}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn validate_rejects_bad_room_id() {
        let op = ClientOp::LeaveRoom {
            room_id: "two words".into(),
        };
        assert!(op.validate().is_err());
        assert!(ClientOp::Ping.validate().is_ok());
    }

    #[test]
    fn ack_omits_empty_fields() {
        let json = ServerMessage::ok(4).to_json().unwrap();
        assert_eq!(json, r#"{"type":"ack","id":4,"ok":true}"#);

        let json = ServerMessage::rejected(5, "room is full").to_json().unwrap();
        assert!(json.contains(r#""error":"room is full""#));
    }

    #[test]
    fn server_message_parses_back() {
        let msg = ServerMessage::SignalReceived {
            from: "alice".into(),
            payload: serde_json::json!({"kind": "offer", "sdp": "v=0"}),
        };
        let parsed = ServerMessage::parse(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn close_code_classification() {
        assert!(close_codes::is_server_initiated(close_codes::SESSION_REPLACED));
        assert!(close_codes::is_server_initiated(close_codes::AUTH_FAILED));
        assert!(close_codes::is_server_initiated(1000));
        assert!(!close_codes::is_server_initiated(1001));
        assert!(!close_codes::is_server_initiated(1006));
    }

    #[test]
    fn op_names_match_wire_tags() {
        let op = ClientOp::UnwatchRoom {
            room_id: "R1".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], op.name());
    }
}
