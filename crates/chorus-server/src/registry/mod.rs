//! In-memory registries behind the presence store.

pub mod communities;
pub mod connections;
pub mod rooms;

pub use communities::MembershipIndex;
pub use connections::{ConnectionRegistry, Outbound, SessionHandle};
pub use rooms::{JoinOutcome, RoomFull, StatusOutcome, VoiceRoom, VoiceRoomRegistry};
