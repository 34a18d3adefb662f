//! chorus-server: presence and voice-room signaling over WebSocket.
//!
//! Tracks which identities are connected, which communities and voice rooms
//! they are in, pushes roster changes to the affected sessions, and relays
//! call-setup payloads between peers. The relay never inspects payloads.

pub mod auth;
pub mod broadcaster;
pub mod connection;
pub mod hub;
pub mod messages;
pub mod registry;
pub mod relay;
pub mod store;
pub mod subscriptions;

pub use hub::{Hub, HubPolicy};
pub use store::{InMemoryPresenceStore, PresenceStore, RosterChange};
