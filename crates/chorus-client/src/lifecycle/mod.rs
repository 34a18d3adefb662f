//! Connection lifecycle: one background task owns the server connection,
//! drives the reconnect state machine, and replays memberships after a
//! reconnect. Callers talk to it through [`LifecycleManager`].

mod client;
mod connection;
mod machine;
mod transport;
mod types;

pub use client::{ClientHub, LifecycleManager};
pub use machine::{Backoff, ConnectionMachine};
pub use transport::{Connector, Inbound, TransportLink, WsConnector};
pub use types::{Ack, ClientEvent, ConnectionState, LifecycleConfig, LossKind};

#[cfg(test)]
pub(crate) use transport::fake;
