//! Signaling relay: forwards opaque call-setup payloads between identities.

use chorus_common::ServerMessage;
use tracing::debug;

use crate::store::PresenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// No live session for the target, or its writer is gone.
    TargetAbsent,
}

/// Forward `payload` to `to`'s live session as `signal.received`.
///
/// The payload is passed through untouched.
pub fn relay(
    store: &dyn PresenceStore,
    from: &str,
    to: &str,
    payload: serde_json::Value,
) -> RelayOutcome {
    let Some(target) = store.session_for(to) else {
        debug!(from = %from, to = %to, "Relay target absent, dropping");
        return RelayOutcome::TargetAbsent;
    };

    let delivered = target.send(ServerMessage::SignalReceived {
        from: from.to_string(),
        payload,
    });
    if delivered {
        debug!(from = %from, to = %to, "Signal relayed");
        RelayOutcome::Delivered
    } else {
        debug!(from = %from, to = %to, "Relay target writer closed, dropping");
        RelayOutcome::TargetAbsent
    }
}

#[cfg(test)]
mod tests {
    use chorus_common::PublicIdentity;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::{Outbound, SessionHandle};
    use crate::store::InMemoryPresenceStore;

    #[test]
    fn payload_arrives_verbatim() {
        let mut store = InMemoryPresenceStore::new(0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.bind_session(SessionHandle::new(PublicIdentity::new("bob", "Bob"), tx));

        let payload = json!({"kind": "offer", "sdp": "v=0\r\n", "extra": [1, null]});
        assert_eq!(
            relay(&store, "alice", "bob", payload.clone()),
            RelayOutcome::Delivered
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Message(ServerMessage::SignalReceived {
                from: "alice".into(),
                payload,
            })
        );
    }

    #[test]
    fn absent_target_is_reported_to_caller() {
        let store = InMemoryPresenceStore::new(0);
        assert_eq!(
            relay(&store, "alice", "ghost", json!({})),
            RelayOutcome::TargetAbsent
        );
    }

    #[test]
    fn closed_writer_counts_as_absent() {
        let mut store = InMemoryPresenceStore::new(0);
        let (tx, rx) = mpsc::unbounded_channel();
        store.bind_session(SessionHandle::new(PublicIdentity::new("bob", "Bob"), tx));
        drop(rx);
        assert_eq!(
            relay(&store, "alice", "bob", json!({})),
            RelayOutcome::TargetAbsent
        );
    }
}
