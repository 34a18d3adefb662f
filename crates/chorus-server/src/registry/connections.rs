//! Connection registry: identity -> live session, one session per identity.

use std::collections::HashMap;

use chorus_common::{close_codes, PublicIdentity, ServerMessage, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Something queued for a session's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Close the transport with the given WebSocket close code.
    Close { code: u16, reason: String },
}

/// Write side of one live connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub identity: PublicIdentity,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn new(identity: PublicIdentity, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            session_id: SessionId::new(),
            identity,
            tx,
        }
    }

    /// Queue a message. Returns false if the socket writer is gone.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(Outbound::Message(msg)).is_ok()
    }

    /// Ask the socket writer to close the transport.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Maps identity ids to their single live session.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_identity: HashMap<String, SessionHandle>,
    by_session: HashMap<SessionId, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` as the identity's live session.
    ///
    /// Any previous session for the same identity is unbound and told to
    /// close with [`close_codes::SESSION_REPLACED`]; it is returned so the
    /// caller can run cleanup for it.
    pub fn register(&mut self, handle: SessionHandle) -> Option<SessionHandle> {
        let identity_id = handle.identity.id.clone();
        self.by_session
            .insert(handle.session_id.clone(), identity_id.clone());
        let evicted = self.by_identity.insert(identity_id, handle);

        if let Some(old) = &evicted {
            self.by_session.remove(&old.session_id);
            old.close(close_codes::SESSION_REPLACED, "session replaced");
            info!(
                identity = %old.identity.id,
                session = %old.session_id,
                "Evicted previous session"
            );
        }
        evicted
    }

    /// Remove the binding for `session_id`.
    ///
    /// The identity binding is only removed if it still points at this
    /// session; a stale session that was already replaced returns `None` and
    /// must not trigger cleanup.
    pub fn unregister(&mut self, session_id: &SessionId) -> Option<PublicIdentity> {
        let identity_id = self.by_session.remove(session_id)?;
        match self.by_identity.get(&identity_id) {
            Some(current) if current.session_id == *session_id => self
                .by_identity
                .remove(&identity_id)
                .map(|handle| handle.identity),
            _ => {
                debug!(session = %session_id, "Stale session unregistered");
                None
            }
        }
    }

    pub fn lookup(&self, identity_id: &str) -> Option<&SessionHandle> {
        self.by_identity.get(identity_id)
    }

    pub fn identity_of(&self, session_id: &SessionId) -> Option<&str> {
        self.by_session.get(session_id).map(String::as_str)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.by_identity.values()
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}
