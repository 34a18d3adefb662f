//! Per-session topic subscriptions (room watchers, chat channels).

use std::collections::HashMap;

use chorus_common::SessionId;

use crate::registry::SessionHandle;

/// Topic -> subscribed sessions.
#[derive(Debug, Default)]
pub struct Subscriptions {
    topics: HashMap<String, HashMap<SessionId, SessionHandle>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the session was already subscribed.
    pub fn add(&mut self, topic: &str, handle: &SessionHandle) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(handle.session_id.clone(), handle.clone())
            .is_none()
    }

    pub fn remove(&mut self, topic: &str, session_id: &SessionId) -> bool {
        let Some(sessions) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = sessions.remove(session_id).is_some();
        if sessions.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Drop every subscription held by a session.
    pub fn remove_session(&mut self, session_id: &SessionId) {
        self.topics.retain(|_, sessions| {
            sessions.remove(session_id);
            !sessions.is_empty()
        });
    }

    pub fn subscribers(&self, topic: &str) -> impl Iterator<Item = &SessionHandle> {
        self.topics.get(topic).into_iter().flat_map(|s| s.values())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
