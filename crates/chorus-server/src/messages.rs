//! Chat message storage.
//!
//! The in-memory store keeps a bounded ring buffer per channel so memory
//! usage stays predictable.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chorus_common::{new_id, ChatRecord, PublicIdentity};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// A message as submitted, before it gets an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub author: &'a PublicIdentity,
    pub channel_id: &'a str,
    pub content: &'a str,
    pub client_temp_id: &'a str,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return the saved record.
    async fn save(&self, message: NewMessage<'_>) -> Result<ChatRecord, StoreError>;

    /// Most recent `limit` records of a channel, oldest first.
    async fn recent(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatRecord>, StoreError>;
}

/// In-memory history, keyed by channel id.
#[derive(Debug)]
pub struct MemoryMessageStore {
    max_per_channel: usize,
    channels: Mutex<HashMap<String, VecDeque<ChatRecord>>>,
}

impl MemoryMessageStore {
    pub fn new(max_per_channel: usize) -> Self {
        Self {
            max_per_channel: max_per_channel.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, VecDeque<ChatRecord>>>, StoreError> {
        self.channels
            .lock()
            .map_err(|_| StoreError::Unavailable("history lock poisoned".into()))
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, message: NewMessage<'_>) -> Result<ChatRecord, StoreError> {
        let record = ChatRecord {
            id: new_id(),
            channel_id: message.channel_id.to_string(),
            author: message.author.clone(),
            content: message.content.to_string(),
            client_temp_id: message.client_temp_id.to_string(),
            created_at: Utc::now(),
        };

        let mut channels = self.lock()?;
        let buf = channels.entry(record.channel_id.clone()).or_default();
        if buf.len() >= self.max_per_channel {
            buf.pop_front();
        }
        buf.push_back(record.clone());
        Ok(record)
    }

    async fn recent(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatRecord>, StoreError> {
        let channels = self.lock()?;
        Ok(match channels.get(channel_id) {
            Some(buf) => {
                let skip = buf.len().saturating_sub(limit);
                buf.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg<'a>(author: &'a PublicIdentity, content: &'a str) -> NewMessage<'a> {
        NewMessage {
            author,
            channel_id: "general",
            content,
            client_temp_id: "tmp-1",
        }
    }

    #[tokio::test]
    async fn save_assigns_id_and_keeps_temp_id() {
        let store = MemoryMessageStore::default();
        let alice = PublicIdentity::new("alice", "Alice");
        let record = store.save(msg(&alice, "hi")).await.unwrap();

        assert!(uuid_like(&record.id));
        assert_eq!(record.client_temp_id, "tmp-1");
        assert_eq!(record.author, alice);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let store = MemoryMessageStore::new(3);
        let alice = PublicIdentity::new("alice", "Alice");
        for content in ["1", "2", "3", "4", "5"] {
            store.save(msg(&alice, content)).await.unwrap();
        }
        let recent = store.recent("general", 10).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["3", "4", "5"]);
    }

    #[tokio::test]
    async fn recent_limits_from_the_end() {
        let store = MemoryMessageStore::default();
        let alice = PublicIdentity::new("alice", "Alice");
        for content in ["a", "b", "c"] {
            store.save(msg(&alice, content)).await.unwrap();
        }
        let recent = store.recent("general", 2).await.unwrap();
        assert_eq!(recent[0].content, "b");
        assert!(store.recent("elsewhere", 2).await.unwrap().is_empty());
    }

    fn uuid_like(id: &str) -> bool {
        id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
    }
}
