//! Public handles for the server connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chorus_common::{new_id, ChatRecord, ClientOp, MediaFlags, StatusPatch};
use chorus_config::ClientConfig;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tracing::info;

use super::connection::Driver;
use super::transport::{Connector, WsConnector};
use super::types::{Ack, ClientEvent, Command, ConnectionState, LifecycleConfig};
use crate::errors::ClientError;
use crate::identity::Identity;

// ---------------------------------------------------------------------------
// LifecycleManager
// ---------------------------------------------------------------------------

/// Handle to one server connection.
///
/// Cheap to clone. Every method forwards a command to the background driver
/// task; failures always come back through the returned `Result`.
#[derive(Clone)]
pub struct LifecycleManager {
    identity: Identity,
    config: LifecycleConfig,
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    event_tx: broadcast::Sender<ClientEvent>,
    recent_retries: Arc<AtomicU32>,
}

impl LifecycleManager {
    /// Start the driver task and begin connecting.
    pub fn spawn(
        identity: Identity,
        url: impl Into<String>,
        config: LifecycleConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(256);
        let recent_retries = Arc::new(AtomicU32::new(0));

        let driver = Driver::new(
            url.into(),
            identity.token.clone(),
            config.clone(),
            connector,
            command_rx,
            state_tx,
            event_tx.clone(),
            Arc::clone(&recent_retries),
        );
        tokio::spawn(driver.run());

        Self {
            identity,
            config,
            command_tx,
            state_rx,
            event_tx,
            recent_retries,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the connection state satisfies `pred`.
    pub async fn wait_for(
        &self,
        pred: impl Fn(ConnectionState) -> bool,
    ) -> Result<ConnectionState, ClientError> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| pred(*s))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(*state)
    }

    /// Roster, relay, message and state events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Send an op and wait for its acknowledgment.
    pub async fn send(&self, op: ClientOp) -> Result<Ack, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Send { op, reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;

        let after = self
            .config
            .ack_timeout(self.recent_retries.load(Ordering::Relaxed));
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Shutdown),
            Err(_) => Err(ClientError::SendTimeout { after }),
        }
    }

    pub async fn join_community(&self, community_id: &str) -> Result<(), ClientError> {
        self.send(ClientOp::JoinCommunity {
            community_id: community_id.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn leave_community(&self, community_id: &str) -> Result<(), ClientError> {
        self.send(ClientOp::LeaveCommunity {
            community_id: community_id.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn join_room(&self, room_id: &str, media: MediaFlags) -> Result<(), ClientError> {
        self.send(ClientOp::JoinRoom {
            room_id: room_id.to_string(),
            media,
        })
        .await
        .map(drop)
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.send(ClientOp::LeaveRoom {
            room_id: room_id.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn update_status(&self, room_id: &str, patch: StatusPatch) -> Result<(), ClientError> {
        self.send(ClientOp::UpdateStatus {
            room_id: room_id.to_string(),
            patch,
        })
        .await
        .map(drop)
    }

    /// Watch a room without joining it. The current roster arrives as a
    /// [`ClientEvent::RoomRoster`].
    pub async fn watch_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.send(ClientOp::WatchRoom {
            room_id: room_id.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn unwatch_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.send(ClientOp::UnwatchRoom {
            room_id: room_id.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn relay_signal(
        &self,
        to: &str,
        payload: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.send(ClientOp::RelaySignal {
            to: to.to_string(),
            payload,
        })
        .await
        .map(drop)
    }

    /// Subscribe to a text channel; returns its recent history, oldest first.
    pub async fn subscribe_channel(&self, channel_id: &str) -> Result<Vec<ChatRecord>, ClientError> {
        let ack = self
            .send(ClientOp::SubscribeChannel {
                channel_id: channel_id.to_string(),
            })
            .await?;
        let history = ack
            .data
            .and_then(|mut data| data.get_mut("history").map(serde_json::Value::take))
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
        serde_json::from_value(history)
            .map_err(|e| ClientError::Rejected(format!("malformed history: {e}")))
    }

    pub async fn unsubscribe_channel(&self, channel_id: &str) -> Result<(), ClientError> {
        self.send(ClientOp::UnsubscribeChannel {
            channel_id: channel_id.to_string(),
        })
        .await
        .map(drop)
    }

    /// Post a chat message; returns the record the server saved.
    pub async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<ChatRecord, ClientError> {
        let ack = self
            .send(ClientOp::SendMessage {
                channel_id: channel_id.to_string(),
                content: content.to_string(),
                client_temp_id: new_id(),
            })
            .await?;
        let data = ack
            .data
            .ok_or_else(|| ClientError::Rejected("message ack without record".into()))?;
        serde_json::from_value(data)
            .map_err(|e| ClientError::Rejected(format!("malformed message record: {e}")))
    }

    /// Leave `Failed` or `Disconnected` with a fresh retry budget.
    pub async fn force_reconnect(&self) -> Result<(), ClientError> {
        self.command_tx
            .send(Command::ForceReconnect)
            .await
            .map_err(|_| ClientError::Shutdown)
    }

    /// Close the connection deliberately. Pending ops fail with
    /// [`ClientError::Shutdown`].
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.command_tx.send(Command::Close { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// ClientHub
// ---------------------------------------------------------------------------

/// Keeps at most one [`LifecycleManager`] alive per running client.
pub struct ClientHub {
    url: String,
    config: LifecycleConfig,
    connector: Arc<dyn Connector>,
    current: Mutex<Option<LifecycleManager>>,
}

impl ClientHub {
    pub fn new(url: impl Into<String>, config: LifecycleConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            url: url.into(),
            config,
            connector,
            current: Mutex::new(None),
        }
    }

    /// WebSocket hub for the `[client]` config section.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.url.clone(),
            LifecycleConfig::from(&config.connection),
            Arc::new(WsConnector),
        )
    }

    /// Manager for `identity`. The same account reuses the live manager; a
    /// different account closes it first.
    pub async fn connect(&self, identity: Identity) -> LifecycleManager {
        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.identity().same_account(&identity) {
                return existing.clone();
            }
            info!(old = %existing.identity().id, new = %identity.id, "Switching account");
            existing.close().await;
        }

        let manager = LifecycleManager::spawn(
            identity,
            self.url.clone(),
            self.config.clone(),
            Arc::clone(&self.connector),
        );
        *current = Some(manager.clone());
        manager
    }

    /// Close and forget the current manager, if any.
    pub async fn disconnect(&self) {
        if let Some(manager) = self.current.lock().await.take() {
            manager.close().await;
        }
    }

    pub async fn current(&self) -> Option<LifecycleManager> {
        self.current.lock().await.clone()
    }
}
