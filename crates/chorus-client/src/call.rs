//! Glue for being in one voice room: local media, peer links, speaking
//! detection and the server connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_common::{MediaFlags, StatusPatch};
use chorus_config::SpeakingConfig;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{ClientError, MediaError};
use crate::lifecycle::{ClientEvent, LifecycleManager};
use crate::peers::{LocalTrack, MediaKind, OutgoingSignal, PeerFactory, PeerOrchestrator, TrackSlot};
use crate::speaking::{AudioLevelSource, SpeakingMonitor};

/// Local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Start capturing. May wait on a permission prompt; a denial resolves
    /// with [`MediaError::PermissionDenied`].
    async fn acquire(&self, kind: MediaKind) -> Result<LocalTrack, MediaError>;

    fn stop_track(&self, track: &LocalTrack);

    /// Level source for an audio track, if the platform can analyse it.
    fn level_source(&self, track: &LocalTrack) -> Option<Box<dyn AudioLevelSource>>;
}

struct CallState {
    room_id: Option<String>,
    peers: PeerOrchestrator,
    tracks: HashMap<TrackSlot, LocalTrack>,
    monitor: Option<SpeakingMonitor>,
    devices: Arc<dyn MediaDevices>,
}

impl CallState {
    /// Close every link and stop every local track. The monitor is handed
    /// back so the caller can wait for its release.
    fn teardown(&mut self) -> Option<SpeakingMonitor> {
        self.peers.close_all();
        self.peers.clear_tracks();
        for (slot, track) in self.tracks.drain() {
            debug!(track = %track.id, ?slot, "Stopping local track");
            self.devices.stop_track(&track);
        }
        self.room_id = None;
        self.monitor.take()
    }

    /// Put `acquired` on every link in place of the current tracks, which
    /// are stopped. Slots with nothing acquired are cleared.
    fn install_tracks(&mut self, acquired: &[LocalTrack]) {
        for kind in [MediaKind::Audio, MediaKind::Camera] {
            let slot = kind.slot();
            let next = acquired.iter().find(|t| t.kind.slot() == slot).cloned();
            if let Some(old) = self.tracks.remove(&slot) {
                self.devices.stop_track(&old);
            }
            self.peers.replace_track(kind, next.clone());
            if let Some(track) = next {
                self.tracks.insert(slot, track);
            }
        }
    }
}

impl Drop for CallState {
    fn drop(&mut self) {
        drop(self.teardown());
    }
}

/// One client's presence in at most one voice room.
pub struct CallSession {
    manager: LifecycleManager,
    devices: Arc<dyn MediaDevices>,
    speaking_config: SpeakingConfig,
    state: Arc<Mutex<CallState>>,
    speaking_tx: mpsc::UnboundedSender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CallSession {
    pub fn new(
        manager: LifecycleManager,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn PeerFactory>,
        speaking_config: SpeakingConfig,
    ) -> Self {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (speaking_tx, speaking_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(CallState {
            room_id: None,
            peers: PeerOrchestrator::new(factory, outbox),
            tracks: HashMap::new(),
            monitor: None,
            devices: Arc::clone(&devices),
        }));

        let tasks = vec![
            tokio::spawn(route_events(
                manager.subscribe(),
                manager.identity().id.clone(),
                Arc::clone(&state),
            )),
            tokio::spawn(uplink(
                manager.clone(),
                Arc::clone(&state),
                outbox_rx,
                speaking_rx,
            )),
        ];

        Self {
            manager,
            devices,
            speaking_config,
            state,
            speaking_tx,
            tasks,
        }
    }

    pub async fn room_id(&self) -> Option<String> {
        self.state.lock().await.room_id.clone()
    }

    /// Identities we currently hold a peer link to.
    pub async fn peer_ids(&self) -> Vec<String> {
        self.state.lock().await.peers.remote_ids()
    }

    /// Capture the requested media, then join `room_id`. A capture failure
    /// returns before anything else changes.
    ///
    /// Joining the room we are already in keeps the peer links and only
    /// swaps the local tracks.
    pub async fn join_room(&self, room_id: &str, media: MediaFlags) -> Result<(), ClientError> {
        let acquired = self.acquire_all(media).await?;

        let (previous_room, old_monitor) = {
            let mut state = self.state.lock().await;
            let previous_room = state.room_id.clone();
            let old = if previous_room.as_deref() == Some(room_id) {
                debug!(room = %room_id, "Rejoining current room, keeping links");
                state.monitor.take()
            } else {
                let old = state.teardown();
                state.room_id = Some(room_id.to_string());
                old
            };
            state.install_tracks(&acquired);
            state.monitor = acquired
                .iter()
                .find(|t| t.kind == MediaKind::Audio)
                .and_then(|t| self.start_monitor(t));
            (previous_room, old)
        };
        if let Some(monitor) = old_monitor {
            monitor.stop().await;
        }

        info!(room = %room_id, "Joining voice room");
        if let Err(e) = self.manager.join_room(room_id, media).await {
            warn!(room = %room_id, error = %e, "Join failed");
            let monitor = self.state.lock().await.teardown();
            if let Some(monitor) = monitor {
                monitor.stop().await;
            }
            // The server keeps us in the previous room when a join fails.
            if let Some(previous) = previous_room {
                let _ = self.manager.leave_room(&previous).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Tear down every link and local track, then leave the room.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        let (room_id, monitor) = {
            let mut state = self.state.lock().await;
            let room_id = state.room_id.clone();
            (room_id, state.teardown())
        };
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        match room_id {
            Some(room_id) => {
                info!(room = %room_id, "Leaving voice room");
                self.manager.leave_room(&room_id).await
            }
            None => Ok(()),
        }
    }

    /// Switch outgoing video to the camera, the screen, or nothing. Links
    /// keep running; only the track is replaced.
    pub async fn set_video(&self, kind: Option<MediaKind>) -> Result<(), ClientError> {
        let new_track = match kind {
            Some(MediaKind::Audio) => {
                return Err(MediaError::Unsupported("audio is not a video source".into()).into())
            }
            Some(kind) => Some(self.devices.acquire(kind).await?),
            None => None,
        };

        let room_id = {
            let mut state = self.state.lock().await;
            let Some(room_id) = state.room_id.clone() else {
                if let Some(track) = &new_track {
                    self.devices.stop_track(track);
                }
                return Err(ClientError::NotConnected);
            };
            state.peers.replace_track(MediaKind::Camera, new_track.clone());
            let old = match new_track {
                Some(track) => state.tracks.insert(TrackSlot::Video, track),
                None => state.tracks.remove(&TrackSlot::Video),
            };
            if let Some(old) = old {
                self.devices.stop_track(&old);
            }
            room_id
        };

        let patch = StatusPatch {
            video: Some(kind == Some(MediaKind::Camera)),
            screen: Some(kind == Some(MediaKind::Screen)),
            ..StatusPatch::default()
        };
        self.manager.update_status(&room_id, patch).await
    }

    /// Leave the current room, if any, and stop background routing.
    pub async fn close(mut self) -> Result<(), ClientError> {
        let result = self.leave_room().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        result
    }

    async fn acquire_all(&self, media: MediaFlags) -> Result<Vec<LocalTrack>, ClientError> {
        let mut wanted = Vec::new();
        if media.audio {
            wanted.push(MediaKind::Audio);
        }
        if media.screen {
            wanted.push(MediaKind::Screen);
        } else if media.video {
            wanted.push(MediaKind::Camera);
        }

        let mut acquired = Vec::new();
        for kind in wanted {
            match self.devices.acquire(kind).await {
                Ok(track) => acquired.push(track),
                Err(e) => {
                    warn!(?kind, error = %e, "Media acquisition failed");
                    for track in &acquired {
                        self.devices.stop_track(track);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(acquired)
    }

    fn start_monitor(&self, track: &LocalTrack) -> Option<SpeakingMonitor> {
        let source = self.devices.level_source(track)?;
        let (monitor, mut transitions) = SpeakingMonitor::spawn(source, &self.speaking_config);
        let forward = self.speaking_tx.clone();
        tokio::spawn(async move {
            while let Some(speaking) = transitions.recv().await {
                if forward.send(speaking).is_err() {
                    break;
                }
            }
        });
        Some(monitor)
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Feed rosters and relayed signals for our room into the orchestrator.
async fn route_events(
    mut events: broadcast::Receiver<ClientEvent>,
    local_id: String,
    state: Arc<Mutex<CallState>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Call session fell behind on events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match event {
            ClientEvent::RoomRoster {
                room_id,
                participants,
            } => {
                let mut state = state.lock().await;
                if state.room_id.as_deref() != Some(room_id.as_str()) {
                    continue;
                }
                if let Err(e) = state.peers.reconcile(&local_id, &participants).await {
                    warn!(room = %room_id, error = %e, "Peer reconcile incomplete");
                }
            }
            ClientEvent::Lost { error } => {
                // The server drops us from the room; the roster after the
                // rejoin rebuilds the links with the same tracks.
                let mut state = state.lock().await;
                if !state.peers.is_empty() {
                    info!(
                        error = %error,
                        links = state.peers.len(),
                        "Connection lost, closing peer links"
                    );
                    state.peers.close_all();
                }
            }
            ClientEvent::Signal { from, payload } => {
                let mut state = state.lock().await;
                if state.room_id.is_none() {
                    debug!(from = %from, "Signal outside a room dropped");
                    continue;
                }
                if let Err(e) = state.peers.handle_signal(&from, payload).await {
                    warn!(from = %from, error = %e, "Signal not applied");
                }
            }
            _ => {}
        }
    }
}

/// Send orchestrator signals and speaking changes to the server, in order.
async fn uplink(
    manager: LifecycleManager,
    state: Arc<Mutex<CallState>>,
    mut outbox: mpsc::UnboundedReceiver<OutgoingSignal>,
    mut speaking: mpsc::UnboundedReceiver<bool>,
) {
    loop {
        tokio::select! {
            signal = outbox.recv() => {
                let Some(OutgoingSignal { to, payload }) = signal else { return };
                if let Err(e) = manager.relay_signal(&to, payload.to_value()).await {
                    warn!(to = %to, error = %e, "Relay failed");
                }
            }
            changed = speaking.recv() => {
                let Some(changed) = changed else { return };
                let room_id = state.lock().await.room_id.clone();
                if let Some(room_id) = room_id {
                    if let Err(e) = manager
                        .update_status(&room_id, StatusPatch::speaking(changed))
                        .await
                    {
                        warn!(room = %room_id, error = %e, "Speaking update failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
