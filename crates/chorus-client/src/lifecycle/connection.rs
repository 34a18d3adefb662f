//! Background driver task: owns the transport, runs the state machine, and
//! serializes every reconnect attempt.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chorus_common::{
    close_codes, ClientFrame, ClientOp, MediaFlags, PublicIdentity, ServerMessage, SessionId,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::machine::{Backoff, ConnectionMachine};
use super::transport::{Connector, Inbound, TransportLink};
use super::types::{Ack, ClientEvent, Command, ConnectionState, LifecycleConfig, LossKind};
use crate::errors::{ClientError, TransportError};

type Reply = oneshot::Sender<Result<Ack, ClientError>>;

/// An op waiting for its ack.
struct Pending {
    /// Kept for membership-changing ops so a positive ack can be recorded.
    tracked: Option<ClientOp>,
    reply: Option<Reply>,
    /// No caller waits past this; an ack arriving later is ignored.
    deadline: Instant,
}

/// Server-confirmed memberships, replayed after a reconnect.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Memberships {
    communities: BTreeSet<String>,
    room: Option<(String, MediaFlags)>,
    channels: BTreeSet<String>,
    watched: BTreeSet<String>,
}

impl Memberships {
    fn tracks(op: &ClientOp) -> bool {
        matches!(
            op,
            ClientOp::JoinCommunity { .. }
                | ClientOp::LeaveCommunity { .. }
                | ClientOp::JoinRoom { .. }
                | ClientOp::LeaveRoom { .. }
                | ClientOp::UpdateStatus { .. }
                | ClientOp::SubscribeChannel { .. }
                | ClientOp::UnsubscribeChannel { .. }
                | ClientOp::WatchRoom { .. }
                | ClientOp::UnwatchRoom { .. }
        )
    }

    /// Apply a positively acknowledged op.
    fn record(&mut self, op: &ClientOp) {
        match op {
            ClientOp::JoinCommunity { community_id } => {
                self.communities.insert(community_id.clone());
            }
            ClientOp::LeaveCommunity { community_id } => {
                self.communities.remove(community_id);
            }
            ClientOp::JoinRoom { room_id, media } => {
                self.room = Some((room_id.clone(), *media));
            }
            ClientOp::LeaveRoom { room_id } => self.forget_room(room_id),
            ClientOp::UpdateStatus { room_id, patch } => {
                if let Some((current, media)) = &mut self.room {
                    if current == room_id {
                        media.audio = patch.audio.unwrap_or(media.audio);
                        media.video = patch.video.unwrap_or(media.video);
                        media.screen = patch.screen.unwrap_or(media.screen);
                    }
                }
            }
            ClientOp::SubscribeChannel { channel_id } => {
                self.channels.insert(channel_id.clone());
            }
            ClientOp::UnsubscribeChannel { channel_id } => {
                self.channels.remove(channel_id);
            }
            ClientOp::WatchRoom { room_id } => {
                self.watched.insert(room_id.clone());
            }
            ClientOp::UnwatchRoom { room_id } => {
                self.watched.remove(room_id);
            }
            _ => {}
        }
    }

    /// A replayed join was refused; stop replaying it.
    fn forget(&mut self, op: &ClientOp) {
        match op {
            ClientOp::JoinCommunity { community_id } => {
                self.communities.remove(community_id);
            }
            ClientOp::JoinRoom { room_id, .. } => self.forget_room(room_id),
            ClientOp::SubscribeChannel { channel_id } => {
                self.channels.remove(channel_id);
            }
            ClientOp::WatchRoom { room_id } => {
                self.watched.remove(room_id);
            }
            _ => {}
        }
    }

    fn forget_room(&mut self, room_id: &str) {
        if self.room.as_ref().is_some_and(|(current, _)| current == room_id) {
            self.room = None;
        }
    }

    fn replay_ops(&self) -> Vec<ClientOp> {
        let mut ops: Vec<ClientOp> = self
            .communities
            .iter()
            .map(|c| ClientOp::JoinCommunity {
                community_id: c.clone(),
            })
            .collect();
        if let Some((room_id, media)) = &self.room {
            ops.push(ClientOp::JoinRoom {
                room_id: room_id.clone(),
                media: *media,
            });
        }
        ops.extend(self.channels.iter().map(|c| ClientOp::SubscribeChannel {
            channel_id: c.clone(),
        }));
        ops.extend(self.watched.iter().map(|r| ClientOp::WatchRoom {
            room_id: r.clone(),
        }));
        ops
    }
}

/// How a connected session ended.
enum SessionEnd {
    Lost(LossKind),
    Closed(Option<oneshot::Sender<()>>),
}

/// Map a transport close to a loss kind.
pub(crate) fn classify_close(code: Option<u16>, reason: String, server_error: Option<String>) -> LossKind {
    match code {
        Some(close_codes::AUTH_FAILED) => {
            LossKind::Unrecoverable(ClientError::Authentication(server_error.unwrap_or(reason)))
        }
        Some(code) if close_codes::is_server_initiated(code) => {
            LossKind::Unrecoverable(ClientError::ServerClosed { code, reason })
        }
        _ => LossKind::Recoverable(reason),
    }
}

pub(crate) struct Driver {
    url: String,
    token: String,
    config: LifecycleConfig,
    connector: Arc<dyn Connector>,
    machine: ConnectionMachine,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    recent_retries: Arc<AtomicU32>,
    pending: HashMap<u64, Pending>,
    next_id: u64,
    memberships: Memberships,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: String,
        token: String,
        config: LifecycleConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::Receiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        events: broadcast::Sender<ClientEvent>,
        recent_retries: Arc<AtomicU32>,
    ) -> Self {
        let machine = ConnectionMachine::new(
            config.max_reconnect_attempts,
            Backoff::new(config.reconnect_delay, config.max_reconnect_delay),
        );
        Self {
            url,
            token,
            config,
            connector,
            machine,
            commands,
            state_tx,
            events,
            recent_retries,
            pending: HashMap::new(),
            next_id: 0,
            memberships: Memberships::default(),
        }
    }

    /// Run until every handle to this driver is dropped.
    pub(crate) async fn run(mut self) {
        self.machine.start();
        self.publish();

        loop {
            match self.machine.state() {
                ConnectionState::Connecting => self.connect_and_serve().await,
                ConnectionState::Reconnecting => match self.machine.next_retry() {
                    Some(delay) => {
                        info!(
                            attempt = self.machine.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            "Reconnecting after backoff"
                        );
                        if !self.wait(delay).await {
                            return;
                        }
                        self.machine.begin_retry();
                        self.publish();
                    }
                    None => self.publish(),
                },
                ConnectionState::Connected
                | ConnectionState::Failed
                | ConnectionState::Disconnected => {
                    if !self.idle().await {
                        return;
                    }
                }
            }
        }
    }

    async fn connect_and_serve(&mut self) {
        let mut link = match self.open().await {
            Ok(link) => link,
            Err(kind) => {
                warn!(url = %self.url, error = %kind.to_error(), "Connect attempt failed");
                self.emit(ClientEvent::Lost {
                    error: kind.to_error(),
                });
                self.machine.on_connect_failed(&kind);
                self.publish();
                return;
            }
        };

        self.machine.on_open();
        self.recent_retries
            .store(self.machine.last_retries(), Ordering::Relaxed);
        self.publish();

        for op in self.memberships.replay_ops() {
            debug!(op = op.name(), "Replaying membership");
            if let Err(e) = self.transmit(link.as_mut(), op, None).await {
                self.end_session(link, SessionEnd::Lost(LossKind::Recoverable(e.to_string())))
                    .await;
                return;
            }
        }

        let end = self.serve(link.as_mut()).await;
        self.end_session(link, end).await;
    }

    async fn end_session(&mut self, mut link: Box<dyn TransportLink>, end: SessionEnd) {
        match end {
            SessionEnd::Lost(kind) => {
                let error = kind.to_error();
                info!(error = %error, "Connection lost");
                self.fail_pending(&error);
                self.emit(ClientEvent::Lost { error });
                self.machine.on_loss(&kind);
                self.publish();
            }
            SessionEnd::Closed(done) => {
                link.close().await;
                info!("Connection closed by client");
                self.fail_pending(&ClientError::Shutdown);
                self.machine.close();
                self.publish();
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Connect and complete the hello handshake.
    async fn open(&mut self) -> Result<Box<dyn TransportLink>, LossKind> {
        info!(url = %self.url, "Connecting");
        let connect =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&self.url))
                .await;
        let mut link = match connect {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(LossKind::Recoverable(e.to_string())),
            Err(_) => return Err(LossKind::Recoverable("connect timed out".into())),
        };

        let handshake = tokio::time::timeout(
            self.config.connect_timeout,
            self.handshake(link.as_mut()),
        )
        .await
        .unwrap_or_else(|_| Err(LossKind::Recoverable("handshake timed out".into())));

        match handshake {
            Ok((session_id, identity)) => {
                info!(session = %session_id, identity = %identity.id, "Connected");
                self.emit(ClientEvent::Connected {
                    session_id,
                    identity,
                });
                Ok(link)
            }
            Err(kind) => {
                link.close().await;
                Err(kind)
            }
        }
    }

    async fn handshake(
        &mut self,
        link: &mut dyn TransportLink,
    ) -> Result<(SessionId, PublicIdentity), LossKind> {
        let id = self.take_id();
        let hello = ClientFrame::new(
            id,
            ClientOp::Hello {
                token: self.token.clone(),
            },
        );
        let text = serde_json::to_string(&hello)
            .map_err(|e| LossKind::Recoverable(format!("encode hello: {e}")))?;
        link.send(text)
            .await
            .map_err(|e| LossKind::Recoverable(e.to_string()))?;

        let mut server_error = None;
        loop {
            match link.recv().await {
                Inbound::Text(text) => match ServerMessage::parse(&text) {
                    Ok(ServerMessage::Welcome {
                        session_id,
                        identity,
                    }) => return Ok((session_id, identity)),
                    Ok(ServerMessage::Error { message }) => server_error = Some(message),
                    Ok(ServerMessage::Ack {
                        id: ack_id,
                        ok: false,
                        error,
                        ..
                    }) if ack_id == id => {
                        let reason = error.unwrap_or_else(|| "hello rejected".into());
                        return Err(LossKind::Unrecoverable(ClientError::Authentication(reason)));
                    }
                    Ok(other) => debug!(?other, "Ignoring message before welcome"),
                    Err(e) => warn!(error = %e, "Malformed message during handshake"),
                },
                Inbound::Closed { code, reason } => {
                    return Err(classify_close(code, reason, server_error));
                }
            }
        }
    }

    async fn serve(&mut self, link: &mut dyn TransportLink) -> SessionEnd {
        let period = self.config.heartbeat_interval.max(Duration::from_millis(10));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                inbound = link.recv() => match inbound {
                    Inbound::Text(text) => self.on_text(&text),
                    Inbound::Closed { code, reason } => {
                        return SessionEnd::Lost(classify_close(code, reason, None));
                    }
                },

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send { op, reply }) => {
                        if let Err(e) = self.transmit(link, op, Some(reply)).await {
                            return SessionEnd::Lost(LossKind::Recoverable(e.to_string()));
                        }
                    }
                    Some(Command::ForceReconnect) => debug!("Already connected, ignoring force reconnect"),
                    Some(Command::Close { done }) => return SessionEnd::Closed(Some(done)),
                    None => return SessionEnd::Closed(None),
                },

                _ = heartbeat.tick() => {
                    self.expire_pending(Instant::now());
                    if let Err(e) = self.transmit(link, ClientOp::Ping, None).await {
                        return SessionEnd::Lost(LossKind::Recoverable(e.to_string()));
                    }
                }
            }
        }
    }

    /// Sleep out a backoff delay while still answering commands. Returns
    /// false if the driver should exit.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.on_offline_command(cmd) {
                            return true;
                        }
                    }
                    None => return false,
                },
            }
        }
    }

    /// Wait in `Failed`/`Disconnected` until a command changes the state.
    async fn idle(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(cmd) => {
                    if self.on_offline_command(cmd) {
                        return true;
                    }
                }
                None => return false,
            }
        }
    }

    /// Handle a command while no connection is open. Returns true if the
    /// state changed.
    fn on_offline_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Send { reply, .. } => {
                let _ = reply.send(Err(ClientError::NotConnected));
                false
            }
            Command::ForceReconnect => {
                let changed = self.machine.force_reconnect();
                self.publish();
                changed
            }
            Command::Close { done } => {
                let was = self.machine.state();
                self.machine.close();
                self.publish();
                let _ = done.send(());
                was != ConnectionState::Disconnected
            }
        }
    }

    async fn transmit(
        &mut self,
        link: &mut dyn TransportLink,
        op: ClientOp,
        reply: Option<Reply>,
    ) -> Result<(), TransportError> {
        let id = self.take_id();
        let tracked = Memberships::tracks(&op).then(|| op.clone());
        let frame = ClientFrame::new(id, op);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(ClientError::Rejected(format!("encode failed: {e}"))));
                }
                return Ok(());
            }
        };
        debug!(id, op = frame.op.name(), "Sending op");
        let deadline = Instant::now() + self.config.max_ack_timeout;
        self.pending.insert(
            id,
            Pending {
                tracked,
                reply,
                deadline,
            },
        );
        link.send(text).await
    }

    fn on_text(&mut self, text: &str) {
        let msg = match ServerMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Malformed server message");
                return;
            }
        };

        match msg {
            ServerMessage::Ack {
                id,
                ok,
                data,
                error,
            } => self.on_ack(id, ok, data, error),
            ServerMessage::Welcome { .. } => debug!("Duplicate welcome ignored"),
            ServerMessage::CommunityRoster {
                community_id,
                members,
            } => self.emit(ClientEvent::CommunityRoster {
                community_id,
                members,
            }),
            ServerMessage::RoomRoster {
                room_id,
                participants,
            } => self.emit(ClientEvent::RoomRoster {
                room_id,
                participants,
            }),
            ServerMessage::SignalReceived { from, payload } => {
                self.emit(ClientEvent::Signal { from, payload })
            }
            ServerMessage::MessageCreated { message } => self.emit(ClientEvent::Message(message)),
            ServerMessage::Error { message } => {
                warn!(message = %message, "Server error");
                self.emit(ClientEvent::ServerError(message));
            }
        }
    }

    fn on_ack(
        &mut self,
        id: u64,
        ok: bool,
        data: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!(id, "Ack for unknown op");
            return;
        };

        if let Some(op) = &pending.tracked {
            if ok {
                self.memberships.record(op);
            } else {
                self.memberships.forget(op);
            }
        }

        if let Some(reply) = pending.reply {
            let result = if ok {
                Ok(Ack { id, data })
            } else {
                Err(ClientError::Rejected(
                    error.unwrap_or_else(|| "rejected".into()),
                ))
            };
            let _ = reply.send(result);
        }
    }

    /// Forget ops whose ack is overdue, heartbeat pings included.
    fn expire_pending(&mut self, now: Instant) {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.deadline > now);
        let expired = before - self.pending.len();
        if expired > 0 {
            debug!(expired, "Dropped overdue ops");
        }
    }

    fn fail_pending(&mut self, error: &ClientError) {
        for (_, pending) in self.pending.drain() {
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }

    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn publish(&self) {
        let state = self.machine.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(state = ?state, "Connection state changed");
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}
