use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chorus_common::{
    ClientFrame, ClientOp, MediaFlags, Participant, PublicIdentity, ServerMessage, SessionId,
};
use chorus_config::SpeakingConfig;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::errors::MediaError;
use crate::identity::Identity;
use crate::lifecycle::fake::{FakeConnector, FakeServerEnd};
use crate::lifecycle::{ConnectionState, Inbound, LifecycleConfig};
use crate::peers::fake::{FakeFactory, Log};
use crate::peers::SignalPayload;

struct FakeDevices {
    log: Log,
    deny: Option<MediaKind>,
    mic_level: f32,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<LocalTrack, MediaError> {
        if self.deny == Some(kind) {
            return Err(MediaError::PermissionDenied);
        }
        let id = format!("{kind:?}").to_lowercase();
        self.log.push(format!("acquire {id}"));
        Ok(LocalTrack::new(id, kind))
    }

    fn stop_track(&self, track: &LocalTrack) {
        self.log.push(format!("stop {}", track.id));
    }

    fn level_source(&self, track: &LocalTrack) -> Option<Box<dyn AudioLevelSource>> {
        (track.kind == MediaKind::Audio).then(|| {
            Box::new(ConstantSource {
                level: self.mic_level,
                log: self.log.clone(),
            }) as Box<dyn AudioLevelSource>
        })
    }
}

struct ConstantSource {
    level: f32,
    log: Log,
}

impl AudioLevelSource for ConstantSource {
    fn read_frame(&mut self) -> Option<Vec<f32>> {
        Some(vec![self.level, -self.level])
    }

    fn release(&mut self) {
        self.log.push("release level source".into());
    }
}

struct Harness {
    call: CallSession,
    log: Log,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    /// Sender into the most recently accepted connection.
    to_client: Arc<StdMutex<mpsc::UnboundedSender<Inbound>>>,
}

impl Harness {
    fn push(&self, msg: ServerMessage) {
        self.to_client
            .lock()
            .unwrap()
            .send(Inbound::Text(msg.to_json().unwrap()))
            .unwrap();
    }

    /// Drop the transport as if the network went away.
    fn reset(&self) {
        let _ = self.to_client.lock().unwrap().send(Inbound::Closed {
            code: None,
            reason: "reset".into(),
        });
    }

    fn roster(&self, room_id: &str, participants: Vec<Participant>) {
        self.push(ServerMessage::RoomRoster {
            room_id: room_id.into(),
            participants,
        });
    }

    /// Skip frames until one with the given op name arrives.
    async fn expect_op(&mut self, name: &str) -> ClientOp {
        loop {
            let frame = self.frames.recv().await.expect("server gone");
            if frame.op.name() == name {
                return frame.op;
            }
        }
    }

    async fn wait_for_peers(&self, expected: &[&str]) {
        for _ in 0..200 {
            if self.call.peer_ids().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peers never became {expected:?}");
    }
}

/// Acks every op like a cooperative server, noting each op in `log`.
async fn auto_ack(mut end: FakeServerEnd, log: Log, frames: mpsc::UnboundedSender<ClientFrame>) {
    while let Some(text) = end.from_client.recv().await {
        let frame = ClientFrame::parse(&text).unwrap();
        let reply = match &frame.op {
            ClientOp::Hello { .. } => {
                let welcome = ServerMessage::Welcome {
                    session_id: SessionId::new(),
                    identity: PublicIdentity::new("alice", "Alice"),
                };
                let _ = end.to_client.send(Inbound::Text(welcome.to_json().unwrap()));
                ServerMessage::ok(frame.id)
            }
            ClientOp::Ping => ServerMessage::ok(frame.id),
            op => {
                log.push(format!("server: {}", op.name()));
                ServerMessage::ok(frame.id)
            }
        };
        let _ = end.to_client.send(Inbound::Text(reply.to_json().unwrap()));
        if frame.op != ClientOp::Ping {
            let _ = frames.send(frame);
        }
    }
}

/// Serves every connection the client opens, newest first for `current`.
async fn serve(
    mut accepted: mpsc::UnboundedReceiver<FakeServerEnd>,
    current: Arc<StdMutex<mpsc::UnboundedSender<Inbound>>>,
    log: Log,
    frames: mpsc::UnboundedSender<ClientFrame>,
) {
    while let Some(end) = accepted.recv().await {
        *current.lock().unwrap() = end.to_client.clone();
        tokio::spawn(auto_ack(end, log.clone(), frames.clone()));
    }
}

async fn harness(deny: Option<MediaKind>, mic_level: f32) -> Harness {
    let log = Log::default();
    let (connector, accepted) = FakeConnector::new(vec![], true);
    let manager = LifecycleManager::spawn(
        Identity::new("alice", "tok"),
        "ws://fake",
        LifecycleConfig::default(),
        Arc::new(connector),
    );

    let (placeholder, _) = mpsc::unbounded_channel();
    let to_client = Arc::new(StdMutex::new(placeholder));
    let (frames_tx, frames) = mpsc::unbounded_channel();
    tokio::spawn(serve(
        accepted,
        Arc::clone(&to_client),
        log.clone(),
        frames_tx,
    ));
    manager
        .wait_for(|s| s == ConnectionState::Connected)
        .await
        .unwrap();

    let devices = Arc::new(FakeDevices {
        log: log.clone(),
        deny,
        mic_level,
    });
    let factory = Arc::new(FakeFactory::new(log.clone()));
    let call = CallSession::new(manager, devices, factory, SpeakingConfig::default());

    let mut harness = Harness {
        call,
        log,
        frames,
        to_client,
    };
    // Drop the hello.
    harness.expect_op("hello").await;
    harness
}

fn participant(id: &str, joined_secs: i64) -> Participant {
    Participant::new(
        &PublicIdentity::new(id, id),
        MediaFlags::default(),
        Utc.timestamp_opt(1_700_000_000 + joined_secs, 0).unwrap(),
    )
}

fn position(entries: &[String], needle: &str) -> usize {
    entries
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("{needle:?} missing from {entries:?}"))
}

const AUDIO: MediaFlags = MediaFlags {
    audio: true,
    video: false,
    screen: false,
};

#[tokio::test(start_paused = true)]
async fn denied_media_changes_nothing() {
    let mut h = harness(Some(MediaKind::Camera), 0.0).await;

    let media = MediaFlags {
        audio: true,
        video: true,
        screen: false,
    };
    let err = h.call.join_room("r1", media).await.unwrap_err();
    assert_eq!(err, ClientError::MediaAcquisition(MediaError::PermissionDenied));
    assert_eq!(h.call.room_id().await, None);
    assert_eq!(h.log.take(), vec!["acquire audio", "stop audio"]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.frames.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn roster_drives_links_and_leave_tears_down_first() {
    let mut h = harness(None, 0.0).await;

    h.call.join_room("r1", AUDIO).await.unwrap();
    assert_eq!(h.expect_op("room.join").await, ClientOp::JoinRoom {
        room_id: "r1".into(),
        media: AUDIO,
    });

    h.roster("r1", vec![participant("alice", 0), participant("bob", 5)]);
    h.wait_for_peers(&["bob"]).await;

    match h.expect_op("signal.relay").await {
        ClientOp::RelaySignal { to, payload } => {
            assert_eq!(to, "bob");
            assert_eq!(payload, json!({"kind": "offer", "sdp": "offer-to-bob"}));
        }
        other => panic!("unexpected {other:?}"),
    }

    h.call.leave_room().await.unwrap();
    let entries = h.log.snapshot();
    let closed = position(&entries, "bob: close");
    let stopped = position(&entries, "stop audio");
    let released = position(&entries, "release level source");
    let left = position(&entries, "server: room.leave");
    assert!(closed < left);
    assert!(stopped < left);
    assert!(released < left);
    assert!(h.call.peer_ids().await.is_empty());
    assert_eq!(h.call.room_id().await, None);
}

#[tokio::test(start_paused = true)]
async fn rosters_for_other_rooms_are_ignored() {
    let h = harness(None, 0.0).await;
    h.call.join_room("r1", MediaFlags::default()).await.unwrap();

    h.roster("r2", vec![participant("alice", 0), participant("bob", 1)]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.call.peer_ids().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn speaking_changes_become_status_updates() {
    let mut h = harness(None, 0.4).await;
    h.call.join_room("r1", AUDIO).await.unwrap();

    assert_eq!(
        h.expect_op("room.statusUpdate").await,
        ClientOp::UpdateStatus {
            room_id: "r1".into(),
            patch: StatusPatch::speaking(true),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn video_switch_replaces_track_without_new_links() {
    let mut h = harness(None, 0.0).await;
    h.call.join_room("r1", MediaFlags::default()).await.unwrap();
    h.roster("r1", vec![participant("alice", 0), participant("bob", 5)]);
    h.wait_for_peers(&["bob"]).await;
    h.log.take();

    h.call.set_video(Some(MediaKind::Screen)).await.unwrap();
    assert_eq!(
        h.log.take(),
        vec!["acquire screen", "bob: Video = screen", "server: room.statusUpdate"]
    );
    assert_eq!(
        h.expect_op("room.statusUpdate").await,
        ClientOp::UpdateStatus {
            room_id: "r1".into(),
            patch: StatusPatch {
                video: Some(false),
                screen: Some(true),
                ..StatusPatch::default()
            },
        }
    );

    h.call.set_video(Some(MediaKind::Camera)).await.unwrap();
    h.call.set_video(None).await.unwrap();
    let entries = h.log.take();
    assert!(entries.contains(&"stop screen".to_string()));
    assert!(entries.contains(&"stop camera".to_string()));
    assert!(entries.contains(&"bob: Video = none".to_string()));
    assert!(!entries.iter().any(|e| e == "bob: offer"));
    assert_eq!(h.call.peer_ids().await, vec!["bob"]);
}

#[tokio::test(start_paused = true)]
async fn video_switch_outside_a_room_is_refused() {
    let h = harness(None, 0.0).await;
    let err = h.call.set_video(Some(MediaKind::Camera)).await.unwrap_err();
    assert_eq!(err, ClientError::NotConnected);
    assert_eq!(h.log.take(), vec!["acquire camera", "stop camera"]);
}

#[tokio::test(start_paused = true)]
async fn relayed_offer_is_answered() {
    let mut h = harness(None, 0.0).await;
    h.call.join_room("r1", MediaFlags::default()).await.unwrap();
    h.roster("r1", vec![participant("bob", 0), participant("alice", 5)]);
    h.wait_for_peers(&["bob"]).await;

    h.push(ServerMessage::SignalReceived {
        from: "bob".into(),
        payload: SignalPayload::Offer { sdp: "o1".into() }.to_value(),
    });

    match h.expect_op("signal.relay").await {
        ClientOp::RelaySignal { to, payload } => {
            assert_eq!(to, "bob");
            assert_eq!(payload, json!({"kind": "answer", "sdp": "answer-to-bob"}));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rejoining_after_leave_does_not_reuse_stopped_tracks() {
    let h = harness(None, 0.0).await;
    let camera = MediaFlags {
        audio: false,
        video: true,
        screen: false,
    };
    h.call.join_room("r1", camera).await.unwrap();
    h.call.leave_room().await.unwrap();
    assert!(h.log.take().contains(&"stop camera".to_string()));

    h.call.join_room("r2", MediaFlags::default()).await.unwrap();
    h.roster("r2", vec![participant("alice", 0), participant("bob", 5)]);
    h.wait_for_peers(&["bob"]).await;

    let entries = h.log.snapshot();
    assert!(entries.contains(&"bob: offer".to_string()));
    assert!(
        !entries.iter().any(|e| e.starts_with("bob: Video")),
        "stale track attached: {entries:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn joining_the_current_room_again_keeps_links() {
    let mut h = harness(None, 0.0).await;
    h.call.join_room("r1", AUDIO).await.unwrap();
    h.roster("r1", vec![participant("alice", 0), participant("bob", 5)]);
    h.wait_for_peers(&["bob"]).await;
    h.expect_op("signal.relay").await;
    h.log.take();

    h.call.join_room("r1", AUDIO).await.unwrap();

    assert_eq!(h.call.room_id().await.as_deref(), Some("r1"));
    assert_eq!(h.call.peer_ids().await, vec!["bob"]);
    let entries = h.log.take();
    assert!(!entries.contains(&"bob: close".to_string()), "{entries:?}");
    assert!(entries.contains(&"stop audio".to_string()));
    assert!(entries.contains(&"bob: Audio = audio".to_string()));
    assert!(entries.contains(&"server: room.join".to_string()));
}

#[tokio::test(start_paused = true)]
async fn connection_loss_rebuilds_links_from_the_next_roster() {
    let mut h = harness(None, 0.0).await;
    h.call.join_room("r1", MediaFlags::default()).await.unwrap();
    h.roster("r1", vec![participant("alice", 0), participant("bob", 5)]);
    h.wait_for_peers(&["bob"]).await;
    h.log.take();

    h.reset();
    h.wait_for_peers(&[]).await;
    let entries = h.log.take();
    assert!(entries.contains(&"bob: close".to_string()), "{entries:?}");
    assert!(entries.contains(&"bob: release sink".to_string()));

    // Skip everything up to the replayed join on the new connection.
    h.expect_op("hello").await;
    assert_eq!(
        h.expect_op("room.join").await,
        ClientOp::JoinRoom {
            room_id: "r1".into(),
            media: MediaFlags::default(),
        }
    );
    assert_eq!(h.call.room_id().await.as_deref(), Some("r1"));

    // Bob now has the earlier join and offers to the fresh link.
    h.roster("r1", vec![participant("bob", 5), participant("alice", 60)]);
    h.wait_for_peers(&["bob"]).await;
    h.push(ServerMessage::SignalReceived {
        from: "bob".into(),
        payload: SignalPayload::Offer { sdp: "o2".into() }.to_value(),
    });
    match h.expect_op("signal.relay").await {
        ClientOp::RelaySignal { to, payload } => {
            assert_eq!(to, "bob");
            assert_eq!(payload, json!({"kind": "answer", "sdp": "answer-to-bob"}));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.log.take().contains(&"bob: remote offer o2".to_string()));
}
