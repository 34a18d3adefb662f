//! Recording peer connections for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::types::{
    IceCandidate, LocalTrack, PeerConnection, PeerFactory, RenderSink, SignalOutbox, TrackSlot,
};
use crate::errors::PeerError;

/// Every call made on connections and sinks, in order.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct FakeConn {
    remote: String,
    log: Log,
}

#[async_trait]
impl PeerConnection for FakeConn {
    async fn create_offer(&mut self) -> Result<String, PeerError> {
        self.log.push(format!("{}: offer", self.remote));
        Ok(format!("offer-to-{}", self.remote))
    }

    async fn accept_offer(&mut self, sdp: &str) -> Result<String, PeerError> {
        self.log.push(format!("{}: remote offer {sdp}", self.remote));
        Ok(format!("answer-to-{}", self.remote))
    }

    async fn accept_answer(&mut self, sdp: &str) -> Result<(), PeerError> {
        self.log.push(format!("{}: remote answer {sdp}", self.remote));
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), PeerError> {
        self.log
            .push(format!("{}: candidate {}", self.remote, candidate.candidate));
        Ok(())
    }

    fn set_track(&mut self, slot: TrackSlot, track: Option<&LocalTrack>) {
        let id = track.map_or("none", |t| t.id.as_str());
        self.log.push(format!("{}: {slot:?} = {id}", self.remote));
    }

    fn close(&mut self) {
        self.log.push(format!("{}: close", self.remote));
    }
}

struct FakeSink {
    remote: String,
    log: Log,
}

impl RenderSink for FakeSink {
    fn release(&mut self) {
        self.log.push(format!("{}: release sink", self.remote));
    }
}

/// Connecting to the identity `broken` fails.
pub struct FakeFactory {
    log: Log,
}

impl FakeFactory {
    pub fn new(log: Log) -> Self {
        Self { log }
    }
}

impl PeerFactory for FakeFactory {
    fn connect(
        &self,
        remote_id: &str,
        _outbox: SignalOutbox,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        if remote_id == "broken" {
            return Err(PeerError::Connection("no route".into()));
        }
        Ok(Box::new(FakeConn {
            remote: remote_id.to_string(),
            log: self.log.clone(),
        }))
    }

    fn render_sink(&self, remote_id: &str) -> Box<dyn RenderSink> {
        Box::new(FakeSink {
            remote: remote_id.to_string(),
            log: self.log.clone(),
        })
    }
}
