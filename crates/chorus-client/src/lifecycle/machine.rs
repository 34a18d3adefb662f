//! Connection state machine and reconnect backoff.
//!
//! Pure bookkeeping: the driver task feeds it transport outcomes and asks
//! it what to do next. It never sleeps or does I/O itself.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use super::types::{ConnectionState, LossKind};

/// Capped exponential backoff with equal jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Upper bound of the delay before retry `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry `attempt`: uniformly in `[ceiling / 2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    /// Retries made since the last successful open.
    attempts: u32,
    /// Retries it took to reach the current connection.
    last_retries: u32,
    max_attempts: u32,
    backoff: Backoff,
}

impl ConnectionMachine {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            last_retries: 0,
            max_attempts,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_retries(&self) -> u32 {
        self.last_retries
    }

    /// First connect. Only valid from `Disconnected`.
    pub fn start(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
        true
    }

    /// Handshake completed.
    pub fn on_open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.last_retries = self.attempts;
            self.attempts = 0;
            self.state = ConnectionState::Connected;
        }
    }

    /// A connect attempt failed before the handshake completed.
    pub fn on_connect_failed(&mut self, kind: &LossKind) {
        if self.state == ConnectionState::Connecting {
            self.fail_or_retry(kind);
        }
    }

    /// An open connection was lost.
    pub fn on_loss(&mut self, kind: &LossKind) {
        if self.state == ConnectionState::Connected {
            self.fail_or_retry(kind);
        }
    }

    /// In `Reconnecting`, claim the next retry and return how long to wait
    /// before it. Past the attempt bound this moves to `Failed` and returns
    /// `None`.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if self.state != ConnectionState::Reconnecting {
            return None;
        }
        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, "Reconnect attempts exhausted");
            self.state = ConnectionState::Failed;
            return None;
        }
        self.attempts += 1;
        Some(self.backoff.delay(self.attempts))
    }

    /// The backoff delay elapsed; start the claimed attempt.
    pub fn begin_retry(&mut self) {
        if self.state == ConnectionState::Reconnecting {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Deliberate close by the caller.
    pub fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Leave `Failed`/`Disconnected` with a fresh attempt budget.
    pub fn force_reconnect(&mut self) -> bool {
        match self.state {
            ConnectionState::Failed | ConnectionState::Disconnected => {
                info!("Forced reconnect");
                self.attempts = 0;
                self.state = ConnectionState::Connecting;
                true
            }
            _ => false,
        }
    }

    fn fail_or_retry(&mut self, kind: &LossKind) {
        self.state = match kind {
            LossKind::Unrecoverable(_) => ConnectionState::Failed,
            LossKind::Recoverable(_) => ConnectionState::Reconnecting,
        };
    }
}
