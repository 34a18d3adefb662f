use std::time::Duration;

use chorus_config::SpeakingConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::detector::SpeakingDetector;

/// A local capture that can be sampled for level.
pub trait AudioLevelSource: Send + 'static {
    /// Samples captured since the last read. `None` once the capture has
    /// ended.
    fn read_frame(&mut self) -> Option<Vec<f32>>;

    /// Free the analysis resources. Called exactly once, when polling stops.
    fn release(&mut self);
}

impl AudioLevelSource for Box<dyn AudioLevelSource> {
    fn read_frame(&mut self) -> Option<Vec<f32>> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Polls an [`AudioLevelSource`] on a tokio interval and reports speaking
/// transitions.
///
/// The source is released when the capture ends, when [`stop`] is called,
/// or when the monitor is dropped.
///
/// [`stop`]: SpeakingMonitor::stop
pub struct SpeakingMonitor {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SpeakingMonitor {
    /// Start polling. Transitions arrive on the returned receiver, which
    /// closes when polling stops.
    pub fn spawn<S: AudioLevelSource>(
        source: S,
        config: &SpeakingConfig,
    ) -> (Self, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let detector = SpeakingDetector::from(config);
        let period = Duration::from_millis(u64::from(config.poll_interval_ms.max(1)));

        let task = tokio::spawn(poll_loop(source, detector, period, tx, stop_rx));
        let monitor = Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        };
        (monitor, rx)
    }

    /// Stop polling and wait until the source has been released.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SpeakingMonitor {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }
}

async fn poll_loop<S: AudioLevelSource>(
    mut source: S,
    mut detector: SpeakingDetector,
    period: Duration,
    tx: mpsc::UnboundedSender<bool>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("Speaking monitor stopped");
                break;
            }
            _ = ticker.tick() => {
                let Some(frame) = source.read_frame() else {
                    info!("Capture ended, stopping speaking monitor");
                    break;
                };
                if let Some(speaking) = detector.push_frame(&frame) {
                    debug!(speaking, level = detector.level(), "Speaking changed");
                    if tx.send(speaking).is_err() {
                        break;
                    }
                }
            }
        }
    }

    if detector.is_speaking() {
        let _ = tx.send(false);
    }
    source.release();
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Plays back scripted frames, then either ends or repeats the last one.
    struct ScriptedSource {
        frames: VecDeque<Vec<f32>>,
        repeat: Option<Vec<f32>>,
        releases: Arc<AtomicU32>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Vec<f32>>, repeat: Option<Vec<f32>>) -> (Self, Arc<AtomicU32>) {
            let releases = Arc::new(AtomicU32::new(0));
            let source = Self {
                frames: frames.into(),
                repeat,
                releases: Arc::clone(&releases),
            };
            (source, releases)
        }
    }

    impl AudioLevelSource for ScriptedSource {
        fn read_frame(&mut self) -> Option<Vec<f32>> {
            self.frames.pop_front().or_else(|| self.repeat.clone())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frames(level: f32, count: usize) -> Vec<Vec<f32>> {
        vec![vec![level, -level, level, -level]; count]
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<bool>) -> Vec<bool> {
        let mut out = Vec::new();
        while let Some(speaking) = rx.recv().await {
            out.push(speaking);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn reports_transitions_and_releases_when_capture_ends() {
        let mut script = frames(0.0, 3);
        script.extend(frames(0.3, 8));
        script.extend(frames(0.0, 15));
        let (source, releases) = ScriptedSource::new(script, None);

        let (_monitor, mut rx) = SpeakingMonitor::spawn(source, &SpeakingConfig::default());
        assert_eq!(collect(&mut rx).await, vec![true, false]);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_ending_mid_speech_reports_silence() {
        let (source, releases) = ScriptedSource::new(frames(0.3, 4), None);

        let (_monitor, mut rx) = SpeakingMonitor::spawn(source, &SpeakingConfig::default());
        assert_eq!(collect(&mut rx).await, vec![true, false]);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_before_returning() {
        let (source, releases) = ScriptedSource::new(vec![], Some(vec![0.0; 4]));
        let (monitor, mut rx) = SpeakingMonitor::spawn(source, &SpeakingConfig::default());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        monitor.stop().await;
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_monitor_releases_the_source() {
        let (source, releases) = ScriptedSource::new(vec![], Some(vec![0.3; 4]));
        let (monitor, mut rx) = SpeakingMonitor::spawn(source, &SpeakingConfig::default());
        assert_eq!(rx.recv().await, Some(true));

        drop(monitor);
        assert_eq!(collect(&mut rx).await, vec![false]);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
