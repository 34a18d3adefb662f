//! Speaking detection for the local capture.

mod detector;
mod monitor;

pub use detector::{rms, SpeakingDetector};
pub use monitor::{AudioLevelSource, SpeakingMonitor};
