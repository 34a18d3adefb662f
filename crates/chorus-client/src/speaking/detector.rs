use chorus_config::SpeakingConfig;

/// Turns a stream of energy readings into speaking/not-speaking
/// transitions.
#[derive(Debug, Clone)]
pub struct SpeakingDetector {
    threshold: f64,
    smoothing: f64,
    level: f64,
    speaking: bool,
}

impl SpeakingDetector {
    /// `smoothing` is clamped into `[0, 1)`; 0 disables smoothing.
    pub fn new(threshold: f64, smoothing: f64) -> Self {
        let smoothing = if smoothing.is_finite() {
            smoothing.clamp(0.0, 0.99)
        } else {
            0.0
        };
        Self {
            threshold,
            smoothing,
            level: 0.0,
            speaking: false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Current smoothed level.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Feed one energy reading. Returns the new state only when it flips.
    pub fn push(&mut self, energy: f64) -> Option<bool> {
        let energy = if energy.is_finite() { energy.max(0.0) } else { 0.0 };
        self.level = self.smoothing * self.level + (1.0 - self.smoothing) * energy;

        let speaking = self.level >= self.threshold;
        if speaking == self.speaking {
            return None;
        }
        self.speaking = speaking;
        Some(speaking)
    }

    /// Feed one window of samples.
    pub fn push_frame(&mut self, samples: &[f32]) -> Option<bool> {
        self.push(rms(samples))
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
        self.speaking = false;
    }
}

impl From<&SpeakingConfig> for SpeakingDetector {
    fn from(config: &SpeakingConfig) -> Self {
        Self::new(config.threshold, config.smoothing)
    }
}

/// Root-mean-square of a sample window. Empty windows are silent.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| f64::from(*s).powi(2)).sum();
    (sum / samples.len() as f64).sqrt()
}
