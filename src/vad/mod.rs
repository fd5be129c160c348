//! Energy-gated Voice Activity Detection
//!
//! A frame is "active" when its gain-normalized energy rises above the
//! calibrated noise floor by a fixed activation margin. The detector holds
//! no per-frame state: the same frame and profile always give the same answer.

use crate::audio::FULL_SCALE;
use crate::calibration::CalibrationProfile;
use crate::config::VadConfig;

/// Mean squared sample value with samples mapped to [-1, 1].
pub fn frame_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / FULL_SCALE as f64;
            x * x
        })
        .sum();
    (sum_sq / samples.len() as f64) as f32
}

/// Detailed result of one VAD evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    pub active: bool,
    /// Gain-normalized frame energy
    pub energy: f32,
    /// Energy the frame had to exceed
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    activation_energy: f32,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            activation_energy: config.voice_activation_energy,
        }
    }

    /// Raw energy scaled into the normalized domain (gain applies to
    /// amplitude, so energy scales by gain squared)
    pub fn normalized_energy(frame: &[i16], profile: &CalibrationProfile) -> f32 {
        frame_energy(frame) * profile.gain_factor * profile.gain_factor
    }

    /// Energy a frame must exceed to count as voice under `profile`
    pub fn threshold(&self, profile: &CalibrationProfile) -> f32 {
        profile.noise_floor_energy * profile.gain_factor * profile.gain_factor
            + self.activation_energy
    }

    pub fn evaluate(&self, frame: &[i16], profile: &CalibrationProfile) -> VadDecision {
        let energy = Self::normalized_energy(frame, profile);
        let threshold = self.threshold(profile);
        let active = energy > threshold;

        log::debug!(
            "🎤 VAD: energy={:.6}, threshold={:.6}, active={}",
            energy,
            threshold,
            active
        );

        VadDecision {
            active,
            energy,
            threshold,
        }
    }

    pub fn is_active(&self, frame: &[i16], profile: &CalibrationProfile) -> bool {
        self.evaluate(frame, profile).active
    }
}
