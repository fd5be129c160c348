//! Boot-time signal calibration.
//!
//! Phase 1 averages per-frame energy over `noise_floor_samples` frames of
//! (assumed) silence to estimate the noise floor. Phase 2, when auto gain is
//! enabled, runs a fixed number of frames through a first-order gain loop that
//! steers normalized energy towards `target_energy`. Both phases are bounded by
//! frame count; calibration never waits on convergence.
//!
//! Unusable input (speech during the noise-floor phase, a source that runs
//! dry) yields [`CalibrationProfile::fallback`] plus the reason, never an error.

use thiserror::Error;

use crate::audio::AudioFrame;
use crate::config::CalibrationConfig;
use crate::vad::frame_energy;

/// Lowest gain the auto-gain loop may settle on
pub const MIN_GAIN_FACTOR: f32 = 0.25;
/// Highest gain; beyond this ordinary speech saturates the sample range
pub const MAX_GAIN_FACTOR: f32 = 8.0;
/// Fraction of the gain error corrected per frame
const AGC_RATE: f32 = 0.2;
/// Frames quieter than this carry no level information
const MIN_AGC_ENERGY: f32 = 1e-9;
/// A spike must also be at least this loud to count (keeps near-digital
/// silence with a single click from tripping the ratio test)
const SPIKE_ENERGY_FLOOR: f32 = 1e-4;

/// Baseline used to normalize audio before detection and classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    /// Mean per-frame energy of ambient noise (raw, before gain)
    pub noise_floor_energy: f32,
    /// Amplitude gain applied before VAD and feature extraction
    pub gain_factor: f32,
    /// Frames consumed to build this profile
    pub sample_count: usize,
}

impl CalibrationProfile {
    /// Safe default used when calibration input is unusable
    pub fn fallback() -> Self {
        Self {
            noise_floor_energy: 0.0,
            gain_factor: 1.0,
            sample_count: 0,
        }
    }
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Why calibration fell back to the default profile
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationDegraded {
    #[error("energy spike during noise floor estimation (peak {peak:.6}, median {median:.6})")]
    EnergySpike { peak: f32, median: f32 },
    #[error("audio ended after {got} of {needed} calibration frames")]
    InsufficientSamples { got: usize, needed: usize },
    #[error("calibration produced a non-finite value")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    pub profile: CalibrationProfile,
    pub degraded: Option<CalibrationDegraded>,
}

impl CalibrationOutcome {
    fn degraded(reason: CalibrationDegraded) -> Self {
        log::warn!("⚠️ Calibration degraded, using default profile: {}", reason);
        Self {
            profile: CalibrationProfile::fallback(),
            degraded: Some(reason),
        }
    }
}

/// Result of feeding one frame
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationStep {
    NeedMore,
    Complete(CalibrationOutcome),
}

#[derive(Debug)]
enum Phase {
    NoiseFloor,
    AutoGain { noise_floor: f32 },
    Done,
}

/// Streaming calibrator; feed frames until it reports completion.
#[derive(Debug)]
pub struct Calibrator {
    config: CalibrationConfig,
    phase: Phase,
    noise_energies: Vec<f32>,
    gain: f32,
    agc_frames: usize,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            config: config.clone(),
            phase: Phase::NoiseFloor,
            noise_energies: Vec::with_capacity(config.noise_floor_samples),
            gain: 1.0,
            agc_frames: 0,
        }
    }

    /// Frames still needed before the profile is ready
    pub fn frames_remaining(&self) -> usize {
        let agc_total = if self.config.auto_gain_enabled {
            self.config.calibration_samples
        } else {
            0
        };
        match self.phase {
            Phase::NoiseFloor => {
                self.config
                    .noise_floor_samples
                    .saturating_sub(self.noise_energies.len())
                    + agc_total
            }
            Phase::AutoGain { .. } => agc_total.saturating_sub(self.agc_frames),
            Phase::Done => 0,
        }
    }

    pub fn feed(&mut self, frame: &[i16]) -> CalibrationStep {
        let energy = frame_energy(frame);

        match self.phase {
            Phase::NoiseFloor => {
                self.noise_energies.push(energy);
                if self.noise_energies.len() < self.config.noise_floor_samples {
                    return CalibrationStep::NeedMore;
                }
                match self.estimate_noise_floor() {
                    Ok(noise_floor) => {
                        log::info!("🔇 Noise floor energy: {:.6}", noise_floor);
                        if self.config.auto_gain_enabled && self.config.calibration_samples > 0 {
                            self.phase = Phase::AutoGain { noise_floor };
                            CalibrationStep::NeedMore
                        } else {
                            self.complete(noise_floor)
                        }
                    }
                    Err(reason) => {
                        self.phase = Phase::Done;
                        CalibrationStep::Complete(CalibrationOutcome::degraded(reason))
                    }
                }
            }
            Phase::AutoGain { noise_floor } => {
                if energy > MIN_AGC_ENERGY {
                    let desired = (self.config.target_energy / energy).sqrt();
                    self.gain += AGC_RATE * (desired - self.gain);
                    self.gain = self.gain.clamp(MIN_GAIN_FACTOR, MAX_GAIN_FACTOR);
                }
                self.agc_frames += 1;
                if self.agc_frames < self.config.calibration_samples {
                    CalibrationStep::NeedMore
                } else {
                    self.complete(noise_floor)
                }
            }
            // Extra frames after completion are ignored
            Phase::Done => CalibrationStep::NeedMore,
        }
    }

    /// Run calibration over a finite frame stream. A stream that ends early
    /// degrades to the fallback profile.
    pub fn calibrate<I>(config: &CalibrationConfig, frames: I) -> CalibrationOutcome
    where
        I: IntoIterator<Item = AudioFrame>,
    {
        let mut calibrator = Self::new(config);
        for frame in frames {
            if let CalibrationStep::Complete(outcome) = calibrator.feed(frame.samples()) {
                return outcome;
            }
        }
        calibrator.abandon()
    }

    /// Give up (input ran dry). Always yields the fallback profile.
    pub fn abandon(self) -> CalibrationOutcome {
        let needed = self.config.noise_floor_samples
            + if self.config.auto_gain_enabled {
                self.config.calibration_samples
            } else {
                0
            };
        let got = needed.saturating_sub(self.frames_remaining());
        CalibrationOutcome::degraded(CalibrationDegraded::InsufficientSamples { got, needed })
    }

    fn estimate_noise_floor(&self) -> Result<f32, CalibrationDegraded> {
        let energies = &self.noise_energies;
        if energies.is_empty() {
            return Err(CalibrationDegraded::InsufficientSamples {
                got: 0,
                needed: self.config.noise_floor_samples,
            });
        }

        let peak = energies.iter().copied().fold(0.0f32, f32::max);
        let mean = energies.iter().map(|&e| e as f64).sum::<f64>() / energies.len() as f64;
        let mean = mean as f32;
        if !mean.is_finite() || !peak.is_finite() {
            return Err(CalibrationDegraded::NonFinite);
        }

        let mut sorted = energies.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[sorted.len() / 2];
        if peak > SPIKE_ENERGY_FLOOR && peak > self.config.spike_ratio * median {
            return Err(CalibrationDegraded::EnergySpike { peak, median });
        }

        // The f64 mean can round a hair above the f32 peak
        Ok(mean.clamp(0.0, peak))
    }

    fn complete(&mut self, noise_floor: f32) -> CalibrationStep {
        self.phase = Phase::Done;
        if !self.gain.is_finite() {
            return CalibrationStep::Complete(CalibrationOutcome::degraded(
                CalibrationDegraded::NonFinite,
            ));
        }

        let profile = CalibrationProfile {
            noise_floor_energy: noise_floor,
            gain_factor: self.gain,
            sample_count: self.noise_energies.len() + self.agc_frames,
        };
        log::info!(
            "🎚️ Calibration complete: noise_floor={:.6}, gain={:.3}, frames={}",
            profile.noise_floor_energy,
            profile.gain_factor,
            profile.sample_count
        );
        CalibrationStep::Complete(CalibrationOutcome {
            profile,
            degraded: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_frame(rng: &mut StdRng, amplitude: i16, len: usize) -> AudioFrame {
        AudioFrame::from_samples((0..len).map(|_| rng.gen_range(-amplitude..=amplitude)).collect())
    }

    fn config(noise: usize, cal: usize, auto_gain: bool) -> CalibrationConfig {
        CalibrationConfig {
            noise_floor_samples: noise,
            calibration_samples: cal,
            auto_gain_enabled: auto_gain,
            ..CalibrationConfig::default()
        }
    }

    #[test]
    fn test_noise_floor_bounded_by_peak_energy() {
        let mut rng = StdRng::seed_from_u64(42);
        let frames: Vec<AudioFrame> = (0..50)
            .map(|i| noise_frame(&mut rng, 100 + (i % 5) * 20, 256))
            .collect();
        let peak = frames
            .iter()
            .map(|f| frame_energy(f.samples()))
            .fold(0.0f32, f32::max);

        let outcome = Calibrator::calibrate(&config(50, 0, false), frames);
        assert!(outcome.degraded.is_none());
        let floor = outcome.profile.noise_floor_energy;
        assert!(floor >= 0.0);
        assert!(floor <= peak);
        assert!(floor > 0.0);
        assert_eq!(outcome.profile.gain_factor, 1.0);
        assert_eq!(outcome.profile.sample_count, 50);
    }

    #[test]
    fn test_digital_silence_is_not_degraded() {
        let frames = (0..10).map(|_| AudioFrame::filled(128, 0));
        let outcome = Calibrator::calibrate(&config(10, 0, false), frames);
        assert!(outcome.degraded.is_none());
        assert_eq!(outcome.profile.noise_floor_energy, 0.0);
    }

    #[test]
    fn test_speech_during_noise_phase_falls_back() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut frames: Vec<AudioFrame> = (0..20).map(|_| noise_frame(&mut rng, 50, 256)).collect();
        frames[7] = AudioFrame::filled(256, 12000);

        let outcome = Calibrator::calibrate(&config(20, 0, false), frames);
        assert!(matches!(
            outcome.degraded,
            Some(CalibrationDegraded::EnergySpike { .. })
        ));
        assert_eq!(outcome.profile, CalibrationProfile::fallback());
    }

    #[test]
    fn test_short_stream_falls_back() {
        let frames = (0..5).map(|_| AudioFrame::filled(64, 10));
        let outcome = Calibrator::calibrate(&config(10, 20, true), frames);
        assert_eq!(
            outcome.degraded,
            Some(CalibrationDegraded::InsufficientSamples { got: 5, needed: 30 })
        );
        assert_eq!(outcome.profile, CalibrationProfile::fallback());
    }

    #[test]
    fn test_auto_gain_moves_towards_target() {
        let mut cal = config(4, 60, true);
        cal.target_energy = 0.001;
        // Quiet input: energy ~ (328/32768)^2 = 1e-4, so gain should rise
        let frames = (0..64).map(|_| AudioFrame::filled(256, 328));
        let outcome = Calibrator::calibrate(&cal, frames);
        assert!(outcome.degraded.is_none());

        let profile = outcome.profile;
        let normalized = frame_energy(&[328; 256]) * profile.gain_factor.powi(2);
        assert!(profile.gain_factor > 2.5, "gain {}", profile.gain_factor);
        assert!((normalized - 0.001).abs() < 0.0002, "normalized {}", normalized);
        assert_eq!(profile.sample_count, 64);
    }

    #[test]
    fn test_auto_gain_is_bounded() {
        // Loud input wants a gain far below the minimum
        let frames = (0..30).map(|_| AudioFrame::filled(64, 30000));
        let mut cal = config(10, 20, true);
        cal.spike_ratio = 1e6;
        let outcome = Calibrator::calibrate(&cal, frames);
        assert_eq!(outcome.profile.gain_factor, MIN_GAIN_FACTOR);

        // Near-silent input wants a gain far above the maximum
        let frames = (0..30).map(|_| AudioFrame::filled(64, 4));
        let outcome = Calibrator::calibrate(&config(10, 20, true), frames);
        assert_eq!(outcome.profile.gain_factor, MAX_GAIN_FACTOR);
    }

    #[test]
    fn test_auto_gain_terminates_after_fixed_count() {
        let mut calibrator = Calibrator::new(&config(3, 5, true));
        let frame = [500i16; 32];
        let mut fed = 0;
        loop {
            fed += 1;
            if let CalibrationStep::Complete(_) = calibrator.feed(&frame) {
                break;
            }
            assert!(fed < 100, "calibration did not terminate");
        }
        assert_eq!(fed, 8);
        assert_eq!(calibrator.frames_remaining(), 0);
    }
}
