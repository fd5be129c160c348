//! # Keyword Spotting Cycle
//!
//! One cooperative loop ties the components together. Each iteration takes at
//! most one frame from the capture buffer and runs the stages in order:
//!
//! ```text
//! CaptureConsumer::pull ─► wake flag ─► VAD ─► FeatureExtractor ─► InferenceEngine
//!                                        │                               │
//!                                        └──────── activity ─────────────┴─► PowerStateMachine
//! ```
//!
//! ## Ordering and blocking
//!
//! Frames are processed in delivery order. The only wait is inside
//! [`CaptureConsumer::pull`], bounded by one frame period; calibration stops
//! after a bounded number of empty polls, so boot never hangs on a dead source.
//!
//! ## Power gating
//!
//! A VAD-active frame or a pending wake request returns the machine to Active
//! *before* the inference decision, so the frame that woke the device is
//! classified. LightSleep keeps sampling and runs only the VAD; DeepSleep
//! optionally suspends capture, after which only the wake flag resumes it.
//!
//! ## Recoverable failures
//!
//! Inference and feature errors are absorbed within the cycle: the cycle
//! reports `ClassificationResult::unknown` (confidence 0), logs one warning
//! and the next cycle proceeds normally.

use crate::audio::{CaptureConsumer, WakeFlag};
use crate::calibration::{CalibrationOutcome, CalibrationProfile, CalibrationStep, Calibrator};
use crate::clock::Clock;
use crate::config::KwsConfig;
use crate::error::{KwsError, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::models::{ClassId, ClassificationResult, InferenceEngine, CLASS_COUNT};
use crate::power::{PowerState, PowerStateMachine, PowerTransition};
use crate::vad::{VadDecision, VoiceActivityDetector};

/// Consecutive empty polls after which calibration gives up
const MAX_CALIBRATION_STALLS: u32 = 25;

/// What happened to one frame
#[derive(Debug)]
pub struct FrameReport {
    pub sequence: Option<u64>,
    pub vad: VadDecision,
    /// Present when the frame reached the classifier (or should have)
    pub result: Option<ClassificationResult>,
    /// The recoverable error replaced by an Unknown result, if any
    pub recovered: Option<KwsError>,
    pub transitions: Vec<PowerTransition>,
    pub state: PowerState,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// No frame arrived within one frame period
    NoFrame {
        state: PowerState,
        transitions: Vec<PowerTransition>,
    },
    Processed(FrameReport),
}

impl CycleOutcome {
    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            CycleOutcome::Processed(report) => report.result.as_ref(),
            CycleOutcome::NoFrame { .. } => None,
        }
    }

    pub fn state(&self) -> PowerState {
        match self {
            CycleOutcome::Processed(report) => report.state,
            CycleOutcome::NoFrame { state, .. } => *state,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub frames: u64,
    pub empty_polls: u64,
    pub vad_active: u64,
    /// Indexed by `ClassId::index`
    pub classifications: [u64; CLASS_COUNT],
    pub recovered_failures: u64,
    pub dropped_frames: u64,
    pub power_transitions: u64,
}

impl PipelineStats {
    pub fn count(&self, class: ClassId) -> u64 {
        self.classifications[class.index()]
    }
}

pub struct DetectionPipeline {
    config: KwsConfig,
    consumer: CaptureConsumer,
    wake: WakeFlag,
    clock: Box<dyn Clock>,

    vad: VoiceActivityDetector,
    extractor: FeatureExtractor,
    engine: InferenceEngine,
    power: PowerStateMachine,

    profile: CalibrationProfile,
    calibrated: bool,
    features: FeatureVector,
    stats: PipelineStats,
}

impl DetectionPipeline {
    pub fn new(
        config: &KwsConfig,
        engine: InferenceEngine,
        consumer: CaptureConsumer,
        wake: WakeFlag,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        log::info!("Initializing detection pipeline...");
        config.validate()?;

        let extractor = FeatureExtractor::new(config)?;
        let features = extractor.new_vector();
        let power = PowerStateMachine::new(&config.power, clock.now_ms());

        Ok(Self {
            config: config.clone(),
            consumer,
            wake,
            clock,
            vad: VoiceActivityDetector::new(&config.vad),
            extractor,
            engine,
            power,
            profile: CalibrationProfile::fallback(),
            calibrated: false,
            features,
            stats: PipelineStats::default(),
        })
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn power(&self) -> &PowerStateMachine {
        &self.power
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Access to the engine for arena diagnostics and rehearsal hooks
    pub fn engine_mut(&mut self) -> &mut InferenceEngine {
        &mut self.engine
    }

    /// Build the calibration profile from live capture.
    pub fn calibrate(&mut self) -> CalibrationOutcome {
        log::info!("🎚️ Calibrating: keep quiet...");
        let mut calibrator = Calibrator::new(&self.config.calibration);
        let mut stalls = 0;

        let outcome = loop {
            match self.consumer.pull() {
                Some(frame) => {
                    stalls = 0;
                    if let CalibrationStep::Complete(outcome) = calibrator.feed(&frame) {
                        break outcome;
                    }
                }
                None => {
                    stalls += 1;
                    if stalls >= MAX_CALIBRATION_STALLS {
                        log::warn!("⚠️ Audio stalled during calibration");
                        break calibrator.abandon();
                    }
                }
            }
        };

        self.install_profile(&outcome);
        outcome
    }

    /// Calibrate from an explicit frame sequence instead of the capture buffer
    pub fn calibrate_with<I>(&mut self, frames: I) -> CalibrationOutcome
    where
        I: IntoIterator<Item = crate::audio::AudioFrame>,
    {
        let outcome = Calibrator::calibrate(&self.config.calibration, frames);
        self.install_profile(&outcome);
        outcome
    }

    /// Stop normal processing, discard buffered audio and calibrate again
    pub fn recalibrate(&mut self) -> CalibrationOutcome {
        let discarded = self.consumer.drain();
        log::info!("🔄 Recalibrating (discarded {} buffered frames)", discarded);
        self.consumer.set_suspended(false);
        self.calibrate()
    }

    /// Calibration time is not inactivity: the timer restarts once the
    /// profile is in place.
    fn install_profile(&mut self, outcome: &CalibrationOutcome) {
        self.profile = outcome.profile;
        self.calibrated = true;
        let now = self.clock.now_ms();
        if let Some(transition) = self.power.record_activity(now) {
            self.note_transitions(&[transition]);
        }
    }

    /// Pull one frame (waiting at most one frame period) and process it
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        match self.consumer.pull() {
            Some(frame) => {
                let now = self.clock.now_ms();
                let mut report = self.process_frame(&frame, now);
                report.sequence = Some(frame.sequence());
                CycleOutcome::Processed(report)
            }
            None => {
                self.stats.empty_polls += 1;
                let now = self.clock.now_ms();
                let mut transitions: Vec<PowerTransition> = self.take_wake(now).into_iter().collect();
                transitions.extend(self.power.tick(now));
                self.note_transitions(&transitions);
                self.apply_duty_cycle();
                CycleOutcome::NoFrame {
                    state: self.power.state(),
                    transitions,
                }
            }
        }
    }

    /// Run every stage on one frame observed at `now_ms`
    pub fn process_frame(&mut self, frame: &[i16], now_ms: u64) -> FrameReport {
        self.stats.frames += 1;
        let mut transitions: Vec<PowerTransition> = self.take_wake(now_ms).into_iter().collect();

        let vad = self.vad.evaluate(frame, &self.profile);
        if vad.active {
            self.stats.vad_active += 1;
            transitions.extend(self.power.record_activity(now_ms));
        }

        let mut result = None;
        let mut recovered = None;
        if vad.active && self.power.state().allows_inference() {
            match self.classify(frame, now_ms) {
                Ok(r) => {
                    transitions.extend(self.power.record_activity(now_ms));
                    result = Some(r);
                }
                Err(e) => {
                    log::warn!("⚠️ Classification skipped this cycle: {}", e);
                    self.stats.recovered_failures += 1;
                    result = Some(ClassificationResult::unknown(now_ms));
                    recovered = Some(e);
                }
            }
        }

        if let Some(r) = &result {
            self.stats.classifications[r.class_id.index()] += 1;
            if r.class_id.is_keyword() {
                log::info!("🎯 Heard \"{}\" ({:.2})", r.class_id, r.confidence);
            }
        }

        transitions.extend(self.power.tick(now_ms));
        self.note_transitions(&transitions);
        self.apply_duty_cycle();

        FrameReport {
            sequence: None,
            vad,
            result,
            recovered,
            transitions,
            state: self.power.state(),
        }
    }

    /// Run cycles until `max_cycles` is reached or `handler` returns false.
    /// Calibrates first if that has not happened yet.
    pub fn run<F>(&mut self, max_cycles: Option<u64>, mut handler: F) -> PipelineStats
    where
        F: FnMut(&CycleOutcome) -> bool,
    {
        if !self.calibrated {
            self.calibrate();
        }

        log::info!("👂 Listening...");
        let mut cycles = 0u64;
        while max_cycles.map_or(true, |max| cycles < max) {
            let outcome = self.run_cycle();
            cycles += 1;
            if !handler(&outcome) {
                break;
            }
        }

        log::info!(
            "📊 {} cycles, {} frames, {} VAD-active, {} recovered failures, {} dropped frames",
            self.stats.cycles,
            self.stats.frames,
            self.stats.vad_active,
            self.stats.recovered_failures,
            self.stats.dropped_frames
        );
        self.stats.clone()
    }

    fn classify(&mut self, frame: &[i16], now_ms: u64) -> Result<ClassificationResult> {
        self.extractor
            .extract(frame, &self.profile, &mut self.features)?;
        Ok(self.engine.classify(&self.features, now_ms)?)
    }

    fn take_wake(&mut self, now_ms: u64) -> Option<PowerTransition> {
        if !self.wake.take() {
            return None;
        }
        log::debug!("🔔 Wake requested");
        self.consumer.set_suspended(false);
        // Record the wake even when already Active so the timer restarts
        self.power.wake(now_ms)
    }

    fn apply_duty_cycle(&mut self) {
        let capture = self.power.state().captures_audio(&self.config.power);
        if capture == self.consumer.is_suspended() {
            self.consumer.set_suspended(!capture);
            if capture {
                log::info!("🎙️ Capture resumed");
            } else {
                log::info!("🔇 Capture suspended until wake");
            }
        }
        self.stats.dropped_frames = self.consumer.dropped_frames();
    }

    fn note_transitions(&mut self, transitions: &[PowerTransition]) {
        self.stats.power_transitions += transitions.len() as u64;
    }
}
