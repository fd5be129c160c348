//! Sample delivery collaborators.
//!
//! A source owns its delivery context (a thread here, an interrupt handler on
//! bare metal) and only ever talks to the core through
//! [`CaptureProducer::push`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::capture::{CaptureProducer, PushStatus};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open audio source {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("Unsupported audio format: {0}")]
    Format(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// Something that delivers fixed-size blocks of 16-bit PCM at a fixed rate.
pub trait AudioSource: Send {
    /// Begin delivering into `producer`. Delivery continues until the
    /// returned handle is stopped or the source runs dry.
    fn start(self: Box<Self>, producer: CaptureProducer) -> Result<SourceHandle, SourceError>;

    fn name(&self) -> &str;
}

/// Running delivery context
pub struct SourceHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SourceHandle {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self, SourceError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name(format!("audio-{}", name))
            .spawn(move || body(thread_stop))
            .map_err(|e| SourceError::Stream(e.to_string()))?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Ask the delivery context to stop and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("❌ Audio delivery thread panicked");
            }
        }
    }

    /// True once a finite source has delivered everything
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How fast a file-backed source delivers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// One block per block duration
    RealTime,
    /// N times faster than real time
    Speedup(u32),
}

impl Pacing {
    fn interval(&self, block_size: usize, sample_rate: u32) -> Duration {
        let real = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);
        match self {
            Pacing::RealTime => real,
            Pacing::Speedup(factor) => real / (*factor).max(1),
        }
    }
}

fn deliver(producer: &mut CaptureProducer, block: &[i16]) {
    match producer.push(block) {
        PushStatus::Overrun { dropped_frames } => {
            log::debug!("⚠️ Audio overrun: {} frame(s) dropped", dropped_frames);
        }
        PushStatus::Accepted | PushStatus::Suspended => {}
    }
}

/// 16-bit mono WAV file played back as if it were a microphone
pub struct WavFileSource {
    path: PathBuf,
    reader: hound::WavReader<std::io::BufReader<std::fs::File>>,
    block_size: usize,
    pacing: Pacing,
}

impl WavFileSource {
    pub fn open<P: AsRef<Path>>(
        path: P,
        expected_rate: u32,
        block_size: usize,
        pacing: Pacing,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let reader = hound::WavReader::open(&path).map_err(|e| SourceError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(SourceError::Format(format!(
                "{} must be mono, got {} channels",
                path.display(),
                spec.channels
            )));
        }
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(SourceError::Format(format!(
                "{} must be 16-bit PCM, got {:?} {} bits",
                path.display(),
                spec.sample_format,
                spec.bits_per_sample
            )));
        }
        if spec.sample_rate != expected_rate {
            return Err(SourceError::Format(format!(
                "{} is {}Hz, expected {}Hz",
                path.display(),
                spec.sample_rate,
                expected_rate
            )));
        }
        if block_size == 0 {
            return Err(SourceError::Format("block size must be positive".to_string()));
        }

        log::info!(
            "📂 WAV source {}: {} samples at {}Hz",
            path.display(),
            reader.len(),
            spec.sample_rate
        );

        Ok(Self {
            path,
            reader,
            block_size,
            pacing,
        })
    }
}

impl AudioSource for WavFileSource {
    fn start(self: Box<Self>, mut producer: CaptureProducer) -> Result<SourceHandle, SourceError> {
        let WavFileSource {
            path,
            mut reader,
            block_size,
            pacing,
        } = *self;
        let interval = pacing.interval(block_size, reader.spec().sample_rate);

        SourceHandle::spawn("wav", move |stop| {
            let mut block = Vec::with_capacity(block_size);
            let mut samples = reader.samples::<i16>();
            let mut next_due = Instant::now();

            while !stop.load(Ordering::Acquire) {
                block.clear();
                for sample in samples.by_ref().take(block_size) {
                    match sample {
                        Ok(s) => block.push(s),
                        Err(e) => {
                            log::error!("❌ Failed to read {}: {}", path.display(), e);
                            return;
                        }
                    }
                }
                if block.is_empty() {
                    log::info!("📂 End of {}", path.display());
                    return;
                }

                deliver(&mut producer, &block);

                next_due += interval;
                let now = Instant::now();
                if next_due > now {
                    thread::sleep(next_due - now);
                }
            }
        })
    }

    fn name(&self) -> &str {
        "wav"
    }
}

/// Parameters for [`SyntheticSource`]
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub seed: u64,
    /// Peak amplitude of the background noise
    pub noise_amplitude: i16,
    /// Peak amplitude of the tone bursts
    pub tone_amplitude: i16,
    pub tone_hz: f32,
    /// A burst starts every `burst_every_ms`
    pub burst_every_ms: u64,
    pub burst_ms: u64,
    /// Stop after this much audio (None = run until stopped)
    pub duration_ms: Option<u64>,
    pub pacing: Pacing,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            block_size: 256,
            seed: 7,
            noise_amplitude: 40,
            tone_amplitude: 12000,
            tone_hz: 440.0,
            burst_every_ms: 45_000,
            burst_ms: 600,
            duration_ms: None,
            pacing: Pacing::RealTime,
        }
    }
}

/// Seeded background noise with periodic tone bursts, for demos and soak tests
pub struct SyntheticSource {
    config: SyntheticConfig,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    /// Sample at absolute index `n`
    fn sample_at(config: &SyntheticConfig, rng: &mut StdRng, n: u64) -> i16 {
        let noise_peak = config.noise_amplitude.max(0) as i32;
        let noise = if noise_peak > 0 {
            rng.gen_range(-noise_peak..=noise_peak)
        } else {
            0
        };

        let t_ms = n * 1000 / config.sample_rate as u64;
        let in_burst = config.burst_every_ms > 0
            && t_ms % config.burst_every_ms >= config.burst_every_ms.saturating_sub(config.burst_ms);
        let tone = if in_burst {
            let phase = 2.0 * std::f32::consts::PI * config.tone_hz * n as f32
                / config.sample_rate as f32;
            (phase.sin() * config.tone_amplitude as f32) as i32
        } else {
            0
        };

        (noise + tone).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl AudioSource for SyntheticSource {
    fn start(self: Box<Self>, mut producer: CaptureProducer) -> Result<SourceHandle, SourceError> {
        let config = self.config;
        if config.block_size == 0 || config.sample_rate == 0 {
            return Err(SourceError::Format(
                "synthetic source needs a positive block size and rate".to_string(),
            ));
        }
        let interval = config.pacing.interval(config.block_size, config.sample_rate);
        let total_samples = config
            .duration_ms
            .map(|ms| ms * config.sample_rate as u64 / 1000);

        SourceHandle::spawn("synthetic", move |stop| {
            let mut rng = StdRng::seed_from_u64(config.seed);
            let mut block = vec![0i16; config.block_size];
            let mut n = 0u64;
            let mut next_due = Instant::now();

            while !stop.load(Ordering::Acquire) {
                if total_samples.is_some_and(|total| n >= total) {
                    return;
                }
                for slot in block.iter_mut() {
                    *slot = Self::sample_at(&config, &mut rng, n);
                    n += 1;
                }
                deliver(&mut producer, &block);

                next_due += interval;
                let now = Instant::now();
                if next_due > now {
                    thread::sleep(next_due - now);
                }
            }
        })
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
