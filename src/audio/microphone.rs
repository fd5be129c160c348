//! Live capture from an input device via cpal.
//!
//! The cpal data callback is the delivery context: it converts the selected
//! channel to i16 and pushes straight into the capture buffer.

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::capture::{CaptureProducer, PushStatus};
use super::source::{AudioSource, SourceError, SourceHandle};

/// Samples converted per push from the device callback
const CALLBACK_BLOCK: usize = 4096;

/// Microphone configuration
#[derive(Debug, Clone)]
pub struct MicrophoneConfig {
    /// Device name to capture from (None = default device)
    pub device_name: Option<String>,
    /// Channel to capture (0-based)
    pub channel: u16,
    pub sample_rate: u32,
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            channel: 0,
            sample_rate: 16000,
        }
    }
}

pub struct MicrophoneSource {
    config: MicrophoneConfig,
}

impl MicrophoneSource {
    pub fn new(config: MicrophoneConfig) -> Self {
        Self { config }
    }

    fn open_device(config: &MicrophoneConfig) -> Result<Device, SourceError> {
        let host = cpal::default_host();
        log::info!("🎤 Initializing audio capture with host: {:?}", host.id());

        match &config.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| SourceError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| SourceError::Device(format!("Device not found: {}", name))),
            None => host
                .default_input_device()
                .ok_or_else(|| SourceError::Device("No default input device found".into())),
        }
    }

    /// Pick a config that runs at exactly the configured rate, preferring i16.
    fn select_input_config(
        device: &Device,
        config: &MicrophoneConfig,
    ) -> Result<cpal::SupportedStreamConfig, SourceError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| SourceError::Device(e.to_string()))?;

        let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;
        for range in configs {
            if config.channel >= range.channels() {
                continue;
            }
            if config.sample_rate < range.min_sample_rate().0
                || config.sample_rate > range.max_sample_rate().0
            {
                continue;
            }
            let rank = match range.sample_format() {
                SampleFormat::I16 => 0,
                SampleFormat::F32 => 1,
                SampleFormat::U16 => 2,
                _ => continue,
            };
            if best.as_ref().map_or(true, |(r, _)| rank < *r) {
                best = Some((rank, range.with_sample_rate(cpal::SampleRate(config.sample_rate))));
            }
        }

        best.map(|(_, c)| c).ok_or_else(|| {
            SourceError::Device(format!(
                "No input config at {}Hz with channel {}",
                config.sample_rate, config.channel
            ))
        })
    }

    fn build_stream<T>(
        device: &Device,
        stream_config: &cpal::StreamConfig,
        channel: usize,
        mut producer: CaptureProducer,
    ) -> Result<CpalStream, SourceError>
    where
        T: Sample + SizedSample + Send + 'static,
        i16: FromSample<T>,
    {
        let channels = stream_config.channels as usize;
        let mut block = vec![0i16; CALLBACK_BLOCK];

        device
            .build_input_stream(
                stream_config,
                move |data: &[T], _| {
                    push_channel(data, channels, channel, &mut block, &mut producer);
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| SourceError::Stream(e.to_string()))
    }
}

/// Convert one channel of an interleaved host buffer and push it, at most
/// `block.len()` samples at a time. Host buffers of any size go through the
/// same fixed block.
fn push_channel<T>(
    data: &[T],
    channels: usize,
    channel: usize,
    block: &mut [i16],
    producer: &mut CaptureProducer,
) where
    T: Sample,
    i16: FromSample<T>,
{
    if channels == 0 || block.is_empty() {
        return;
    }
    for interleaved in data.chunks(channels * block.len()) {
        let mut len = 0;
        for (slot, frame) in block.iter_mut().zip(interleaved.chunks(channels)) {
            if let Some(sample) = frame.get(channel) {
                *slot = i16::from_sample(*sample);
                len += 1;
            }
        }
        if let PushStatus::Overrun { dropped_frames } = producer.push(&block[..len]) {
            log::debug!("⚠️ Audio overrun: {} frame(s) dropped", dropped_frames);
        }
    }
}

impl AudioSource for MicrophoneSource {
    fn start(self: Box<Self>, producer: CaptureProducer) -> Result<SourceHandle, SourceError> {
        let config = self.config;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SourceError>>();

        // cpal streams are not Send on every platform, so the stream lives
        // and dies on its own thread.
        let handle = SourceHandle::spawn("microphone", move |stop: Arc<AtomicBool>| {
            let started = (|| -> Result<CpalStream, SourceError> {
                let device = Self::open_device(&config)?;
                log::info!("🎤 Using input device: {:?}", device.name());
                let supported = Self::select_input_config(&device, &config)?;
                let stream_config = supported.config();
                let channel = config.channel as usize;

                let stream = match supported.sample_format() {
                    SampleFormat::I16 => {
                        Self::build_stream::<i16>(&device, &stream_config, channel, producer)?
                    }
                    SampleFormat::F32 => {
                        Self::build_stream::<f32>(&device, &stream_config, channel, producer)?
                    }
                    SampleFormat::U16 => {
                        Self::build_stream::<u16>(&device, &stream_config, channel, producer)?
                    }
                    other => {
                        return Err(SourceError::Format(format!(
                            "Unsupported sample format {:?}",
                            other
                        )))
                    }
                };
                stream
                    .play()
                    .map_err(|e| SourceError::Stream(e.to_string()))?;
                Ok(stream)
            })();

            match started {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(50));
                    }
                    drop(stream);
                    log::info!("🎤 Microphone capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SourceError::Stream(
                "capture thread exited before starting".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "microphone"
    }
}
