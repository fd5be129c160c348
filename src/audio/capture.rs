//! Bounded single-producer/single-consumer audio capture buffer.
//!
//! The producer side runs in the sample delivery context (interrupt handler,
//! audio callback or source thread) and never blocks: it fills preallocated
//! frame slots and publishes them through a lock-free queue. When the queue is
//! full the oldest unread frame is dropped and the push reports an overrun.
//!
//! The consumer side is the main processing cycle. `pull` waits at most one
//! frame period for the next frame.

use crossbeam::queue::ArrayQueue;
use crossbeam::sync::{Parker, Unparker};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::frame::{AudioFrame, SlotPool};
use crate::config::AudioConfig;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Invalid capture configuration: {0}")]
    InvalidConfig(String),
}

/// Outcome of a producer push
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// All samples were stored
    Accepted,
    /// The buffer was full; the oldest unread frames were discarded
    Overrun { dropped_frames: u32 },
    /// Sampling is suspended; the block was ignored
    Suspended,
}

struct Shared {
    ready: ArrayQueue<(u64, Box<[i16]>)>,
    pool: SlotPool,
    frame_size: usize,
    dropped_frames: AtomicU64,
    suspended: AtomicBool,
    unparker: Unparker,
}

/// Constructor for the producer/consumer pair
pub struct AudioCaptureBuffer;

impl AudioCaptureBuffer {
    /// Allocate every frame slot up front and split into the two endpoints.
    pub fn new(config: &AudioConfig) -> Result<(CaptureProducer, CaptureConsumer), CaptureError> {
        if config.frame_size == 0 {
            return Err(CaptureError::InvalidConfig(
                "frame size must be positive".to_string(),
            ));
        }
        if config.capture_frames < 2 {
            return Err(CaptureError::InvalidConfig(format!(
                "capacity must hold at least 2 frames, got {}",
                config.capture_frames
            )));
        }

        // One slot being filled by the producer, one held by the consumer
        let slot_count = config.capture_frames + 2;
        let pool: SlotPool = Arc::new(ArrayQueue::new(slot_count));
        for _ in 0..slot_count {
            let _ = pool.push(vec![0i16; config.frame_size].into_boxed_slice());
        }

        let parker = Parker::new();
        let shared = Arc::new(Shared {
            ready: ArrayQueue::new(config.capture_frames),
            pool,
            frame_size: config.frame_size,
            dropped_frames: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            unparker: parker.unparker().clone(),
        });

        log::debug!(
            "🎙️ Capture buffer: {} frames x {} samples ({} slots)",
            config.capture_frames,
            config.frame_size,
            slot_count
        );

        let producer = CaptureProducer {
            shared: shared.clone(),
            current: None,
            filled: 0,
            next_sequence: 0,
        };
        let consumer = CaptureConsumer {
            shared,
            parker,
            frame_period: Duration::from_millis(config.frame_period_ms()),
        };
        Ok((producer, consumer))
    }
}

/// Delivery-side endpoint. Owned by exactly one delivery context.
pub struct CaptureProducer {
    shared: Arc<Shared>,
    current: Option<Box<[i16]>>,
    filled: usize,
    next_sequence: u64,
}

impl CaptureProducer {
    /// Append newly arrived samples. Never blocks.
    pub fn push(&mut self, block: &[i16]) -> PushStatus {
        if self.shared.suspended.load(Ordering::Acquire) {
            // Samples straddling a suspension must not be spliced together
            self.filled = 0;
            return PushStatus::Suspended;
        }

        let frame_size = self.shared.frame_size;
        let mut dropped = 0u32;
        let mut offset = 0;

        while offset < block.len() {
            if self.current.is_none() {
                match self.acquire_slot(&mut dropped) {
                    Some(slot) => {
                        self.current = Some(slot);
                        self.filled = 0;
                    }
                    None => {
                        // Consumer is holding every slot; the rest of this
                        // block has nowhere to go.
                        dropped += 1;
                        break;
                    }
                }
            }
            let Some(slot) = self.current.as_mut() else {
                break;
            };

            let n = (frame_size - self.filled).min(block.len() - offset);
            slot[self.filled..self.filled + n].copy_from_slice(&block[offset..offset + n]);
            self.filled += n;
            offset += n;

            if self.filled == frame_size {
                if let Some(full) = self.current.take() {
                    self.publish(full, &mut dropped);
                }
                self.filled = 0;
            }
        }

        if dropped > 0 {
            self.shared
                .dropped_frames
                .fetch_add(dropped as u64, Ordering::Relaxed);
            PushStatus::Overrun {
                dropped_frames: dropped,
            }
        } else {
            PushStatus::Accepted
        }
    }

    /// Samples currently buffered in the incomplete frame
    pub fn pending_samples(&self) -> usize {
        if self.current.is_some() {
            self.filled
        } else {
            0
        }
    }

    fn acquire_slot(&mut self, dropped: &mut u32) -> Option<Box<[i16]>> {
        if let Some(slot) = self.shared.pool.pop() {
            return Some(slot);
        }
        // Drop-oldest: reuse the slot of the oldest unread frame
        let (_, slot) = self.shared.ready.pop()?;
        *dropped += 1;
        Some(slot)
    }

    fn publish(&mut self, slot: Box<[i16]>, dropped: &mut u32) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some((_, oldest)) = self.shared.ready.force_push((sequence, slot)) {
            *dropped += 1;
            let _ = self.shared.pool.push(oldest);
        }
        self.shared.unparker.unpark();
    }
}

/// Processing-side endpoint, used only by the main cycle.
pub struct CaptureConsumer {
    shared: Arc<Shared>,
    parker: Parker,
    frame_period: Duration,
}

impl CaptureConsumer {
    /// Remove the oldest complete frame, waiting at most one frame period.
    pub fn pull(&self) -> Option<AudioFrame> {
        if let Some(frame) = self.try_pull() {
            return Some(frame);
        }
        self.parker.park_timeout(self.frame_period);
        self.try_pull()
    }

    /// Remove the oldest complete frame without waiting.
    pub fn try_pull(&self) -> Option<AudioFrame> {
        self.shared
            .ready
            .pop()
            .map(|(sequence, slot)| AudioFrame::from_slot(slot, sequence, self.shared.pool.clone()))
    }

    /// Discard every complete frame waiting in the buffer.
    pub fn drain(&self) -> usize {
        let mut discarded = 0;
        while let Some((_, slot)) = self.shared.ready.pop() {
            let _ = self.shared.pool.push(slot);
            discarded += 1;
        }
        discarded
    }

    /// Complete frames ready to pull
    pub fn available(&self) -> usize {
        self.shared.ready.len()
    }

    /// Frames lost to overruns since startup
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }

    /// Suspend or resume sampling. While suspended the producer discards
    /// everything it is given.
    pub fn set_suspended(&self, suspended: bool) {
        self.shared.suspended.store(suspended, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    pub fn frame_period(&self) -> Duration {
        self.frame_period
    }
}
