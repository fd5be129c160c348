use crossbeam::queue::ArrayQueue;
use std::ops::Deref;
use std::sync::Arc;

/// Pool of preallocated sample slots shared by producer and consumer
pub(crate) type SlotPool = Arc<ArrayQueue<Box<[i16]>>>;

/// One processing unit of signed 16-bit PCM samples.
///
/// Frames handed out by the capture buffer own one of its preallocated slots
/// and give it back when dropped, so steady-state capture never allocates.
#[derive(Debug)]
pub struct AudioFrame {
    samples: Option<Box<[i16]>>,
    sequence: u64,
    pool: Option<SlotPool>,
}

impl AudioFrame {
    /// Create a standalone frame (not backed by a capture buffer)
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples: Some(samples.into_boxed_slice()),
            sequence: 0,
            pool: None,
        }
    }

    /// A frame of `len` copies of `value`
    pub fn filled(len: usize, value: i16) -> Self {
        Self::from_samples(vec![value; len])
    }

    pub(crate) fn from_slot(slot: Box<[i16]>, sequence: u64, pool: SlotPool) -> Self {
        Self {
            samples: Some(slot),
            sequence,
            pool: Some(pool),
        }
    }

    pub fn samples(&self) -> &[i16] {
        self.samples.as_deref().unwrap_or(&[])
    }

    /// Delivery order index assigned by the capture buffer
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Deref for AudioFrame {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        self.samples()
    }
}

impl Drop for AudioFrame {
    fn drop(&mut self) {
        if let (Some(slot), Some(pool)) = (self.samples.take(), self.pool.as_ref()) {
            // The pool is sized for every slot, so this only fails if a frame
            // from a different buffer is dropped here.
            let _ = pool.push(slot);
        }
    }
}
