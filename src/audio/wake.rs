use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single "wake requested" signal raised by an external source (button,
/// GPIO interrupt) and consumed by the main cycle at its next boundary.
#[derive(Debug, Clone, Default)]
pub struct WakeFlag {
    requested: Arc<AtomicBool>,
}

impl WakeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Safe to call from any context.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Consume the flag, returning whether a wake was pending.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
