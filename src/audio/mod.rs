//! Audio capture: frames, the bounded capture buffer, sample sources and the
//! external wake signal.

pub mod capture;
pub mod frame;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod source;
pub mod wake;

pub use capture::{AudioCaptureBuffer, CaptureConsumer, CaptureError, CaptureProducer, PushStatus};
pub use frame::AudioFrame;
#[cfg(feature = "microphone")]
pub use microphone::{MicrophoneConfig, MicrophoneSource};
pub use source::{
    AudioSource, Pacing, SourceError, SourceHandle, SyntheticConfig, SyntheticSource,
    WavFileSource,
};
pub use wake::WakeFlag;

/// Full-scale value used to map i16 samples into [-1, 1]
pub const FULL_SCALE: f32 = 32768.0;
