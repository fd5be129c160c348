pub mod audio;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod features;
pub mod models;
pub mod power;
pub mod vad;

pub use config::KwsConfig;
pub use error::{KwsError, Result};
