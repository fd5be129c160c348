//! Run configuration.
//!
//! One immutable [`KwsConfig`] is built at startup (defaults, optionally
//! overlaid by a JSON file and CLI flags), validated once, and then passed by
//! reference to every component constructor.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Audio capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Hardware sampling rate in Hz
    pub sample_rate: u32,
    /// Samples per processing frame
    pub frame_size: usize,
    /// Complete frames the capture buffer can hold (double buffering needs 2)
    pub capture_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 1024,
            capture_frames: 2,
        }
    }
}

impl AudioConfig {
    /// Duration of one frame in milliseconds, rounded up.
    pub fn frame_period_ms(&self) -> u64 {
        let samples = self.frame_size as u64 * 1000;
        samples.div_ceil(self.sample_rate as u64)
    }
}

/// Which feature transform the extractor runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    TimeDomain,
    Spectral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Length of the feature vector (model input size)
    pub feature_size: usize,
    pub transform: TransformKind,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_size: 1024,
            transform: TransformKind::TimeDomain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the model asset (None = must be supplied on the command line)
    pub model_path: Option<PathBuf>,
    /// Output classes (silence, unknown, yes, no)
    pub class_count: usize,
    /// Minimum top score for a non-Unknown result
    pub confidence_threshold: f32,
    /// Tensor arena capacity in bytes
    pub arena_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            class_count: 4,
            confidence_threshold: 0.7,
            arena_size: 60 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Normalized energy margin above the noise floor that counts as voice
    pub voice_activation_energy: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            voice_activation_energy: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Frames averaged for the noise floor
    pub noise_floor_samples: usize,
    /// Frames used by the auto-gain loop
    pub calibration_samples: usize,
    pub auto_gain_enabled: bool,
    /// Normalized energy the auto-gain loop steers towards
    pub target_energy: f32,
    /// A noise-floor frame louder than `spike_ratio` x the median frame is
    /// treated as speech leaking into calibration
    pub spike_ratio: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            noise_floor_samples: 50,
            calibration_samples: 100,
            auto_gain_enabled: true,
            target_energy: 0.001,
            spike_ratio: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub power_management: bool,
    pub auto_light_sleep: bool,
    pub deep_sleep_enabled: bool,
    /// Stop sampling while in DeepSleep; only the wake source can resume
    pub suspend_capture_in_deep_sleep: bool,
    pub idle_timeout_ms: u64,
    pub sleep_timeout_ms: u64,
    pub deep_timeout_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            power_management: true,
            auto_light_sleep: true,
            deep_sleep_enabled: true,
            suspend_capture_in_deep_sleep: true,
            idle_timeout_ms: 5000,
            sleep_timeout_ms: 10000,
            deep_timeout_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub debug_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_enabled: false,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        match (self.enabled, self.debug_enabled) {
            (false, _) => log::LevelFilter::Off,
            (true, true) => log::LevelFilter::Debug,
            (true, false) => log::LevelFilter::Info,
        }
    }
}

/// Complete configuration for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KwsConfig {
    pub audio: AudioConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub vad: VadConfig,
    pub calibration: CalibrationConfig,
    pub power: PowerConfig,
    pub logging: LoggingConfig,
}

impl KwsConfig {
    /// Load a (possibly partial) JSON config; missing fields keep defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values no component can run with, warn on risky ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.frame_size == 0 {
            return Err(invalid("audio.frame_size", "must be positive"));
        }
        if self.audio.capture_frames < 2 {
            return Err(invalid(
                "audio.capture_frames",
                "capture buffer must hold at least two frames",
            ));
        }
        if self.features.feature_size == 0 {
            return Err(invalid("features.feature_size", "must be positive"));
        }
        if self.model.class_count != crate::models::CLASS_COUNT {
            return Err(invalid(
                "model.class_count",
                format!(
                    "expected {} (silence, unknown, yes, no), got {}",
                    crate::models::CLASS_COUNT,
                    self.model.class_count
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.confidence_threshold) {
            return Err(invalid(
                "model.confidence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.model.arena_size == 0 {
            return Err(invalid("model.arena_size", "must be positive"));
        }
        if !(self.vad.voice_activation_energy >= 0.0) {
            return Err(invalid("vad.voice_activation_energy", "must be >= 0"));
        }
        if self.calibration.noise_floor_samples == 0 {
            return Err(invalid("calibration.noise_floor_samples", "must be positive"));
        }
        if !(self.calibration.target_energy > 0.0) {
            return Err(invalid("calibration.target_energy", "must be > 0"));
        }
        if !(self.calibration.spike_ratio > 1.0) {
            return Err(invalid("calibration.spike_ratio", "must be > 1"));
        }
        let p = &self.power;
        if p.idle_timeout_ms == 0
            || p.idle_timeout_ms >= p.sleep_timeout_ms
            || p.sleep_timeout_ms >= p.deep_timeout_ms
        {
            return Err(invalid(
                "power",
                format!(
                    "timeouts must be positive and strictly increasing (idle {} < sleep {} < deep {})",
                    p.idle_timeout_ms, p.sleep_timeout_ms, p.deep_timeout_ms
                ),
            ));
        }

        if self.audio.frame_size < self.features.feature_size {
            log::warn!(
                "⚠️ Frame size {} is smaller than feature size {}",
                self.audio.frame_size,
                self.features.feature_size
            );
        }
        if self.model.class_count > 10 {
            log::warn!("⚠️ {} output classes may hurt latency", self.model.class_count);
        }
        if self.model.arena_size < 30000 {
            log::warn!(
                "⚠️ Arena of {} bytes is small and may fail to fit the model",
                self.model.arena_size
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_device() {
        let config = KwsConfig::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_size, 1024);
        assert_eq!(config.features.feature_size, 1024);
        assert_eq!(config.model.class_count, 4);
        assert_eq!(config.model.confidence_threshold, 0.7);
        assert_eq!(config.model.arena_size, 61440);
        assert_eq!(config.vad.voice_activation_energy, 0.01);
        assert_eq!(config.power.idle_timeout_ms, 5000);
        assert_eq!(config.power.sleep_timeout_ms, 10000);
        assert_eq!(config.power.deep_timeout_ms, 30000);
        assert_eq!(config.calibration.noise_floor_samples, 50);
        assert_eq!(config.calibration.calibration_samples, 100);
        assert!(config.calibration.auto_gain_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frame_period() {
        let audio = AudioConfig::default();
        // 1024 samples at 16 kHz = 64 ms
        assert_eq!(audio.frame_period_ms(), 64);

        let odd = AudioConfig {
            sample_rate: 16000,
            frame_size: 1000,
            capture_frames: 2,
        };
        assert_eq!(odd.frame_period_ms(), 63);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = KwsConfig::default();
        config.audio.capture_frames = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "audio.capture_frames",
                ..
            })
        ));

        let mut config = KwsConfig::default();
        config.model.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = KwsConfig::default();
        config.power.sleep_timeout_ms = config.power.deep_timeout_ms;
        assert!(config.validate().is_err());

        let mut config = KwsConfig::default();
        config.model.class_count = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "model": {{ "confidence_threshold": 0.8 }}, "features": {{ "transform": "spectral" }} }}"#
        )
        .unwrap();

        let config = KwsConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.model.confidence_threshold, 0.8);
        assert_eq!(config.model.arena_size, 61440);
        assert_eq!(config.features.transform, TransformKind::Spectral);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_unreadable_and_malformed_files() {
        let missing = KwsConfig::from_json_file("/definitely/not/here.json");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            KwsConfig::from_json_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_log_level_selection() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
        logging.debug_enabled = true;
        assert_eq!(logging.level_filter(), log::LevelFilter::Debug);
        logging.enabled = false;
        assert_eq!(logging.level_filter(), log::LevelFilter::Off);
    }
}
