//! Session configuration.
//!
//! Every field has a default, so a TOML document only needs the keys it
//! changes:
//!
//! ```toml
//! sample_rate = 44100
//! detector = "hps"
//!
//! [vibrato]
//! max_rate_hz = 8.0
//! ```
use serde::{Deserialize, Serialize};

use crate::detector::{DetectorKind, DetectorOptions};
use crate::error::{PitchError, Result};
use crate::fft::{is_power_of_two, WindowFunction};
use crate::timeline::{TimelineConfig, VibratoConfig};
use crate::tracker::RangeTrackerConfig;

/// C1.
pub const DEFAULT_MIN_HZ: f64 = 32.703_195_662_574_83;
/// F6.
pub const DEFAULT_MAX_HZ: f64 = 1396.912_925_732_545;

fn default_sample_rate() -> f64 {
    48000.0
}

fn default_min_hz() -> f64 {
    DEFAULT_MIN_HZ
}

fn default_max_hz() -> f64 {
    DEFAULT_MAX_HZ
}

fn default_window_size() -> usize {
    2048
}

fn default_column_rate_hz() -> f64 {
    80.0
}

fn default_timeline_seconds() -> f64 {
    5.0
}

fn default_raw_buffer_seconds() -> f64 {
    8.0
}

fn default_center_seconds() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_silence_pause_threshold_ms() -> f64 {
    300.0
}

fn default_min_signal_threshold() -> f64 {
    0.015
}

fn default_initial_max_signal_level() -> f64 {
    0.2 * 0.9
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_min_hz")]
    pub min_hz: f64,
    #[serde(default = "default_max_hz")]
    pub max_hz: f64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Transform length; the window is zero-padded up to it. Defaults to the
    /// window size.
    #[serde(default)]
    pub fft_size: Option<usize>,
    /// Timeline columns per second, which is also the analysis hop rate.
    #[serde(default = "default_column_rate_hz")]
    pub column_rate_hz: f64,
    #[serde(default = "default_timeline_seconds")]
    pub timeline_seconds: f64,
    #[serde(default = "default_raw_buffer_seconds")]
    pub raw_buffer_seconds: f64,
    /// Span of recent detections the tracker's centre frequency follows.
    #[serde(default = "default_center_seconds")]
    pub center_seconds: f64,
    #[serde(default)]
    pub window_function: WindowFunction,

    #[serde(default)]
    pub detector: DetectorKind,
    #[serde(default)]
    pub detector_options: DetectorOptions,

    #[serde(default = "default_true")]
    pub adaptive_range: bool,
    #[serde(default)]
    pub range: RangeTrackerConfig,

    #[serde(default = "default_true")]
    pub auto_pause_on_silence: bool,
    #[serde(default = "default_silence_pause_threshold_ms")]
    pub silence_pause_threshold_ms: f64,
    /// Window RMS needed before detection runs at all.
    #[serde(default = "default_min_signal_threshold")]
    pub min_signal_threshold: f64,
    /// Loudest level assumed before anything louder has been heard.
    #[serde(default = "default_initial_max_signal_level")]
    pub initial_max_signal_level: f64,
    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub vibrato: VibratoConfig,
}

impl Default for PitchConfig {
    fn default() -> Self {
        PitchConfig {
            sample_rate: default_sample_rate(),
            min_hz: default_min_hz(),
            max_hz: default_max_hz(),
            window_size: default_window_size(),
            fft_size: None,
            column_rate_hz: default_column_rate_hz(),
            timeline_seconds: default_timeline_seconds(),
            raw_buffer_seconds: default_raw_buffer_seconds(),
            center_seconds: default_center_seconds(),
            window_function: WindowFunction::default(),
            detector: DetectorKind::default(),
            detector_options: DetectorOptions::default(),
            adaptive_range: true,
            range: RangeTrackerConfig::default(),
            auto_pause_on_silence: true,
            silence_pause_threshold_ms: default_silence_pause_threshold_ms(),
            min_signal_threshold: default_min_signal_threshold(),
            initial_max_signal_level: default_initial_max_signal_level(),
            timeline: TimelineConfig::default(),
            vibrato: VibratoConfig::default(),
        }
    }
}

fn invalid(message: String) -> PitchError {
    PitchError::InvalidConfig(message)
}

impl PitchConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: PitchConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0) {
            return Err(PitchError::InvalidSampleRate(self.sample_rate));
        }
        if !is_power_of_two(self.window_size) {
            return Err(PitchError::NotPowerOfTwo {
                size: self.window_size,
            });
        }
        let fft_size = self.fft_size();
        if !is_power_of_two(fft_size) {
            return Err(PitchError::NotPowerOfTwo { size: fft_size });
        }
        if fft_size < self.window_size {
            return Err(PitchError::TransformTooSmall {
                size: fft_size,
                samples: self.window_size,
            });
        }
        if !(self.min_hz > 0.0) || !(self.min_hz < self.max_hz) {
            return Err(invalid(format!(
                "detection range {} Hz to {} Hz is empty",
                self.min_hz, self.max_hz
            )));
        }
        if !(self.column_rate_hz > 0.0) {
            return Err(invalid(format!(
                "column rate must be positive, got {}",
                self.column_rate_hz
            )));
        }
        if !(self.vibrato.min_rate_hz < self.vibrato.max_rate_hz) {
            return Err(invalid(format!(
                "vibrato range {} Hz to {} Hz is empty",
                self.vibrato.min_rate_hz, self.vibrato.max_rate_hz
            )));
        }
        Ok(())
    }

    /// Transform length actually used.
    pub fn fft_size(&self) -> usize {
        self.fft_size.unwrap_or(self.window_size)
    }

    /// Samples between analysis windows. Usually fractional.
    pub fn hop_size(&self) -> f64 {
        self.sample_rate / self.column_rate_hz
    }

    /// Silent timeline columns before the timeline pauses.
    pub fn silence_pause_step_threshold(&self) -> usize {
        let steps = (self.silence_pause_threshold_ms / 1000.0 * self.column_rate_hz).round();
        (steps.max(0.0) as usize).max(1)
    }

    pub fn timeline_capacity(&self) -> usize {
        ((self.column_rate_hz * self.timeline_seconds).max(0.0).floor() as usize).max(1)
    }

    /// Length of the tracker's hz history.
    pub fn center_history_len(&self) -> usize {
        ((self.center_seconds * self.column_rate_hz).max(0.0).floor() as usize).max(1)
    }
}
