//! Error types for the pitch-tracking crate.
//!
//! Only caller contract violations are errors. Silence, an empty search range or
//! an unvoiced window are ordinary results and never show up here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PitchError>;

#[derive(Debug, Error)]
pub enum PitchError {
    #[error("transform size {size} is not a power of two")]
    NotPowerOfTwo { size: usize },
    #[error("transform size {size} is smaller than the {samples} input samples")]
    TransformTooSmall { size: usize, samples: usize },
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(f64),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
}
