//! Pitch detectors sharing one `{hz, confidence, rms}` contract.
//!
//! Detection is split into two steps so a caller can search one analysed
//! window several times: [PitchDetector::prepare] does the expensive work
//! (RMS gate plus FFT or autocorrelation) and [PitchDetector::search] scores
//! candidates inside a frequency range. The adaptive range tracker uses this
//! to run a narrow and a full-range search against the same spectrum.
//!
//! Strategies are chosen with [DetectorKind] and built by [new_detector]:
//!
//! | kind | domain | confidence |
//! |---|---|---|
//! | `autocorr` | time | best lag correlation / energy |
//! | `hps` | spectrum | best / second-best score |
//! | `shs` | spectrum | best / second-best score |
//! | `residual` | spectrum | relative margin over second-best |
//! | `multi_seed` | spectrum | clamped normalised seed magnitude |
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fft::WindowFunction;
use crate::float::Float;

pub mod autocorrelation;
pub mod hps;
pub mod internals;
pub mod multi_seed;
pub mod residual;
pub mod shs;
pub mod spectral;

pub use autocorrelation::AutocorrelationDetector;
pub use spectral::SpectralDetector;

/// Scoring details of the winning candidate, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionDebug<T>
where
    T: Float,
{
    /// Refined bin (spectral detectors) or lag (autocorrelation) of the winner.
    pub position: T,
    pub best_score: T,
    pub second_score: T,
    /// Harmonic divisor chosen by the multi-seed detector; 1 elsewhere.
    pub divisor: usize,
}

/// Outcome of one detection. `hz == 0` means no pitch was found, which is an
/// ordinary result rather than an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionResult<T>
where
    T: Float,
{
    pub hz: T,
    pub confidence: T,
    pub rms: T,
    pub debug: Option<DetectionDebug<T>>,
}

impl<T> DetectionResult<T>
where
    T: Float,
{
    /// Nothing to analyse.
    pub fn silent() -> Self {
        Self::none(T::zero())
    }

    /// No pitch in a window of the given level.
    pub fn none(rms: T) -> Self {
        DetectionResult {
            hz: T::zero(),
            confidence: T::zero(),
            rms,
            debug: None,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.hz > T::zero()
    }

    /// `true` when a pitch was found inside `min_hz..=max_hz`.
    pub fn in_range(&self, min_hz: T, max_hz: T) -> bool {
        self.is_voiced() && self.hz >= min_hz && self.hz <= max_hz
    }
}

/// Selects the detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[serde(rename = "autocorr", alias = "autocorrelation")]
    Autocorrelation,
    Hps,
    Shs,
    Residual,
    #[default]
    #[serde(alias = "multiSeed")]
    MultiSeed,
}

/// Tuning for every strategy. Each detector reads only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    /// Windows quieter than this RMS are reported silent without scoring.
    pub min_rms: f64,
    pub harmonic_count: usize,
    pub peak_floor_ratio: f64,
    pub confidence_min: f64,

    pub base_weight: f64,
    pub support_threshold_ratio: f64,
    pub support_bonus_per_harmonic: f64,

    pub shs_harmonic_power: f64,
    pub shs_missing_penalty: f64,
    pub shs_fundamental_boost: f64,
    pub shs_support_threshold_ratio: f64,

    pub max_p: usize,
    pub p_count: usize,
    pub p_refine_count: usize,
    pub off_weight: f64,
    pub expected_p0_min_ratio: f64,
    pub expected_p0_penalty_weight: f64,
    pub downward_bias_per_p: f64,
    pub search_radius_bins: usize,

    pub autocorr_min_ratio: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        DetectorOptions {
            min_rms: 0.01,
            harmonic_count: 4,
            peak_floor_ratio: 0.12,
            confidence_min: 0.0,
            base_weight: 1.5,
            support_threshold_ratio: 0.1,
            support_bonus_per_harmonic: 0.45,
            shs_harmonic_power: 0.75,
            shs_missing_penalty: 0.15,
            shs_fundamental_boost: 1.8,
            shs_support_threshold_ratio: 0.18,
            max_p: 6,
            p_count: 12,
            p_refine_count: 4,
            off_weight: 0.5,
            expected_p0_min_ratio: 0.18,
            expected_p0_penalty_weight: 2.0,
            downward_bias_per_p: 0.02,
            search_radius_bins: 2,
            autocorr_min_ratio: 0.25,
        }
    }
}

fn clamp_logged<V>(name: &str, value: V, min: V, max: V) -> V
where
    V: PartialOrd + Copy + std::fmt::Debug,
{
    // NaN compares false both ways and falls through to `min`.
    let clamped = if value > max {
        max
    } else if value >= min {
        value
    } else {
        min
    };
    if clamped != value {
        warn!("detector option {name} = {value:?} clamped to {clamped:?}");
    }
    clamped
}

impl DetectorOptions {
    /// Copy with every knob clamped into its usable range.
    pub fn sanitized(&self) -> Self {
        DetectorOptions {
            min_rms: clamp_logged("min_rms", self.min_rms, 0.0, f64::MAX),
            harmonic_count: clamp_logged("harmonic_count", self.harmonic_count, 2, 6),
            peak_floor_ratio: clamp_logged("peak_floor_ratio", self.peak_floor_ratio, 0.0, 1.0),
            confidence_min: clamp_logged("confidence_min", self.confidence_min, 0.0, f64::MAX),
            base_weight: clamp_logged("base_weight", self.base_weight, 0.5, f64::MAX),
            support_threshold_ratio: clamp_logged(
                "support_threshold_ratio",
                self.support_threshold_ratio,
                0.0,
                1.0,
            ),
            support_bonus_per_harmonic: clamp_logged(
                "support_bonus_per_harmonic",
                self.support_bonus_per_harmonic,
                0.0,
                f64::MAX,
            ),
            shs_harmonic_power: self.shs_harmonic_power,
            shs_missing_penalty: clamp_logged(
                "shs_missing_penalty",
                self.shs_missing_penalty,
                0.0,
                f64::MAX,
            ),
            shs_fundamental_boost: clamp_logged(
                "shs_fundamental_boost",
                self.shs_fundamental_boost,
                1.0,
                f64::MAX,
            ),
            shs_support_threshold_ratio: clamp_logged(
                "shs_support_threshold_ratio",
                self.shs_support_threshold_ratio,
                0.0,
                1.0,
            ),
            max_p: clamp_logged("max_p", self.max_p, 1, usize::MAX),
            p_count: clamp_logged("p_count", self.p_count, 1, usize::MAX),
            p_refine_count: clamp_logged("p_refine_count", self.p_refine_count, 1, usize::MAX),
            off_weight: self.off_weight,
            expected_p0_min_ratio: self.expected_p0_min_ratio,
            expected_p0_penalty_weight: self.expected_p0_penalty_weight,
            downward_bias_per_p: self.downward_bias_per_p,
            search_radius_bins: self.search_radius_bins,
            autocorr_min_ratio: clamp_logged(
                "autocorr_min_ratio",
                self.autocorr_min_ratio,
                0.0,
                f64::MAX,
            ),
        }
    }
}

pub trait PitchDetector<T>
where
    T: Float,
{
    /// Analyse one window and return its RMS. Windows under the silence floor
    /// are not transformed and every later search reports no pitch.
    fn prepare(&mut self, signal: &[T], sample_rate: T) -> Result<T>;

    /// `true` when the last prepared window was under the silence floor.
    fn is_silent(&self) -> bool;

    /// Best candidate inside `min_hz..=max_hz` of the last prepared window.
    fn search(&self, min_hz: T, max_hz: T) -> DetectionResult<T>;

    fn detect(
        &mut self,
        signal: &[T],
        sample_rate: T,
        min_hz: T,
        max_hz: T,
    ) -> Result<DetectionResult<T>> {
        self.prepare(signal, sample_rate)?;
        Ok(self.search(min_hz, max_hz))
    }
}

/// Builds the detector for `kind`, sized for windows of `window_size` samples
/// transformed at `fft_size` points.
pub fn new_detector<T>(
    kind: DetectorKind,
    window_size: usize,
    fft_size: usize,
    window_function: WindowFunction,
    options: &DetectorOptions,
) -> Result<Box<dyn PitchDetector<T>>>
where
    T: Float + 'static,
{
    let options = options.sanitized();
    Ok(match kind {
        DetectorKind::Autocorrelation => Box::new(AutocorrelationDetector::new(window_size, options)),
        spectral => Box::new(SpectralDetector::new(
            spectral,
            window_size,
            fft_size,
            window_function,
            options,
        )?),
    })
}
