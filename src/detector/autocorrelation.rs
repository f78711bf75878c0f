use std::sync::Arc;

use log::debug;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::detector::internals::{autocorrelation, floor_index};
use crate::detector::{DetectionDebug, DetectionResult, DetectorOptions, PitchDetector};
use crate::error::{PitchError, Result};
use crate::float::Float;
use crate::utils::buffer::{new_complex_buffer, new_real_buffer, rms};
use crate::utils::peak::refine_peak;

/// Time-domain detector: picks the lag with the strongest positive
/// self-similarity and accepts it when that correlation is a large enough
/// share of the window's energy.
pub struct AutocorrelationDetector<T>
where
    T: Float,
{
    options: DetectorOptions,
    window_size: usize,
    fft: Arc<dyn Fft<T>>,
    inverse_fft: Arc<dyn Fft<T>>,
    buffer: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
    correlation: Vec<T>,
    len: usize,
    sample_rate: T,
    rms: T,
    voiced: bool,
}

impl<T> AutocorrelationDetector<T>
where
    T: Float,
{
    pub fn new(window_size: usize, options: DetectorOptions) -> Self {
        // Pad to at least twice the window so the circular correlation does
        // not wrap around.
        let padded = (2 * window_size.max(1)).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(padded);
        let inverse_fft = planner.plan_fft_inverse(padded);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(inverse_fft.get_inplace_scratch_len());

        AutocorrelationDetector {
            options,
            window_size,
            fft,
            inverse_fft,
            buffer: new_complex_buffer(padded),
            scratch: new_complex_buffer(scratch_len),
            correlation: new_real_buffer(padded),
            len: 0,
            sample_rate: T::zero(),
            rms: T::zero(),
            voiced: false,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Correlation of the last prepared window for lags `0..window`.
    pub fn correlation(&self) -> &[T] {
        &self.correlation[..self.len]
    }

    #[inline]
    fn is_peak(&self, lag: usize) -> bool {
        let r = &self.correlation;
        r[lag] > T::zero() && r[lag] >= r[lag - 1] && r[lag] >= r[lag + 1]
    }
}

impl<T> PitchDetector<T> for AutocorrelationDetector<T>
where
    T: Float,
{
    fn prepare(&mut self, signal: &[T], sample_rate: T) -> Result<T> {
        if !(sample_rate > T::zero()) {
            return Err(PitchError::InvalidSampleRate(sample_rate.as_f64()));
        }
        if signal.len() != self.window_size {
            debug!(
                "autocorrelation window resized from {} to {}",
                self.window_size,
                signal.len()
            );
            *self = AutocorrelationDetector::new(signal.len(), self.options.clone());
        }
        self.sample_rate = sample_rate;
        self.len = signal.len();
        self.rms = rms(signal);
        self.voiced = self.len > 2 && self.rms >= T::cast(self.options.min_rms);
        if !self.voiced {
            return Ok(self.rms);
        }

        autocorrelation(
            signal,
            &self.fft,
            &self.inverse_fft,
            &mut self.buffer,
            &mut self.scratch,
            &mut self.correlation,
        );
        Ok(self.rms)
    }

    fn is_silent(&self) -> bool {
        !self.voiced
    }

    fn search(&self, min_hz: T, max_hz: T) -> DetectionResult<T> {
        if !self.voiced || !(min_hz > T::zero()) || max_hz < min_hz {
            return DetectionResult::none(self.rms);
        }
        let last = self.len - 2;
        let min_lag = floor_index(self.sample_rate / max_hz).max(1);
        let max_lag = floor_index(self.sample_rate / min_hz).min(last);
        if min_lag > max_lag {
            return DetectionResult::none(self.rms);
        }

        let mut best_lag = 0;
        let mut best = T::zero();
        for lag in min_lag..=max_lag {
            if self.is_peak(lag) && self.correlation[lag] > best {
                best = self.correlation[lag];
                best_lag = lag;
            }
        }
        if best_lag == 0 {
            return DetectionResult::none(self.rms);
        }

        // correlation[0] is the window energy, rms^2 * n.
        let energy = self.correlation[0];
        let ratio = if energy > T::zero() {
            best / energy
        } else {
            T::zero()
        };
        let lag = refine_peak(&self.correlation[..self.len], best_lag, 0, self.len - 1);
        let debug = Some(DetectionDebug {
            position: lag,
            best_score: best,
            second_score: energy,
            divisor: 1,
        });
        let confidence = ratio.max(T::zero()).min(T::one());
        let hz = self.sample_rate / lag;
        let accepted = ratio >= T::cast(self.options.autocorr_min_ratio)
            && confidence >= T::cast(self.options.confidence_min)
            && hz.is_finite()
            && hz >= min_hz
            && hz <= max_hz;

        if !accepted {
            return DetectionResult {
                debug,
                ..DetectionResult::none(self.rms)
            };
        }
        DetectionResult {
            hz,
            confidence,
            rms: self.rms,
            debug,
        }
    }
}
