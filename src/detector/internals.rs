use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::Fft;

use crate::detector::DetectionDebug;
use crate::fft::Spectrum;
use crate::float::Float;
use crate::utils::buffer::{copy_complex_to_real, copy_real_to_complex, modulus_squared};

/// Result of scoring one search range, before the window level is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate<T>
where
    T: Float,
{
    pub hz: T,
    pub confidence: T,
    pub debug: Option<DetectionDebug<T>>,
}

impl<T> Estimate<T>
where
    T: Float,
{
    pub fn none() -> Self {
        Estimate {
            hz: T::zero(),
            confidence: T::zero(),
            debug: None,
        }
    }

    /// A scored candidate that did not survive gating. Only the debug
    /// scores are kept.
    pub fn rejected(debug: Option<DetectionDebug<T>>) -> Self {
        Estimate {
            hz: T::zero(),
            confidence: T::zero(),
            debug,
        }
    }
}

#[inline]
pub fn floor_index<T: Float>(value: T) -> usize {
    // Saturating cast: NaN and negatives map to 0.
    value.as_f64().floor() as usize
}

#[inline]
pub fn ceil_index<T: Float>(value: T) -> usize {
    value.as_f64().ceil() as usize
}

#[inline]
pub fn round_index<T: Float>(value: T) -> usize {
    value.as_f64().round() as usize
}

/// Inclusive bin range `[min_bin, max_bin]` covering `min_hz..=max_hz`, with
/// the lower edge rounded down and the upper edge up, both kept in
/// `1..=nyquist`.
pub fn covering_bins<T: Float>(spectrum: &Spectrum<'_, T>, min_hz: T, max_hz: T) -> (usize, usize) {
    let nyquist = spectrum.nyquist_bin();
    let min_hz = min_hz.max(T::cast(1e-6));
    let max_hz = max_hz.max(min_hz);
    let min_bin = floor_index(min_hz / spectrum.bin_size_hz).clamp(1, nyquist.max(1));
    let max_bin = ceil_index(max_hz / spectrum.bin_size_hz).clamp(min_bin, nyquist.max(min_bin));
    (min_bin, max_bin)
}

/// Keeps the two largest scores seen so far.
#[derive(Debug, Clone, Copy)]
pub struct TopTwo<T>
where
    T: Float,
{
    pub best_index: Option<usize>,
    pub best: T,
    pub second: T,
}

impl<T> TopTwo<T>
where
    T: Float,
{
    pub fn new(floor: T) -> Self {
        TopTwo {
            best_index: None,
            best: floor,
            second: floor,
        }
    }

    #[inline]
    pub fn offer(&mut self, index: usize, score: T) {
        if score > self.best {
            self.second = self.best;
            self.best = score;
            self.best_index = Some(index);
        } else if score > self.second {
            self.second = score;
        }
    }
}

/// Largest of the magnitudes at `bin - 1`, `bin`, `bin + 1`, clamped to the
/// spectrum.
#[inline]
pub fn harmonic_peak<T: Float>(magnitudes: &[T], bin: usize) -> T {
    let last = magnitudes.len() - 1;
    let left = magnitudes[bin.saturating_sub(1)];
    let mid = magnitudes[bin];
    let right = magnitudes[(bin + 1).min(last)];
    left.max(mid).max(right)
}

/// Compute the linear autocorrelation of `signal` into `result` using an FFT.
/// `buffer` must be at least twice as long as `signal` so the circular
/// correlation does not wrap; `result[lag]` is `sum_i x_i * x_{i+lag}`.
pub fn autocorrelation<T>(
    signal: &[T],
    fft: &Arc<dyn Fft<T>>,
    inverse_fft: &Arc<dyn Fft<T>>,
    buffer: &mut [Complex<T>],
    scratch: &mut [Complex<T>],
    result: &mut [T],
) where
    T: Float,
{
    copy_real_to_complex(signal, buffer);
    fft.process_with_scratch(buffer, scratch);
    modulus_squared(buffer);
    inverse_fft.process_with_scratch(buffer, scratch);
    // rustfft leaves both passes unnormalized, so scale by 1/N once.
    let normalization = T::one() / T::from_index(buffer.len());
    buffer.iter_mut().for_each(|c| c.re = c.re * normalization);
    copy_complex_to_real(buffer, result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::buffer::{new_complex_buffer, new_real_buffer};
    use rustfft::FftPlanner;

    #[test]
    fn autocorrelation_matches_direct_sum() {
        let signal: Vec<f64> = vec![0., 1., 2., 0., -1., -2.];
        let size = 16;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let mut buffer = new_complex_buffer(size);
        let mut scratch = new_complex_buffer(fft.get_inplace_scratch_len().max(inverse.get_inplace_scratch_len()));
        let mut computed = new_real_buffer(size);

        autocorrelation(&signal, &fft, &inverse, &mut buffer, &mut scratch, &mut computed);

        for lag in 0..signal.len() {
            let direct: f64 = signal[..signal.len() - lag]
                .iter()
                .zip(signal[lag..].iter())
                .map(|(a, b)| a * b)
                .sum();
            // Using an FFT loses precision; round generously.
            assert_eq!((computed[lag] * 100.).round() / 100., direct);
        }
    }

    #[test]
    fn top_two_tracks_runner_up() {
        let mut top = TopTwo::new(0.0f64);
        for (i, s) in [3.0, 5.0, 4.0, 1.0].iter().enumerate() {
            top.offer(i, *s);
        }
        assert_eq!(top.best_index, Some(1));
        assert_eq!(top.best, 5.0);
        assert_eq!(top.second, 4.0);
    }

    #[test]
    fn covering_bins_stay_inside_spectrum() {
        let magnitudes = vec![0.0f64; 513];
        let spectrum = Spectrum {
            magnitudes: &magnitudes,
            bin_size_hz: 48000.0 / 1024.0,
            size: 1024,
            lobe_half_width: 2.0,
        };
        assert_eq!(covering_bins(&spectrum, 100.0, 1000.0), (2, 22));
        assert_eq!(covering_bins(&spectrum, 0.0, 90000.0), (1, 512));
    }
}
