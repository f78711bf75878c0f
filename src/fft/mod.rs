//! Real-input forward FFT producing a magnitude spectrum.
//!
//! Transform plans and window tables are memoized in an [FftPlanCache] owned by
//! the caller, so tests can build isolated engines and a long-running session
//! never re-plans a size it has already seen. The cache only saves work; a
//! fresh cache yields bit-identical spectra.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::error::{PitchError, Result};
use crate::float::Float;
use crate::utils::buffer::{new_complex_buffer, new_real_buffer};

/// Taper applied to the input before transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    #[default]
    Hann,
    Blackman,
}

impl WindowFunction {
    /// Coefficient `i` of a window spanning `len` samples.
    fn coefficient(self, i: usize, len: usize) -> f64 {
        let denom = len.saturating_sub(1).max(1) as f64;
        let phase = 2.0 * PI * i as f64 / denom;
        match self {
            WindowFunction::Hann => 0.5 * (1.0 - phase.cos()),
            WindowFunction::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
        }
    }

    /// Half width of the main lobe, in bins of an unpadded transform.
    pub fn main_lobe_half_width(self) -> f64 {
        match self {
            WindowFunction::Hann => 2.0,
            WindowFunction::Blackman => 3.0,
        }
    }
}

/// `true` for 1, 2, 4, 8, ...
pub fn is_power_of_two(value: usize) -> bool {
    value > 0 && value & (value - 1) == 0
}

/// Memoized transform plans keyed by size, and window tables keyed by
/// function and input length.
pub struct FftPlanCache<T>
where
    T: Float,
{
    planner: FftPlanner<T>,
    plans: HashMap<usize, Arc<dyn Fft<T>>>,
    windows: HashMap<(WindowFunction, usize), Arc<[T]>>,
}

impl<T> Default for FftPlanCache<T>
where
    T: Float,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FftPlanCache<T>
where
    T: Float,
{
    pub fn new() -> Self {
        FftPlanCache {
            planner: FftPlanner::new(),
            plans: HashMap::new(),
            windows: HashMap::new(),
        }
    }

    /// Forward plan for `size`, planning it on first use.
    pub fn plan(&mut self, size: usize) -> Arc<dyn Fft<T>> {
        let planner = &mut self.planner;
        self.plans
            .entry(size)
            .or_insert_with(|| planner.plan_fft_forward(size))
            .clone()
    }

    /// Window coefficients for an input of `len` samples.
    pub fn window(&mut self, function: WindowFunction, len: usize) -> Arc<[T]> {
        self.windows
            .entry((function, len))
            .or_insert_with(|| {
                (0..len)
                    .map(|i| T::cast(function.coefficient(i, len)))
                    .collect::<Vec<T>>()
                    .into()
            })
            .clone()
    }

    /// Number of distinct transform sizes planned so far.
    pub fn planned_sizes(&self) -> usize {
        self.plans.len()
    }
}

/// Magnitude spectrum of one window, borrowed from the [FftEngine] that
/// produced it.
#[derive(Debug, Clone, Copy)]
pub struct Spectrum<'a, T>
where
    T: Float,
{
    /// Magnitudes of bins `0..=size / 2`.
    pub magnitudes: &'a [T],
    pub bin_size_hz: T,
    pub size: usize,
    /// Half width of a pure tone's main lobe in bins, zero-padding included.
    /// Peaks closer together than this are not resolved.
    pub lobe_half_width: T,
}

impl<'a, T> Spectrum<'a, T>
where
    T: Float,
{
    #[inline]
    pub fn nyquist_bin(&self) -> usize {
        self.size / 2
    }

    #[inline]
    pub fn bin_to_hz(&self, bin: T) -> T {
        bin * self.bin_size_hz
    }

    /// Largest magnitude across the whole spectrum.
    pub fn max_magnitude(&self) -> T {
        self.magnitudes
            .iter()
            .fold(T::zero(), |acc, &m| if m > acc { m } else { acc })
    }
}

/// Runs windowed, zero-padded forward transforms over pre-sized buffers.
pub struct FftEngine<T>
where
    T: Float,
{
    cache: FftPlanCache<T>,
    buffer: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
    magnitudes: Vec<T>,
}

impl<T> Default for FftEngine<T>
where
    T: Float,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FftEngine<T>
where
    T: Float,
{
    pub fn new() -> Self {
        Self::with_cache(FftPlanCache::new())
    }

    pub fn with_cache(cache: FftPlanCache<T>) -> Self {
        FftEngine {
            cache,
            buffer: Vec::new(),
            scratch: Vec::new(),
            magnitudes: Vec::new(),
        }
    }

    pub fn cache(&self) -> &FftPlanCache<T> {
        &self.cache
    }

    /// Sizes the working buffers for `size` ahead of time so the first
    /// transform on the hot path does not allocate.
    pub fn reserve(&mut self, size: usize) -> Result<()> {
        if !is_power_of_two(size) {
            return Err(PitchError::NotPowerOfTwo { size });
        }
        let fft = self.cache.plan(size);
        if self.buffer.len() != size {
            self.buffer = new_complex_buffer(size);
            self.magnitudes = new_real_buffer(size / 2 + 1);
        }
        let scratch_len = fft.get_inplace_scratch_len();
        if self.scratch.len() < scratch_len {
            self.scratch = new_complex_buffer(scratch_len);
        }
        Ok(())
    }

    /// Window `samples`, zero-pad them to `size` and return the magnitudes of
    /// bins `0..=size / 2`.
    pub fn transform(
        &mut self,
        samples: &[T],
        size: usize,
        window: WindowFunction,
        sample_rate: T,
    ) -> Result<Spectrum<'_, T>> {
        if !(sample_rate > T::zero()) {
            return Err(PitchError::InvalidSampleRate(sample_rate.as_f64()));
        }
        if size < samples.len() {
            return Err(PitchError::TransformTooSmall {
                size,
                samples: samples.len(),
            });
        }
        self.reserve(size)?;

        let fft = self.cache.plan(size);
        let coefficients = self.cache.window(window, samples.len());

        for (slot, (&sample, &w)) in self
            .buffer
            .iter_mut()
            .zip(samples.iter().zip(coefficients.iter()))
        {
            *slot = Complex::new(sample * w, T::zero());
        }
        self.buffer[samples.len()..]
            .iter_mut()
            .for_each(|c| *c = Complex::new(T::zero(), T::zero()));

        fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (m, c) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *m = c.re.hypot(c.im);
        }

        let padding = size as f64 / samples.len().max(1) as f64;
        Ok(Spectrum {
            magnitudes: &self.magnitudes,
            bin_size_hz: sample_rate / T::from_index(size),
            size,
            lobe_half_width: T::cast(window.main_lobe_half_width() * padding),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, size: usize, sample_rate: f64) -> Vec<f64> {
        (0..size)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn rejects_bad_sizes() {
        let mut engine = FftEngine::<f64>::new();
        let samples = vec![0.0; 8];
        assert!(matches!(
            engine.transform(&samples, 12, WindowFunction::Hann, 48000.0),
            Err(PitchError::NotPowerOfTwo { size: 12 })
        ));
        assert!(matches!(
            engine.transform(&samples, 4, WindowFunction::Hann, 48000.0),
            Err(PitchError::TransformTooSmall { size: 4, samples: 8 })
        ));
        assert!(matches!(
            engine.transform(&samples, 8, WindowFunction::Hann, 0.0),
            Err(PitchError::InvalidSampleRate(_))
        ));
    }

    #[test]
    fn peak_lands_on_the_signal_bin() {
        let mut engine = FftEngine::<f64>::new();
        // Bin 32 of a 1024-point transform at 48 kHz.
        let freq = 32.0 * 48000.0 / 1024.0;
        let signal = sine(freq, 1024, 48000.0);
        for window in [WindowFunction::Hann, WindowFunction::Blackman] {
            let spectrum = engine.transform(&signal, 1024, window, 48000.0).unwrap();
            assert_eq!(spectrum.magnitudes.len(), 513);
            let (peak, _) = spectrum
                .magnitudes
                .iter()
                .enumerate()
                .fold((0, 0.0), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
            assert_eq!(peak, 32);
        }
    }

    #[test]
    fn zero_padding_keeps_frequency() {
        let mut engine = FftEngine::<f32>::new();
        let freq = 16.0 * 48000.0 / 512.0;
        let signal: Vec<f32> = sine(freq, 512, 48000.0).into_iter().map(|s| s as f32).collect();
        let spectrum = engine
            .transform(&signal, 2048, WindowFunction::Hann, 48000.0)
            .unwrap();
        let (peak, _) = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        assert_eq!(peak, 64);
        assert_eq!(spectrum.bin_size_hz, 48000.0 / 2048.0);
        // Four times the padding spreads the lobe over four times the bins.
        assert_eq!(spectrum.lobe_half_width, 8.0);
    }

    #[test]
    fn cache_does_not_change_output() {
        let signal = sine(440.0, 2048, 48000.0);
        let mut warm = FftEngine::<f64>::new();
        warm.transform(&signal, 4096, WindowFunction::Hann, 48000.0)
            .unwrap();
        let first = warm
            .transform(&signal, 2048, WindowFunction::Hann, 48000.0)
            .unwrap()
            .magnitudes
            .to_vec();
        assert_eq!(warm.cache().planned_sizes(), 2);

        let mut cold = FftEngine::<f64>::new();
        let second = cold
            .transform(&signal, 2048, WindowFunction::Hann, 48000.0)
            .unwrap()
            .magnitudes
            .to_vec();
        assert_eq!(first, second);
    }
}
