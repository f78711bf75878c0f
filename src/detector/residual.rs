//! Residual (comb) scoring: how much the bins at every multiple of a candidate
//! stand out above the mean of the whole spectrum. Cheapest of the spectral
//! strategies.
use rustfft::num_traits::Float as NumFloat;

use crate::detector::internals::{covering_bins, Estimate, TopTwo};
use crate::detector::{DetectionDebug, DetectorOptions};
use crate::fft::Spectrum;
use crate::float::Float;
use crate::utils::peak::refine_peak;

pub fn score<T>(spectrum: &Spectrum<'_, T>, min_hz: T, max_hz: T, options: &DetectorOptions) -> Estimate<T>
where
    T: Float,
{
    let magnitudes = spectrum.magnitudes;
    let nyquist = spectrum.nyquist_bin();
    let (min_bin, max_bin) = covering_bins(spectrum, min_hz, max_hz);

    let total: T = magnitudes[..=nyquist].iter().copied().sum();
    let mean = total / T::from_index(nyquist + 1);

    let mut top = TopTwo::new(T::neg_infinity());
    for candidate in min_bin.max(2)..=max_bin {
        let mut sum = T::zero();
        let mut count = 0usize;
        for harmonic_bin in (candidate..=nyquist).step_by(candidate) {
            sum = sum + magnitudes[harmonic_bin];
            count += 1;
        }
        top.offer(candidate, sum - T::from_index(count) * mean);
    }

    let best_bin = match top.best_index {
        Some(bin) if top.best.is_finite() => bin,
        _ => return Estimate::none(),
    };

    let confidence = if top.second.is_finite() {
        let margin = (top.best - top.second) / NumFloat::abs(top.best).max(T::cast(1e-12));
        margin.max(T::zero())
    } else {
        T::one()
    };
    let position = refine_peak(magnitudes, best_bin, min_bin, max_bin);
    let debug = Some(DetectionDebug {
        position,
        best_score: top.best,
        second_score: top.second,
        divisor: 1,
    });
    if confidence < T::cast(options.confidence_min) {
        return Estimate::rejected(debug);
    }

    let hz = spectrum.bin_to_hz(position);
    if !hz.is_finite() || hz < min_hz || hz > max_hz {
        return Estimate::rejected(debug);
    }
    Estimate {
        hz,
        confidence,
        debug,
    }
}
