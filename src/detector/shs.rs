//! Subharmonic summation.
//!
//! A candidate's score is the weighted sum of the peaks around its first
//! `harmonic_count` harmonics (`weight = boost / h^power` for the fundamental,
//! `1 / h^power` above it), minus a penalty for every harmonic that fits below
//! Nyquist but shows too little energy.
use crate::detector::internals::{covering_bins, harmonic_peak, Estimate, TopTwo};
use crate::detector::{DetectionDebug, DetectorOptions};
use crate::fft::Spectrum;
use crate::float::Float;
use crate::utils::peak::{is_local_max, refine_peak};

pub fn score<T>(spectrum: &Spectrum<'_, T>, min_hz: T, max_hz: T, options: &DetectorOptions) -> Estimate<T>
where
    T: Float,
{
    let magnitudes = spectrum.magnitudes;
    let nyquist = spectrum.nyquist_bin();
    let (min_bin, max_bin) = covering_bins(spectrum, min_hz, max_hz);

    let power = T::cast(options.shs_harmonic_power);
    let missing_penalty = T::cast(options.shs_missing_penalty);
    let boost = T::cast(options.shs_fundamental_boost);
    let support_ratio = T::cast(options.shs_support_threshold_ratio);

    let max_in_range = magnitudes[min_bin..=max_bin]
        .iter()
        .fold(T::zero(), |acc, &m| acc.max(m));
    let peak_floor = max_in_range * T::cast(options.peak_floor_ratio);

    let mut top = TopTwo::new(T::zero());
    for bin in min_bin..=max_bin {
        let candidate = magnitudes[bin];
        if candidate < peak_floor || !is_local_max(magnitudes, bin, min_bin, max_bin) {
            continue;
        }

        let mut score = T::zero();
        let mut supported = 0usize;
        for harmonic in 1..=options.harmonic_count {
            let harmonic_bin = bin * harmonic;
            if harmonic_bin > nyquist {
                break;
            }
            let peak = harmonic_peak(magnitudes, harmonic_bin);
            if peak >= candidate * support_ratio {
                supported += 1;
            }
            let weight = if harmonic == 1 { boost } else { T::one() };
            score = score + peak * weight / T::from_index(harmonic).powf(power);
        }

        let expected = options.harmonic_count.min(nyquist / bin);
        let missing = expected.saturating_sub(supported);
        score = score - T::from_index(missing) * missing_penalty * candidate;
        if score <= T::zero() {
            continue;
        }
        top.offer(bin, score);
    }

    let best_bin = match top.best_index {
        Some(bin) => bin,
        None => return Estimate::none(),
    };

    let confidence = if top.second > T::zero() {
        top.best / top.second
    } else {
        top.best
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
