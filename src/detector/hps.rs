//! Harmonic product/sum scoring.
//!
//! Every local spectral peak above a floor is scored as
//!
//! > (magnitude * base_weight + sum_h peak_h / h) * (1 + (support - 1) * bonus)
//!
//! where `peak_h` is the strongest bin around harmonic `h` and `support`
//! counts the fundamental plus every harmonic strong enough relative to the
//! candidate.
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

    let base_weight = T::cast(options.base_weight);
    let support_ratio = T::cast(options.support_threshold_ratio);
    let support_bonus = T::cast(options.support_bonus_per_harmonic);

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

        let mut harmonic_score = T::zero();
        let mut support = 1usize;
        for harmonic in 2..=options.harmonic_count {
            let harmonic_bin = bin * harmonic;
            if harmonic_bin > nyquist {
                break;
            }
            let peak = harmonic_peak(magnitudes, harmonic_bin);
            harmonic_score = harmonic_score + peak / T::from_index(harmonic);
            if peak >= candidate * support_ratio {
                support += 1;
            }
        }

        let multiplier = T::one() + T::from_index(support - 1) * support_bonus;
        top.offer(bin, (candidate * base_weight + harmonic_score) * multiplier);
    }

    let best_bin = match top.best_index {
        Some(bin) if top.best > T::zero() => bin,
        _ => return Estimate::none(),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_of(magnitudes: &[f64]) -> Spectrum<'_, f64> {
        Spectrum {
            magnitudes,
            bin_size_hz: 10.0,
            size: (magnitudes.len() - 1) * 2,
            lobe_half_width: 2.0,
        }
    }

    #[test]
    fn harmonic_support_beats_a_louder_lone_peak() {
        // Fundamental at bin 10 with harmonics at 20 and 30; a lone, slightly
        // louder peak sits at bin 25.
        let mut magnitudes = vec![0.0; 65];
        magnitudes[10] = 1.0;
        magnitudes[20] = 0.8;
        magnitudes[30] = 0.6;
        magnitudes[25] = 1.2;
        let spectrum = spectrum_of(&magnitudes);
        let estimate = score(&spectrum, 50.0, 400.0, &DetectorOptions::default());
        assert_eq!(estimate.hz, 100.0);
        assert!(estimate.confidence > 1.0);
    }

    #[test]
    fn quiet_bins_below_the_floor_are_ignored() {
        let mut magnitudes = vec![0.0; 65];
        magnitudes[12] = 1.0;
        magnitudes[6] = 0.05;
        let spectrum = spectrum_of(&magnitudes);
        let estimate = score(&spectrum, 30.0, 400.0, &DetectorOptions::default());
        assert_eq!(estimate.hz, 120.0);
        // Only one candidate was scored.
        assert_eq!(estimate.debug.unwrap().second_score, 0.0);
    }

    #[test]
    fn confidence_gate_rejects() {
        let mut magnitudes = vec![0.0; 65];
        magnitudes[10] = 1.0;
        magnitudes[14] = 1.0;
        let spectrum = spectrum_of(&magnitudes);
        let options = DetectorOptions {
            confidence_min: 1.5,
            ..DetectorOptions::default()
        };
        let estimate = score(&spectrum, 50.0, 400.0, &options);
        assert_eq!(estimate.hz, 0.0);
        assert_eq!(estimate.confidence, 0.0);
        // The scores that failed the gate are still reported.
        let debug = estimate.debug.unwrap();
        assert_eq!(debug.best_score, debug.second_score);
    }

    #[test]
    fn out_of_range_refinement_is_rejected() {
        // Bin 1 sits on the lower edge of the range and is not refined, so
        // 10 Hz falls below 15 Hz.
        let mut magnitudes = vec![0.0; 65];
        magnitudes[1] = 1.0;
        let spectrum = spectrum_of(&magnitudes);
        let estimate = score(&spectrum, 15.0, 400.0, &DetectorOptions::default());
        assert_eq!(estimate.hz, 0.0);
        assert_eq!(estimate.confidence, 0.0);
        assert!(estimate.debug.is_some());
    }

    #[test]
    fn empty_spectrum_has_no_pitch() {
        let magnitudes = vec![0.0; 65];
        let spectrum = spectrum_of(&magnitudes);
        assert_eq!(
            score(&spectrum, 50.0, 400.0, &DetectorOptions::default()),
            Estimate::none()
        );
    }
}
