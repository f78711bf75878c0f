//! Vibrato rate from the tail of a cents series.
//!
//! The newest unbroken run of finite samples (at most
//! `analysis_window_seconds` of it) is mean-centred, then scanned backwards
//! for alternating peaks and troughs. Three legs between four extrema give
//! the half-period:
//!
//! > rate = samples_per_second / (2 * average_leg)
use serde::{Deserialize, Serialize};

use crate::utils::ring::HistoryRing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibratoConfig {
    pub min_rate_hz: f64,
    pub max_rate_hz: f64,
    pub analysis_window_seconds: f64,
    pub min_continuous_seconds: f64,
    /// Centred RMS below this is treated as a steady tone.
    pub min_rms_cents: f64,
    /// Peak-to-peak excursion below this is not heard as vibrato.
    pub min_excursion_cents: f64,
}

impl Default for VibratoConfig {
    fn default() -> Self {
        VibratoConfig {
            min_rate_hz: 3.0,
            max_rate_hz: 9.0,
            analysis_window_seconds: 0.5,
            min_continuous_seconds: 0.4,
            min_rms_cents: 5.0,
            min_excursion_cents: 12.0,
        }
    }
}

impl VibratoConfig {
    pub fn max_samples(&self, samples_per_second: f64) -> usize {
        ((samples_per_second * self.analysis_window_seconds).floor() as usize).max(1)
    }

    pub fn min_samples(&self, samples_per_second: f64) -> usize {
        ((samples_per_second * self.min_continuous_seconds).floor() as usize).max(8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Peak,
    Trough,
}

/// 5-point shape test: `c[i]` is at least as extreme as its two neighbours on
/// each side and strictly more extreme than one of them.
fn is_extremum(c: &[f64], i: usize, kind: Extremum) -> bool {
    let v = c[i];
    let around = [c[i - 2], c[i - 1], c[i + 1], c[i + 2]];
    match kind {
        Extremum::Peak => around.iter().all(|&n| v >= n) && around.iter().any(|&n| v > n),
        Extremum::Trough => around.iter().all(|&n| v <= n) && around.iter().any(|&n| v < n),
    }
}

/// Rate of an already mean-centred run, or `None` when four alternating
/// extrema cannot be found or the motion is too small.
fn rate_from_centered(centered: &[f64], samples_per_second: f64, config: &VibratoConfig) -> Option<f64> {
    let len = centered.len();
    if len < 5 {
        return None;
    }
    // The slope check lines up with the first candidate index, len - 3.
    let mut expected = if centered[len - 2] - centered[len - 3] >= 0.0 {
        Extremum::Trough
    } else {
        Extremum::Peak
    };

    let mut extrema = [0usize; 4];
    let mut found = 0;
    let (mut peaks, mut troughs) = (0, 0);
    let mut index = len - 3;
    while index >= 2 && (peaks < 2 || troughs < 2) {
        if is_extremum(centered, index, expected) {
            extrema[found] = index;
            found += 1;
            match expected {
                Extremum::Peak => {
                    peaks += 1;
                    expected = Extremum::Trough;
                }
                Extremum::Trough => {
                    troughs += 1;
                    expected = Extremum::Peak;
                }
            }
            // Skip past flat tops and bottoms.
            index -= 2;
            continue;
        }
        index -= 1;
    }
    if peaks < 2 || troughs < 2 {
        return None;
    }

    let legs = [
        extrema[0] as isize - extrema[1] as isize,
        extrema[1] as isize - extrema[2] as isize,
        extrema[2] as isize - extrema[3] as isize,
    ];
    if legs.iter().any(|&leg| leg <= 0) {
        return None;
    }
    let average_leg = legs.iter().sum::<isize>() as f64 / 3.0;

    let (min, max) = centered
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max - min < config.min_excursion_cents {
        return None;
    }

    let rate = samples_per_second / (2.0 * average_leg);
    (rate.is_finite() && rate >= config.min_rate_hz && rate <= config.max_rate_hz).then_some(rate)
}

/// Centres `tail` in place and estimates its rate.
fn rate_from_tail(tail: &mut [f64], samples_per_second: f64, config: &VibratoConfig) -> Option<f64> {
    if tail.len() < config.min_samples(samples_per_second) {
        return None;
    }
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    tail.iter_mut().for_each(|v| *v -= mean);
    let rms = (tail.iter().map(|v| v * v).sum::<f64>() / tail.len() as f64).sqrt();
    if rms < config.min_rms_cents {
        return None;
    }
    rate_from_centered(tail, samples_per_second, config)
}

/// Rate of the newest finite run of a chronological series.
pub fn estimate_rate(values: &[f64], samples_per_second: f64, config: &VibratoConfig) -> Option<f64> {
    if !(samples_per_second > 0.0) {
        return None;
    }
    let max_samples = config.max_samples(samples_per_second);
    let run = values
        .iter()
        .rev()
        .take(max_samples)
        .take_while(|v| v.is_finite())
        .count();
    let mut tail = values[values.len() - run..].to_vec();
    rate_from_tail(&mut tail, samples_per_second, config)
}

/// Estimator bound to one timeline rate. Holds a scratch buffer sized for the
/// analysis window so repeated estimates do not allocate.
#[derive(Debug, Clone)]
pub struct VibratoEstimator {
    config: VibratoConfig,
    samples_per_second: f64,
    tail: Vec<f64>,
}

impl VibratoEstimator {
    pub fn new(config: VibratoConfig, samples_per_second: f64) -> Self {
        let capacity = config.max_samples(samples_per_second);
        VibratoEstimator {
            config,
            samples_per_second,
            tail: Vec::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &VibratoConfig {
        &self.config
    }

    pub fn samples_per_second(&self) -> f64 {
        self.samples_per_second
    }

    /// Rate of the newest finite run stored in `ring`.
    pub fn estimate(&mut self, ring: &HistoryRing<f64>) -> Option<f64> {
        if !(self.samples_per_second > 0.0) {
            return None;
        }
        let max_samples = self.config.max_samples(self.samples_per_second);
        self.tail.clear();
        self.tail.extend(
            ring.iter()
                .rev()
                .take(max_samples)
                .take_while(|v| v.is_finite()),
        );
        self.tail.reverse();
        rate_from_tail(&mut self.tail, self.samples_per_second, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn vibrato(rate_hz: f64, depth_cents: f64, samples_per_second: f64, seconds: f64) -> Vec<f64> {
        let n = (samples_per_second * seconds) as usize;
        (0..n)
            .map(|i| 6000.0 + depth_cents * (2.0 * PI * rate_hz * i as f64 / samples_per_second).sin())
            .collect()
    }

    #[test]
    fn six_hertz_vibrato() {
        let values = vibrato(6.0, 70.0, 200.0, 5.0);
        let rate = estimate_rate(&values, 200.0, &VibratoConfig::default()).unwrap();
        assert!((rate - 6.0).abs() <= 0.2, "rate {}", rate);
    }

    #[test]
    fn rate_outside_range_is_rejected() {
        let values = vibrato(10.0, 70.0, 200.0, 5.0);
        assert_eq!(estimate_rate(&values, 200.0, &VibratoConfig::default()), None);
    }

    #[test]
    fn flat_or_short_tails_are_rejected() {
        let config = VibratoConfig::default();
        let flat = vibrato(6.0, 2.0, 200.0, 5.0);
        assert_eq!(estimate_rate(&flat, 200.0, &config), None);

        let mut gapped = vec![f64::NAN; 700];
        gapped.extend(vibrato(6.0, 70.0, 200.0, 0.3));
        assert_eq!(estimate_rate(&gapped, 200.0, &config), None);
    }

    #[test]
    fn small_excursion_is_rejected() {
        // A sine deep enough to pass the RMS gate still fails a raised
        // excursion floor.
        let config = VibratoConfig {
            min_excursion_cents: 200.0,
            ..VibratoConfig::default()
        };
        let values = vibrato(6.0, 70.0, 200.0, 5.0);
        assert_eq!(estimate_rate(&values, 200.0, &config), None);
    }

    #[test]
    fn ring_estimate_matches_slice_estimate() {
        let values = vibrato(5.0, 50.0, 300.0, 2.0);
        let mut ring = HistoryRing::new(400, f64::NAN);
        values.iter().for_each(|&v| {
            ring.push(v);
        });
        let mut estimator = VibratoEstimator::new(VibratoConfig::default(), 300.0);
        let from_ring = estimator.estimate(&ring);
        assert!(from_ring.is_some());
        assert_eq!(from_ring, estimate_rate(&values, 300.0, &VibratoConfig::default()));
    }
}
