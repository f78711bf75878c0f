//! Multi-seed refined detection, the live default.
//!
//! The two strongest local peaks in range are taken as seeds. Each seed is
//! assumed to be partial `p` of the fundamental for `p = 1..=max_p`, and each
//! hypothesis `f0 = seed / p` is scored by comparing the spectrum at its
//! partials with probes half a partial away. Hypotheses that divide a seed
//! but find little energy at their own fundamental are penalised, and a small
//! per-divisor bias breaks ties toward the higher fundamental.
//!
//! A divisor is only tried while the hypothesised partials stay at least a
//! main lobe apart; closer than that, neighbouring partials land on the same
//! lobe of a single tone and the hypothesis scores that tone several times.
//!
//! The winner is then refined by locating the actual peaks near its first few
//! partials and averaging the implied fundamentals, weighted by how loud and
//! how sharp each peak is.
//!
//! The magnitudes are expected to be normalised so the largest bin is 1.
use crate::detector::internals::{floor_index, round_index, Estimate};
use crate::detector::{DetectionDebug, DetectorOptions};
use crate::fft::Spectrum;
use crate::float::Float;
use crate::utils::peak::{is_local_max, refine_local_peak};

#[derive(Debug, Clone, Copy)]
struct Hypothesis<T>
where
    T: Float,
{
    f0_bin: T,
    divisor: usize,
    score: T,
}

struct Scorer<'a, T>
where
    T: Float,
{
    magnitudes: &'a [T],
    min_bin: usize,
    max_bin: usize,
    options: &'a DetectorOptions,
}

impl<'a, T> Scorer<'a, T>
where
    T: Float,
{
    #[inline]
    fn in_range(&self, bin: usize) -> bool {
        bin >= self.min_bin && bin <= self.max_bin
    }

    /// Sum of `on - off_weight * off` over the partials of `f0_bin`, and the
    /// magnitude found at the fundamental itself.
    fn score_hypothesis(&self, f0_bin: T) -> (T, T) {
        let off_weight = T::cast(self.options.off_weight);
        let half = T::cast(0.5);
        let mut score = T::zero();
        let mut p0_magnitude = T::zero();
        for p in 1..=self.options.p_count {
            let partial = T::from_index(p);
            let p_bin = round_index(f0_bin * partial);
            if !self.in_range(p_bin) {
                break;
            }
            let on = self.magnitudes[p_bin];
            if p == 1 {
                p0_magnitude = on;
            }
            let off_bin = round_index(f0_bin * (partial + half));
            let off = if self.in_range(off_bin) {
                self.magnitudes[off_bin]
            } else {
                T::zero()
            };
            score = score + on - off_weight * off;
        }
        (score, p0_magnitude)
    }

    /// Weighted average of the fundamentals implied by the peaks found near
    /// the first `p_refine_count` partials of `f0_bin`.
    fn refine(&self, f0_bin: T) -> Option<T> {
        // Search windows of neighbouring partials must not overlap.
        let radius = self.options.search_radius_bins.min(floor_index(f0_bin / T::cast(2.0)));
        let last = self.magnitudes.len() - 1;
        let mut weighted_sum = T::zero();
        let mut total_weight = T::zero();
        for p in 1..=self.options.p_refine_count {
            let target = f0_bin * T::from_index(p);
            if target < T::from_index(self.min_bin) || target > T::from_index(self.max_bin) {
                break;
            }
            let start = floor_index(target)
                .saturating_sub(radius)
                .clamp(self.min_bin, self.max_bin);
            let end = (target.as_f64().ceil() as usize + radius).clamp(self.min_bin, self.max_bin);

            let mut best_bin = start;
            let mut best_magnitude = T::neg_infinity();
            for bin in start..=end {
                if self.magnitudes[bin] > best_magnitude {
                    best_magnitude = self.magnitudes[bin];
                    best_bin = bin;
                }
            }

            let implied = refine_local_peak(self.magnitudes, best_bin) / T::from_index(p);
            let baseline = (self.magnitudes[best_bin.saturating_sub(1)]
                + self.magnitudes[(best_bin + 1).min(last)])
                / T::cast(2.0);
            let peakiness = (best_magnitude - baseline).max(T::zero());
            let weight = best_magnitude * peakiness;
            if !(weight > T::zero()) || !implied.is_finite() {
                continue;
            }
            weighted_sum = weighted_sum + implied * weight;
            total_weight = total_weight + weight;
        }
        if total_weight > T::zero() {
            Some(weighted_sum / total_weight)
        } else {
            None
        }
    }
}

/// The two strongest local maxima inside `min_bin..=max_bin`, strongest
/// first. Falls back to the strongest bin when nothing peaks.
fn seeds<T: Float>(magnitudes: &[T], min_bin: usize, max_bin: usize) -> [Option<usize>; 2] {
    let mut first: Option<usize> = None;
    let mut second: Option<usize> = None;
    for bin in min_bin..=max_bin {
        if !is_local_max(magnitudes, bin, min_bin, max_bin) {
            continue;
        }
        let m = magnitudes[bin];
        match first {
            Some(f) if m <= magnitudes[f] => {
                if second.map_or(true, |s| m > magnitudes[s]) {
                    second = Some(bin);
                }
            }
            _ => {
                second = first;
                first = Some(bin);
            }
        }
    }
    if first.is_none() {
        first = Some(strongest_bin(magnitudes, min_bin, max_bin));
    }
    [first, second]
}

fn strongest_bin<T: Float>(magnitudes: &[T], min_bin: usize, max_bin: usize) -> usize {
    let mut best = min_bin;
    for bin in min_bin..=max_bin {
        if magnitudes[bin] > magnitudes[best] {
            best = bin;
        }
    }
    best
}

pub fn score<T>(spectrum: &Spectrum<'_, T>, min_hz: T, max_hz: T, options: &DetectorOptions) -> Estimate<T>
where
    T: Float,
{
    let magnitudes = spectrum.magnitudes;
    if magnitudes.len() < 8 {
        return Estimate::none();
    }
    let nyquist = spectrum.nyquist_bin();
    let min_bin = floor_index(min_hz / spectrum.bin_size_hz).max(1);
    let max_bin = floor_index(max_hz / spectrum.bin_size_hz).min(nyquist);
    if max_bin <= min_bin {
        return Estimate::none();
    }

    let scorer = Scorer {
        magnitudes,
        min_bin,
        max_bin,
        options,
    };
    let ratio = T::cast(options.expected_p0_min_ratio);
    let penalty_weight = T::cast(options.expected_p0_penalty_weight);
    let bias = T::cast(options.downward_bias_per_p);
    let (lo, hi) = (T::from_index(min_bin), T::from_index(max_bin));
    let min_spacing = spectrum.lobe_half_width;

    let mut best: Option<Hypothesis<T>> = None;
    let mut second_score = T::neg_infinity();
    for seed in seeds(magnitudes, min_bin, max_bin).into_iter().flatten() {
        let seed_magnitude = magnitudes[seed];
        for p in 1..=options.max_p {
            let f0_bin = T::from_index(seed) / T::from_index(p);
            if f0_bin < lo || f0_bin > hi || (p > 1 && f0_bin < min_spacing) {
                continue;
            }
            let (mut score, p0_magnitude) = scorer.score_hypothesis(f0_bin);
            if p > 1 {
                let deficit = (seed_magnitude * ratio - p0_magnitude).max(T::zero());
                score = score - deficit * penalty_weight;
            }
            score = score - T::from_index(p) * bias;

            match best {
                Some(b) if score <= b.score => second_score = second_score.max(score),
                _ => {
                    if let Some(b) = best {
                        second_score = second_score.max(b.score);
                    }
                    best = Some(Hypothesis {
                        f0_bin,
                        divisor: p,
                        score,
                    });
                }
            }
        }
    }

    let best = match best {
        Some(b) => b,
        None => return Estimate::none(),
    };

    let f0_bin = scorer.refine(best.f0_bin).unwrap_or(best.f0_bin);
    let hz = spectrum.bin_to_hz(f0_bin);
    if !hz.is_finite() || hz < min_hz || hz > max_hz {
        return Estimate::none();
    }

    let strongest = magnitudes[strongest_bin(magnitudes, min_bin, max_bin)];
    Estimate {
        hz,
        confidence: strongest.max(T::zero()).min(T::one()),
        debug: Some(DetectionDebug {
            position: f0_bin,
            best_score: best.score,
            second_score,
            divisor: best.divisor,
        }),
    }
}
