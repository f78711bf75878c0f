//! Fixed-rate pitch timeline fed by irregularly timed detections.
//!
//! Each [PitchTimeline::tick] converts the time since the previous tick into
//! owed columns at `column_rate_hz`, carrying the fractional remainder so the
//! column clock never drifts. Owed columns are written into four parallel
//! rings: raw cents, display-smoothed cents, signal strength and vibrato
//! rate. NaN marks a column without pitch and is never bridged.
//!
//! Every write also:
//! * replaces a lone near-octave outlier two columns back with the mean of
//!   its neighbours two columns either side,
//! * smooths the column three back with a 7-tap kernel once its whole
//!   neighbourhood is finite,
//! * estimates the vibrato rate over the smoothed tail.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::utils::ring::HistoryRing;

pub mod vibrato;

pub use vibrato::{VibratoConfig, VibratoEstimator};

const SMOOTH_RADIUS: usize = 3;
const SMOOTH_KERNEL: [f64; 2 * SMOOTH_RADIUS + 1] = [0.01, 0.08, 0.22, 0.38, 0.22, 0.08, 0.01];
const STEP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// The two anchors around a suspected outlier must agree this closely.
    pub anchor_max_diff_cents: f64,
    /// Distance from the anchor mean that marks a column as an outlier.
    pub octave_outlier_cents: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        TimelineConfig {
            anchor_max_diff_cents: 400.0,
            octave_outlier_cents: 1000.0,
        }
    }
}

/// One scheduling update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    /// Time since the previous tick.
    pub elapsed_ms: f64,
    pub has_voice: bool,
    pub cents: f64,
    pub signal_strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickResult {
    pub steps_written: usize,
    pub paused: bool,
    /// Physical ring index of the newest column written by this tick.
    pub last_write_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PitchTimeline {
    raw: HistoryRing<f64>,
    smoothed: HistoryRing<f64>,
    strength: HistoryRing<f64>,
    vibrato: HistoryRing<f64>,
    column_rate_hz: f64,
    accumulator: f64,
    auto_pause_on_silence: bool,
    silence_pause_steps: usize,
    silent_step_count: usize,
    paused: bool,
    total_tick_count: u64,
    config: TimelineConfig,
    estimator: VibratoEstimator,
}

impl PitchTimeline {
    /// A timeline holding `capacity` columns at `column_rate_hz`. Silence
    /// pauses it after `silence_pause_steps` columns when
    /// `auto_pause_on_silence` is set.
    pub fn new(
        capacity: usize,
        column_rate_hz: f64,
        auto_pause_on_silence: bool,
        silence_pause_steps: usize,
        config: TimelineConfig,
        vibrato: VibratoConfig,
    ) -> Self {
        PitchTimeline {
            raw: HistoryRing::new(capacity, f64::NAN),
            smoothed: HistoryRing::new(capacity, f64::NAN),
            strength: HistoryRing::new(capacity, f64::NAN),
            vibrato: HistoryRing::new(capacity, f64::NAN),
            column_rate_hz,
            accumulator: 0.0,
            auto_pause_on_silence,
            silence_pause_steps: silence_pause_steps.max(1),
            silent_step_count: 0,
            paused: false,
            total_tick_count: 0,
            config,
            estimator: VibratoEstimator::new(vibrato, column_rate_hz),
        }
    }

    pub fn raw_cents(&self) -> &HistoryRing<f64> {
        &self.raw
    }

    pub fn smoothed_cents(&self) -> &HistoryRing<f64> {
        &self.smoothed
    }

    pub fn signal_strength(&self) -> &HistoryRing<f64> {
        &self.strength
    }

    pub fn vibrato_rate_hz(&self) -> &HistoryRing<f64> {
        &self.vibrato
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn column_rate_hz(&self) -> f64 {
        self.column_rate_hz
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn total_tick_count(&self) -> u64 {
        self.total_tick_count
    }

    /// Vibrato rate stored with the newest column.
    pub fn latest_vibrato_rate(&self) -> Option<f64> {
        self.vibrato.newest().filter(|rate| rate.is_finite())
    }

    /// Mean raw cents over the newest `recent_samples` columns, counting only
    /// columns that carry a vibrato rate. This is where a vibrato display
    /// centres its axis.
    pub fn center_cents(&self, recent_samples: usize) -> Option<f64> {
        let recent = recent_samples.max(1).min(self.raw.len());
        let (sum, count) = (0..recent)
            .filter_map(|offset| {
                let rate = self.vibrato.from_newest(offset)?;
                let cents = self.raw.from_newest(offset)?;
                (rate.is_finite() && cents.is_finite()).then_some(cents)
            })
            .fold((0.0, 0usize), |(sum, count), cents| (sum + cents, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Fractional columns owed for `elapsed_ms`.
    fn consume_elapsed(&mut self, elapsed_ms: f64) -> usize {
        if !(elapsed_ms > 0.0) || !(self.column_rate_hz > 0.0) {
            return 0;
        }
        let budget_ms = 1000.0 / self.column_rate_hz;
        let owed = self.accumulator + elapsed_ms / budget_ms;
        let steps = (owed + STEP_EPSILON).floor();
        self.accumulator = owed - steps;
        steps as usize
    }

    fn update_pause(&mut self, has_voice: bool, steps: usize) {
        if !self.auto_pause_on_silence || has_voice {
            self.silent_step_count = 0;
            return;
        }
        self.silent_step_count += steps;
        if self.silent_step_count >= self.silence_pause_steps {
            debug!("timeline paused after {} silent columns", self.silent_step_count);
            self.paused = true;
        }
    }

    pub fn tick(&mut self, input: TickInput) -> TickResult {
        self.total_tick_count += 1;
        if self.paused {
            // The clock stands still until a voiced tick restarts it.
            if !input.has_voice {
                return TickResult {
                    steps_written: 0,
                    paused: true,
                    last_write_index: None,
                };
            }
            debug!("timeline resumed after {} silent columns", self.silent_step_count);
            self.paused = false;
            self.silent_step_count = 0;
            self.accumulator = 0.0;
        }

        let steps = self.consume_elapsed(input.elapsed_ms);
        if steps == 0 {
            return TickResult {
                steps_written: 0,
                paused: false,
                last_write_index: None,
            };
        }

        self.update_pause(input.has_voice, steps);
        if self.paused {
            return TickResult {
                steps_written: 0,
                paused: true,
                last_write_index: None,
            };
        }

        let value = if input.has_voice && input.cents.is_finite() {
            input.cents
        } else {
            f64::NAN
        };
        let strength = if value.is_finite() {
            input.signal_strength
        } else {
            f64::NAN
        };
        let previous = self.raw.newest().unwrap_or(f64::NAN);
        let ramp = steps > 1 && previous.is_finite() && value.is_finite();

        // Columns older than the capacity would be overwritten in this same
        // tick, so only the newest `capacity` of them are written.
        let first = steps.saturating_sub(self.capacity()) + 1;
        let mut last_write_index = None;
        for k in first..=steps {
            let column = if ramp {
                previous + (value - previous) * k as f64 / steps as f64
            } else {
                value
            };
            last_write_index = Some(self.push(column, strength));
        }

        TickResult {
            steps_written: steps - first + 1,
            paused: false,
            last_write_index,
        }
    }

    fn push(&mut self, value: f64, strength: f64) -> usize {
        let index = self.raw.push(value);
        self.smoothed.push(value);
        self.strength.push(strength);
        self.vibrato.push(f64::NAN);
        self.correct_anchor_outlier();
        self.smooth_for_display();
        let rate = self.estimator.estimate(&self.smoothed);
        self.vibrato.set_from_newest(0, rate.unwrap_or(f64::NAN));
        index
    }

    fn correct_anchor_outlier(&mut self) {
        if self.raw.len() < 5 {
            return;
        }
        let (left, center, right) = match (
            self.raw.from_newest(4),
            self.raw.from_newest(2),
            self.raw.from_newest(0),
        ) {
            (Some(l), Some(c), Some(r)) if l.is_finite() && c.is_finite() && r.is_finite() => {
                (l, c, r)
            }
            _ => return,
        };
        if (left - right).abs() > self.config.anchor_max_diff_cents {
            return;
        }
        let anchor_mean = (left + right) / 2.0;
        if (center - anchor_mean).abs() <= self.config.octave_outlier_cents {
            return;
        }
        self.raw.set_from_newest(2, anchor_mean);
        self.smoothed.set_from_newest(2, anchor_mean);
    }

    fn smooth_for_display(&mut self) {
        if self.raw.len() < SMOOTH_KERNEL.len() {
            return;
        }
        let mut smoothed = 0.0;
        for (i, weight) in SMOOTH_KERNEL.iter().enumerate() {
            // Oldest of the seven first.
            match self.raw.from_newest(SMOOTH_KERNEL.len() - 1 - i) {
                Some(sample) if sample.is_finite() => smoothed += sample * weight,
                _ => return,
            }
        }
        self.smoothed.set_from_newest(SMOOTH_RADIUS, smoothed);
    }

    /// Keeps the newest `min(len, capacity)` columns, in order, in every ring.
    pub fn resize(&mut self, capacity: usize) {
        if capacity.max(1) == self.capacity() {
            return;
        }
        debug!("timeline resized from {} to {} columns", self.capacity(), capacity);
        self.raw.resize(capacity);
        self.smoothed.resize(capacity);
        self.strength.resize(capacity);
        self.vibrato.resize(capacity);
    }

    /// Forgets every column and the scheduling state.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.smoothed.clear();
        self.strength.clear();
        self.vibrato.clear();
        self.accumulator = 0.0;
        self.silent_step_count = 0;
        self.paused = false;
    }
}
