//! Adaptive search-range tracking.
//!
//! Once a pitch has been found the tracker narrows the detector's search to
//! `[last * narrow_min_factor, last * narrow_max_factor]`, which is cheaper and
//! far less prone to octave jumps. Every `full_scan_interval` windows a
//! full-range search re-validates the lock, and its result only wins when it
//! is `switch_ratio` times more confident than the narrow one. After
//! `reacquire_misses` unvoiced windows in a row the lock is dropped.
//!
//! Independently of the mode, every in-range detection feeds a short history
//! whose median the centre frequency follows with an exponential blend.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::detector::{DetectionResult, PitchDetector};
use crate::error::Result;
use crate::float::Float;
use crate::utils::ring::HistoryRing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeTrackerConfig {
    pub reacquire_misses: usize,
    pub full_scan_interval: u64,
    pub switch_ratio: f64,
    pub narrow_min_factor: f64,
    pub narrow_max_factor: f64,
    /// Weight of the newest median in the centre frequency blend.
    pub center_blend: f64,
}

impl Default for RangeTrackerConfig {
    fn default() -> Self {
        RangeTrackerConfig {
            reacquire_misses: 20,
            full_scan_interval: 40,
            switch_ratio: 1.15,
            narrow_min_factor: 0.5,
            narrow_max_factor: 2.0,
            center_blend: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    LockedNarrow,
    #[default]
    SearchingWide,
}

pub const DEFAULT_CENTER_HZ: f64 = 220.0;

/// State carried from one window to the next.
#[derive(Debug, Clone)]
pub struct PitchTrackerState {
    hz_history: HistoryRing<f64>,
    pub center_hz: f64,
    pub center_cents: f64,
    pub last_tracked_hz: f64,
    pub missed_detections: usize,
    pub adaptive_tick: u64,
    /// Mode the next window will be searched in.
    pub mode: SearchMode,
    /// Whether the last window ran a full-range search.
    pub used_wide_search: bool,
}

impl PitchTrackerState {
    fn new(history_len: usize) -> Self {
        PitchTrackerState {
            hz_history: HistoryRing::new(history_len, f64::NAN),
            center_hz: DEFAULT_CENTER_HZ,
            center_cents: hz_to_cents(DEFAULT_CENTER_HZ),
            last_tracked_hz: 0.0,
            missed_detections: 0,
            adaptive_tick: 0,
            mode: SearchMode::SearchingWide,
            used_wide_search: false,
        }
    }

    pub fn hz_history(&self) -> &HistoryRing<f64> {
        &self.hz_history
    }
}

#[inline]
pub fn hz_to_cents(hz: f64) -> f64 {
    1200.0 * hz.log2()
}

pub struct RangeTracker {
    config: RangeTrackerConfig,
    adaptive: bool,
    state: PitchTrackerState,
    scratch: Vec<f64>,
}

impl RangeTracker {
    /// `history_len` is the number of recent detections the centre median is
    /// taken over.
    pub fn new(config: RangeTrackerConfig, adaptive: bool, history_len: usize) -> Self {
        let history_len = history_len.max(1);
        RangeTracker {
            config,
            adaptive,
            state: PitchTrackerState::new(history_len),
            scratch: Vec::with_capacity(history_len),
        }
    }

    pub fn state(&self) -> &PitchTrackerState {
        &self.state
    }

    pub fn config(&self) -> &RangeTrackerConfig {
        &self.config
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn set_adaptive(&mut self, adaptive: bool) {
        if self.adaptive != adaptive {
            debug!("adaptive range {}", if adaptive { "enabled" } else { "disabled" });
            self.adaptive = adaptive;
            self.state.missed_detections = 0;
            self.state.mode = SearchMode::SearchingWide;
        }
    }

    /// Forgets the lock, history and centre.
    pub fn reset(&mut self) {
        let history_len = self.state.hz_history.capacity();
        self.state = PitchTrackerState::new(history_len);
    }

    fn narrow_range(&self, min_hz: f64, max_hz: f64) -> Option<(f64, f64)> {
        if !self.adaptive
            || !(self.state.last_tracked_hz > 0.0)
            || self.state.missed_detections >= self.config.reacquire_misses
        {
            return None;
        }
        let lo = (self.state.last_tracked_hz * self.config.narrow_min_factor).max(min_hz);
        let hi = (self.state.last_tracked_hz * self.config.narrow_max_factor).min(max_hz);
        (lo < hi).then_some((lo, hi))
    }

    /// Analyses `window` once and searches it in the current mode, then
    /// updates the tracking state from the outcome.
    pub fn detect<T>(
        &mut self,
        detector: &mut dyn PitchDetector<T>,
        window: &[T],
        sample_rate: T,
        min_hz: T,
        max_hz: T,
    ) -> Result<DetectionResult<T>>
    where
        T: Float,
    {
        let rms = detector.prepare(window, sample_rate)?;
        self.state.used_wide_search = false;
        if detector.is_silent() {
            self.finalize(None, min_hz.as_f64(), max_hz.as_f64());
            return Ok(DetectionResult::none(rms));
        }
        if self.adaptive {
            self.state.adaptive_tick += 1;
        }

        let result = match self.narrow_range(min_hz.as_f64(), max_hz.as_f64()) {
            Some((lo, hi)) => {
                let narrow = detector.search(T::cast(lo), T::cast(hi));
                if !narrow.is_voiced() {
                    self.state.used_wide_search = true;
                    detector.search(min_hz, max_hz)
                } else if self.state.adaptive_tick % self.config.full_scan_interval.max(1) == 0 {
                    self.state.used_wide_search = true;
                    let full = detector.search(min_hz, max_hz);
                    let threshold = narrow.confidence * T::cast(self.config.switch_ratio);
                    if full.is_voiced() && full.confidence > threshold {
                        debug!(
                            "full scan moved the lock from {} Hz to {} Hz",
                            narrow.hz, full.hz
                        );
                        full
                    } else {
                        narrow
                    }
                } else {
                    narrow
                }
            }
            None => {
                self.state.used_wide_search = true;
                detector.search(min_hz, max_hz)
            }
        };

        let hz = if result.in_range(min_hz, max_hz) {
            Some(result.hz.as_f64())
        } else {
            None
        };
        self.finalize(hz, min_hz.as_f64(), max_hz.as_f64());
        Ok(result)
    }

    /// Applies one window's outcome. `hz` is the in-range pitch, if any.
    pub fn finalize(&mut self, hz: Option<f64>, min_hz: f64, max_hz: f64) {
        match hz {
            Some(hz) => {
                if self.adaptive && self.state.mode == SearchMode::SearchingWide {
                    debug!("range tracker locked at {:.2} Hz", hz);
                }
                self.state.last_tracked_hz = hz;
                self.state.missed_detections = 0;
                self.state.hz_history.push(hz);
                self.update_center(min_hz, max_hz);
            }
            None if self.adaptive => {
                self.state.missed_detections += 1;
                if self.state.missed_detections == self.config.reacquire_misses
                    && self.state.last_tracked_hz > 0.0
                {
                    debug!(
                        "range tracker lost {:.2} Hz after {} misses",
                        self.state.last_tracked_hz, self.state.missed_detections
                    );
                    self.state.last_tracked_hz = 0.0;
                }
            }
            None => {}
        }
        self.state.mode = if self.adaptive
            && self.state.last_tracked_hz > 0.0
            && self.state.missed_detections < self.config.reacquire_misses
        {
            SearchMode::LockedNarrow
        } else {
            SearchMode::SearchingWide
        };
    }

    fn update_center(&mut self, min_hz: f64, max_hz: f64) {
        self.scratch.clear();
        self.scratch.extend(
            self.state
                .hz_history
                .iter()
                .filter(|hz| hz.is_finite() && *hz >= min_hz && *hz <= max_hz),
        );
        let median = match median(&mut self.scratch) {
            Some(median) => median,
            None => return,
        };
        let state = &mut self.state;
        state.center_hz += (median - state.center_hz) * self.config.center_blend;
        state.center_cents = hz_to_cents(state.center_hz);
    }
}

/// Median of `values`, sorting them in place. Even counts average the two
/// middle values.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const MIN_HZ: f64 = 32.7;
    const MAX_HZ: f64 = 1396.91;

    /// Answers `wide` to full-range searches and `narrow` otherwise, as long as
    /// the answer lies inside the searched range.
    struct Scripted {
        wide: (f64, f64),
        narrow: (f64, f64),
        silent: bool,
        searches: RefCell<Vec<(f64, f64)>>,
    }

    impl Scripted {
        fn new(wide: (f64, f64), narrow: (f64, f64)) -> Self {
            Scripted {
                wide,
                narrow,
                silent: false,
                searches: RefCell::new(Vec::new()),
            }
        }

        fn take_searches(&self) -> Vec<(f64, f64)> {
            self.searches.replace(Vec::new())
        }
    }

    impl PitchDetector<f64> for Scripted {
        fn prepare(&mut self, _signal: &[f64], _sample_rate: f64) -> Result<f64> {
            Ok(if self.silent { 0.0 } else { 0.5 })
        }

        fn is_silent(&self) -> bool {
            self.silent
        }

        fn search(&self, min_hz: f64, max_hz: f64) -> DetectionResult<f64> {
            self.searches.borrow_mut().push((min_hz, max_hz));
            let (hz, confidence) = if max_hz >= MAX_HZ { self.wide } else { self.narrow };
            if hz > 0.0 && hz >= min_hz && hz <= max_hz {
                DetectionResult {
                    hz,
                    confidence,
                    rms: 0.5,
                    debug: None,
                }
            } else {
                DetectionResult::none(0.5)
            }
        }
    }

    fn tracker() -> RangeTracker {
        RangeTracker::new(RangeTrackerConfig::default(), true, 80)
    }

    fn detect(tracker: &mut RangeTracker, detector: &mut Scripted) -> DetectionResult<f64> {
        tracker
            .detect::<f64>(detector, &[0.0; 16], 48000.0, MIN_HZ, MAX_HZ)
            .unwrap()
    }

    #[test]
    fn locks_then_searches_narrow() {
        let mut tracker = tracker();
        let mut detector = Scripted::new((440.0, 0.8), (440.0, 0.8));
        assert_eq!(tracker.state().mode, SearchMode::SearchingWide);

        assert_eq!(detect(&mut tracker, &mut detector).hz, 440.0);
        assert_eq!(detector.take_searches(), vec![(MIN_HZ, MAX_HZ)]);
        assert_eq!(tracker.state().mode, SearchMode::LockedNarrow);

        assert_eq!(detect(&mut tracker, &mut detector).hz, 440.0);
        assert_eq!(detector.take_searches(), vec![(220.0, 880.0)]);
        assert!(!tracker.state().used_wide_search);
    }

    #[test]
    fn narrow_window_is_clipped_to_the_range() {
        let mut tracker = tracker();
        let mut detector = Scripted::new((1000.0, 0.8), (1000.0, 0.8));
        detect(&mut tracker, &mut detector);
        detector.take_searches();
        detect(&mut tracker, &mut detector);
        assert_eq!(detector.take_searches(), vec![(500.0, MAX_HZ)]);
    }

    #[test]
    fn misses_drop_the_lock() {
        let mut tracker = tracker();
        let mut detector = Scripted::new((440.0, 0.8), (440.0, 0.8));
        detect(&mut tracker, &mut detector);

        detector.wide = (0.0, 0.0);
        detector.narrow = (0.0, 0.0);
        for miss in 1..20 {
            detector.take_searches();
            detect(&mut tracker, &mut detector);
            // A failed narrow search falls back to the full range.
            assert_eq!(detector.take_searches().len(), 2);
            assert_eq!(tracker.state().missed_detections, miss);
            assert_eq!(tracker.state().mode, SearchMode::LockedNarrow);
        }
        detect(&mut tracker, &mut detector);
        assert_eq!(tracker.state().last_tracked_hz, 0.0);
        assert_eq!(tracker.state().mode, SearchMode::SearchingWide);
        detector.take_searches();
        detect(&mut tracker, &mut detector);
        assert_eq!(detector.take_searches(), vec![(MIN_HZ, MAX_HZ)]);
    }

    #[test]
    fn periodic_full_scan_needs_a_clear_win() {
        let mut tracker = tracker();
        let mut detector = Scripted::new((440.0, 0.5), (440.0, 0.5));
        detect(&mut tracker, &mut detector);

        // 0.55 is less than 0.5 * 1.15, so the lock holds.
        detector.wide = (660.0, 0.55);
        for _ in 2..=40 {
            assert_eq!(detect(&mut tracker, &mut detector).hz, 440.0);
        }
        assert!(tracker.state().used_wide_search);
        assert_eq!(tracker.state().adaptive_tick, 40);

        detector.wide = (660.0, 0.6);
        for tick in 41..=80 {
            let result = detect(&mut tracker, &mut detector);
            let expected = if tick == 80 { 660.0 } else { 440.0 };
            assert_eq!(result.hz, expected);
        }
        assert_eq!(tracker.state().last_tracked_hz, 660.0);
    }

    #[test]
    fn silent_windows_do_not_advance_the_full_scan() {
        let mut tracker = tracker();
        let mut detector = Scripted::new((440.0, 0.5), (440.0, 0.5));
        detect(&mut tracker, &mut detector);
        assert_eq!(tracker.state().adaptive_tick, 1);

        detector.silent = true;
        detector.take_searches();
        for miss in 1..=5 {
            let result = detect(&mut tracker, &mut detector);
            assert_eq!(result, DetectionResult::silent());
            assert_eq!(tracker.state().missed_detections, miss);
        }
        assert!(detector.take_searches().is_empty());
        assert_eq!(tracker.state().adaptive_tick, 1);
        assert!(!tracker.state().used_wide_search);

        // The full scan still comes on the 40th voiced window.
        detector.silent = false;
        detector.wide = (660.0, 0.6);
        for _ in 2..40 {
            assert_eq!(detect(&mut tracker, &mut detector).hz, 440.0);
        }
        assert_eq!(detect(&mut tracker, &mut detector).hz, 660.0);
        assert_eq!(tracker.state().adaptive_tick, 40);
    }

    #[test]
    fn centre_follows_the_median() {
        let mut tracker = tracker();
        tracker.finalize(Some(200.0), MIN_HZ, MAX_HZ);
        assert!((tracker.state().center_hz - 216.0).abs() < 1e-9);
        tracker.finalize(Some(300.0), MIN_HZ, MAX_HZ);
        // Median of [200, 300] is 250.
        assert!((tracker.state().center_hz - 222.8).abs() < 1e-9);
        let cents = hz_to_cents(tracker.state().center_hz);
        assert!((tracker.state().center_cents - cents).abs() < 1e-9);
    }

    #[test]
    fn fixed_range_never_narrows() {
        let mut tracker = RangeTracker::new(RangeTrackerConfig::default(), false, 80);
        let mut detector = Scripted::new((440.0, 0.8), (440.0, 0.8));
        for _ in 0..3 {
            detect(&mut tracker, &mut detector);
        }
        assert!(detector.take_searches().iter().all(|&range| range == (MIN_HZ, MAX_HZ)));
        assert_eq!(tracker.state().adaptive_tick, 0);
        assert_eq!(tracker.state().mode, SearchMode::SearchingWide);

        detector.wide = (0.0, 0.0);
        detect(&mut tracker, &mut detector);
        assert_eq!(tracker.state().missed_detections, 0);
        assert_eq!(tracker.state().last_tracked_hz, 440.0);

        // Switching adaptive mode on picks up the last pitch.
        tracker.set_adaptive(true);
        detector.take_searches();
        detector.narrow = (440.0, 0.8);
        assert_eq!(detect(&mut tracker, &mut detector).hz, 440.0);
        assert_eq!(detector.take_searches(), vec![(220.0, 880.0)]);
    }

    #[test]
    fn median_of_odd_and_even_counts() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
