//! One live input stream, from raw chunks to timeline columns.
use log::trace;

use crate::config::PitchConfig;
use crate::detector::{new_detector, DetectionResult, PitchDetector};
use crate::error::Result;
use crate::float::Float;
use crate::pipeline::{AnalysisWindow, RawAudioRingBuffer};
use crate::timeline::{PitchTimeline, TickInput};
use crate::tracker::{hz_to_cents, PitchTrackerState, RangeTracker};
use crate::utils::buffer::rms;

const LEVEL_BLEND: f64 = 0.2;
const INTENSITY_BLEND: f64 = 0.2;
const MAX_LEVEL_MARGIN: f64 = 0.01;
const USABLE_LEVEL_SHARE: f64 = 0.8;

/// Input level bookkeeping behind the timeline's signal strength column.
#[derive(Debug, Clone)]
struct SignalLevels {
    initial_max: f64,
    min_threshold: f64,
    level: f64,
    max_heard: f64,
    intensity: f64,
}

impl SignalLevels {
    fn new(initial_max: f64, min_threshold: f64) -> Self {
        SignalLevels {
            initial_max,
            min_threshold,
            level: 0.0,
            max_heard: initial_max,
            intensity: 0.0,
        }
    }

    fn reset(&mut self) {
        *self = SignalLevels::new(self.initial_max, self.min_threshold);
    }

    /// Folds in one window's RMS and returns the smoothed intensity in `0..=1`.
    fn update(&mut self, rms: f64) -> f64 {
        self.level += (rms - self.level) * LEVEL_BLEND;
        if rms > self.max_heard + MAX_LEVEL_MARGIN {
            self.max_heard = rms;
        }
        let span = self.max_heard * USABLE_LEVEL_SHARE - self.min_threshold;
        let intensity = if span > 0.0 {
            ((rms - self.min_threshold) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.intensity += (intensity - self.intensity) * INTENSITY_BLEND;
        self.intensity
    }
}

/// What one [PitchSession::process] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate<T>
where
    T: Float,
{
    pub windows: usize,
    pub steps_written: usize,
    /// Result for the newest window, if any window was ready.
    pub detection: Option<DetectionResult<T>>,
    /// Cents of the newest window; `None` when it had no pitch in range.
    pub cents: Option<f64>,
    pub vibrato_rate_hz: Option<f64>,
    pub paused: bool,
}

impl<T> Default for SessionUpdate<T>
where
    T: Float,
{
    fn default() -> Self {
        SessionUpdate {
            windows: 0,
            steps_written: 0,
            detection: None,
            cents: None,
            vibrato_rate_hz: None,
            paused: false,
        }
    }
}

pub struct PitchSession<T>
where
    T: Float,
{
    config: PitchConfig,
    raw: RawAudioRingBuffer<T>,
    analysis: AnalysisWindow<T>,
    detector: Box<dyn PitchDetector<T>>,
    tracker: RangeTracker,
    timeline: PitchTimeline,
    levels: SignalLevels,
    last_window_ms: Option<f64>,
}

impl<T> PitchSession<T>
where
    T: Float + 'static,
{
    pub fn new(config: PitchConfig) -> Result<Self> {
        config.validate()?;
        let detector = new_detector(
            config.detector,
            config.window_size,
            config.fft_size(),
            config.window_function,
            &config.detector_options,
        )?;
        let raw = RawAudioRingBuffer::new(
            config.window_size,
            config.sample_rate,
            config.raw_buffer_seconds,
        );
        let analysis = AnalysisWindow::new(config.window_size, config.sample_rate, config.column_rate_hz)?;
        let tracker = RangeTracker::new(
            config.range.clone(),
            config.adaptive_range,
            config.center_history_len(),
        );
        let timeline = PitchTimeline::new(
            config.timeline_capacity(),
            config.column_rate_hz,
            config.auto_pause_on_silence,
            config.silence_pause_step_threshold(),
            config.timeline.clone(),
            config.vibrato.clone(),
        );
        let levels = SignalLevels::new(config.initial_max_signal_level, config.min_signal_threshold);

        Ok(PitchSession {
            config,
            raw,
            analysis,
            detector,
            tracker,
            timeline,
            levels,
            last_window_ms: None,
        })
    }

    pub fn config(&self) -> &PitchConfig {
        &self.config
    }

    pub fn timeline(&self) -> &PitchTimeline {
        &self.timeline
    }

    pub fn tracker_state(&self) -> &PitchTrackerState {
        self.tracker.state()
    }

    /// Samples waiting to be processed.
    pub fn pending_samples(&self) -> usize {
        self.raw.len()
    }

    pub fn dropped_samples(&self) -> u64 {
        self.raw.dropped_total()
    }

    /// Smoothed input level (RMS).
    pub fn signal_level(&self) -> f64 {
        self.levels.level
    }

    /// Buffers a chunk for the next [process](Self::process). Returns the
    /// number of older unprocessed samples it overwrote.
    pub fn push_samples(&mut self, chunk: &[T]) -> usize {
        self.raw.enqueue(chunk)
    }

    /// Analyses every window that became ready since the last call and
    /// advances the timeline once per window.
    pub fn process(&mut self) -> Result<SessionUpdate<T>> {
        let PitchSession {
            config,
            raw,
            analysis,
            detector,
            tracker,
            timeline,
            levels,
            last_window_ms,
        } = self;
        let sample_rate = T::cast(config.sample_rate);
        let (min_hz, max_hz) = (T::cast(config.min_hz), T::cast(config.max_hz));
        let column_ms = 1000.0 / config.column_rate_hz;
        let mut update = SessionUpdate::default();

        analysis.drain(raw, |window, now_ms| {
            let level = rms(window);
            let strength = levels.update(level.as_f64());
            let result = if level.as_f64() > config.min_signal_threshold {
                tracker.detect(detector.as_mut(), window, sample_rate, min_hz, max_hz)?
            } else {
                tracker.finalize(None, config.min_hz, config.max_hz);
                DetectionResult::none(level)
            };
            let cents = if result.in_range(min_hz, max_hz) {
                hz_to_cents(result.hz.as_f64())
            } else {
                f64::NAN
            };
            trace!(
                "window at {:.1} ms: {:.2} Hz, confidence {:.3}, rms {:.4}",
                now_ms,
                result.hz,
                result.confidence,
                result.rms
            );

            let elapsed_ms = last_window_ms.map_or(column_ms, |last| now_ms - last);
            *last_window_ms = Some(now_ms);
            let tick = timeline.tick(TickInput {
                elapsed_ms,
                has_voice: cents.is_finite(),
                cents,
                signal_strength: strength,
            });

            update.windows += 1;
            update.steps_written += tick.steps_written;
            update.paused = tick.paused;
            update.detection = Some(result);
            update.cents = cents.is_finite().then_some(cents);
            Ok(())
        })?;

        update.vibrato_rate_hz = timeline.latest_vibrato_rate();
        Ok(update)
    }

    /// Drops all buffered audio and tracking state.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.analysis.reset();
        self.tracker.reset();
        self.timeline.clear();
        self.levels.reset();
        self.last_window_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, amplitude: f64, len: usize, sample_rate: f64) -> Vec<f64> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn feed(session: &mut PitchSession<f64>, signal: &[f64]) -> Vec<SessionUpdate<f64>> {
        signal
            .chunks(480)
            .map(|chunk| {
                session.push_samples(chunk);
                session.process().unwrap()
            })
            .collect()
    }

    #[test]
    fn one_second_of_sine() {
        let mut session = PitchSession::new(PitchConfig::default()).unwrap();
        let updates = feed(&mut session, &sine(220.0, 0.5, 48000, 48000.0));

        // A 600-sample hop fires 80 times, but only once 2048 samples are in.
        let windows: usize = updates.iter().map(|u| u.windows).sum();
        assert_eq!(windows, 77);
        assert_eq!(session.timeline().len(), 77);
        assert_eq!(session.pending_samples(), 0);

        let last = updates.iter().rev().find_map(|u| u.detection).unwrap();
        assert!((last.hz - 220.0).abs() < 4.0, "{} Hz", last.hz);
        let cents = session.timeline().raw_cents().newest().unwrap();
        assert!((cents - hz_to_cents(220.0)).abs() < 30.0);
        assert!(session.tracker_state().last_tracked_hz > 0.0);
        assert!(session.timeline().signal_strength().newest().unwrap() > 0.0);
    }

    #[test]
    fn silence_pauses_the_timeline() {
        let mut session = PitchSession::new(PitchConfig::default()).unwrap();
        let updates = feed(&mut session, &vec![0.0; 48000]);
        assert!(session.timeline().is_paused());
        assert!(updates.iter().any(|u| u.paused));
        assert!(updates.iter().all(|u| u.cents.is_none()));
        // 300 ms at 80 columns per second.
        assert_eq!(session.timeline().len(), 23);
        assert!(session.timeline().raw_cents().iter().all(|c| c.is_nan()));
    }

    #[test]
    fn overflow_is_counted() {
        let config = PitchConfig {
            raw_buffer_seconds: 0.05,
            ..PitchConfig::default()
        };
        let mut session = PitchSession::<f64>::new(config).unwrap();
        assert_eq!(session.push_samples(&vec![0.1; 5000]), 904);
        assert_eq!(session.dropped_samples(), 904);
        assert_eq!(session.pending_samples(), 4096);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut session = PitchSession::new(PitchConfig::default()).unwrap();
        feed(&mut session, &sine(330.0, 0.5, 24000, 48000.0));
        session.push_samples(&[0.0; 100]);
        session.reset();
        assert!(session.timeline().is_empty());
        assert_eq!(session.pending_samples(), 0);
        assert_eq!(session.tracker_state().last_tracked_hz, 0.0);
        assert_eq!(session.signal_level(), 0.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PitchConfig {
            window_size: 3000,
            ..PitchConfig::default()
        };
        assert!(PitchSession::<f32>::new(config).is_err());
    }

    #[test]
    fn intensity_follows_the_loudest_level() {
        let mut levels = SignalLevels::new(0.18, 0.015);
        let first = levels.update(0.5);
        assert_eq!(levels.max_heard, 0.5);
        assert!((first - 0.2).abs() < 1e-12);
        // Below the usable share of the loudest level, but above the floor.
        levels.update(0.2);
        assert!(levels.intensity > first);
        assert!(levels.intensity < 1.0);
        assert!(levels.level > 0.0);
    }
}
