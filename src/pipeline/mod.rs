//! Turns irregular sample chunks into evenly spaced analysis windows.
//!
//! The producer [enqueue](RawAudioRingBuffer::enqueue)s chunks of any length.
//! When it outpaces the consumer the oldest samples are overwritten: the
//! newest audio always wins and the overflow is only counted. The consumer
//! [drain](AnalysisWindow::drain)s the backlog one sample at a time into a
//! circular window and emits a time-ordered copy every `hop_size` samples.
//! The hop may be fractional; the remainder carries over so the cadence
//! never drifts.
use log::{debug, warn};

use crate::error::{PitchError, Result};
use crate::float::Float;
use crate::utils::buffer::new_real_buffer;

/// Fixed-capacity FIFO of raw samples that drops the oldest on overflow.
#[derive(Debug, Clone)]
pub struct RawAudioRingBuffer<T>
where
    T: Float,
{
    values: Vec<T>,
    write_index: usize,
    read_index: usize,
    size: usize,
    dropped_total: u64,
}

impl<T> RawAudioRingBuffer<T>
where
    T: Float,
{
    /// Sized to hold `raw_buffer_seconds` of audio and never less than two
    /// analysis windows.
    pub fn new(window_size: usize, sample_rate: f64, raw_buffer_seconds: f64) -> Self {
        let seconds = (sample_rate * raw_buffer_seconds).max(0.0).floor() as usize;
        Self::with_capacity((2 * window_size).max(seconds))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        RawAudioRingBuffer {
            values: new_real_buffer(capacity.max(1)),
            write_index: 0,
            read_index: 0,
            size: 0,
            dropped_total: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Samples overwritten before they were read, since creation or the last
    /// [clear](Self::clear).
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Appends `chunk` and returns how many unread samples it overwrote.
    pub fn enqueue(&mut self, chunk: &[T]) -> usize {
        let capacity = self.values.len();
        let mut dropped = 0;
        for &sample in chunk {
            self.values[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % capacity;
            if self.size < capacity {
                self.size += 1;
            } else {
                self.read_index = (self.read_index + 1) % capacity;
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.dropped_total += dropped as u64;
            warn!(
                "raw audio buffer full, dropped {} oldest samples ({} total)",
                dropped, self.dropped_total
            );
        }
        dropped
    }

    /// Removes and returns the oldest unread sample.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let sample = self.values[self.read_index];
        self.read_index = (self.read_index + 1) % self.values.len();
        self.size -= 1;
        Some(sample)
    }

    /// Unread samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let capacity = self.values.len();
        (0..self.size).map(move |i| self.values[(self.read_index + i) % capacity])
    }

    pub fn clear(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.size = 0;
        self.dropped_total = 0;
    }

    /// Reallocates to `capacity` samples, keeping the newest unread ones.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.values.len() {
            return;
        }
        debug!(
            "raw audio buffer resized from {} to {} samples",
            self.values.len(),
            capacity
        );
        let keep = self.size.min(capacity);
        let mut values = new_real_buffer(capacity);
        for (slot, sample) in values.iter_mut().zip(self.iter().skip(self.size - keep)) {
            *slot = sample;
        }
        self.values = values;
        self.read_index = 0;
        self.size = keep;
        self.write_index = keep % capacity;
    }
}

/// The newest `window_size` samples drained so far, plus the hop clock.
#[derive(Debug, Clone)]
pub struct AnalysisWindow<T>
where
    T: Float,
{
    sample_rate: f64,
    hop_size: f64,
    hop_accumulator: f64,
    processed_samples: u64,
    values: Vec<T>,
    index: usize,
    count: usize,
    scratch: Vec<T>,
}

impl<T> AnalysisWindow<T>
where
    T: Float,
{
    /// Emits a window of `window_size` samples `column_rate_hz` times per
    /// second of audio.
    pub fn new(window_size: usize, sample_rate: f64, column_rate_hz: f64) -> Result<Self> {
        if !(sample_rate > 0.0) {
            return Err(PitchError::InvalidSampleRate(sample_rate));
        }
        if window_size == 0 || !(column_rate_hz > 0.0) {
            return Err(PitchError::InvalidConfig(format!(
                "analysis window needs a positive size and column rate, got {} and {}",
                window_size, column_rate_hz
            )));
        }
        Ok(AnalysisWindow {
            sample_rate,
            hop_size: sample_rate / column_rate_hz,
            hop_accumulator: 0.0,
            processed_samples: 0,
            values: new_real_buffer(window_size),
            index: 0,
            count: 0,
            scratch: new_real_buffer(window_size),
        })
    }

    pub fn window_size(&self) -> usize {
        self.values.len()
    }

    pub fn hop_size(&self) -> f64 {
        self.hop_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn processed_samples(&self) -> u64 {
        self.processed_samples
    }

    /// Milliseconds of audio drained so far.
    pub fn elapsed_ms(&self) -> f64 {
        self.processed_samples as f64 / self.sample_rate * 1000.0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.values.len()
    }

    #[inline]
    fn push(&mut self, sample: T) {
        self.values[self.index] = sample;
        self.index = (self.index + 1) % self.values.len();
        if self.count < self.values.len() {
            self.count += 1;
        }
    }

    /// Linear copy of the window, oldest sample first.
    fn ordered(&mut self) -> &[T] {
        let tail = self.values.len() - self.index;
        self.scratch[..tail].copy_from_slice(&self.values[self.index..]);
        self.scratch[tail..].copy_from_slice(&self.values[..self.index]);
        &self.scratch
    }

    /// Consumes every buffered sample of `raw`. Each time a hop completes on a
    /// full window, `on_window_ready` receives the ordered window and the
    /// stream time in milliseconds at its last sample. Returns the number of
    /// windows emitted; an error from the callback stops the drain with the
    /// remaining samples left in `raw`.
    pub fn drain<F>(&mut self, raw: &mut RawAudioRingBuffer<T>, mut on_window_ready: F) -> Result<usize>
    where
        F: FnMut(&[T], f64) -> Result<()>,
    {
        let mut emitted = 0;
        while let Some(sample) = raw.pop() {
            self.push(sample);
            self.processed_samples += 1;
            self.hop_accumulator += 1.0;
            if self.hop_accumulator < self.hop_size {
                continue;
            }
            self.hop_accumulator -= self.hop_size;
            if !self.is_full() {
                continue;
            }
            let now_ms = self.elapsed_ms();
            on_window_ready(self.ordered(), now_ms)?;
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Changes the window length, keeping the newest samples. The window
    /// refills before the next emission if it grew.
    pub fn resize(&mut self, window_size: usize) {
        let window_size = window_size.max(1);
        if window_size == self.values.len() {
            return;
        }
        debug!(
            "analysis window resized from {} to {} samples",
            self.values.len(),
            window_size
        );
        let keep = self.count.min(window_size);
        let old_len = self.values.len();
        let start = (self.index + old_len - keep) % old_len;
        let mut values = new_real_buffer(window_size);
        for (i, slot) in values.iter_mut().take(keep).enumerate() {
            *slot = self.values[(start + i) % old_len];
        }
        self.values = values;
        self.scratch = new_real_buffer(window_size);
        self.count = keep;
        self.index = keep % window_size;
    }

    /// Restarts the hop clock and empties the window.
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = T::zero());
        self.index = 0;
        self.count = 0;
        self.hop_accumulator = 0.0;
        self.processed_samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn overflow_drops_oldest() {
        // Two windows of 4 outweigh 0.2 s at 10 Hz.
        let mut raw = RawAudioRingBuffer::new(4, 10.0, 0.2);
        assert_eq!(raw.capacity(), 8);
        assert_eq!(raw.enqueue(&ramp(10)), 2);
        assert_eq!(raw.len(), 8);
        assert_eq!(raw.dropped_total(), 2);
        assert_eq!(raw.iter().collect::<Vec<_>>(), ramp(10)[2..].to_vec());
        assert_eq!(raw.pop(), Some(2.0));
    }

    #[test]
    fn drain_emits_on_the_hop() {
        let mut raw = RawAudioRingBuffer::new(4, 1000.0, 1.0);
        raw.enqueue(&ramp(50));
        let mut analysis = AnalysisWindow::new(4, 1000.0, 100.0).unwrap();

        let mut windows = Vec::new();
        let mut times = Vec::new();
        let emitted = analysis
            .drain(&mut raw, |window, now_ms| {
                windows.push(window.to_vec());
                times.push(now_ms);
                Ok(())
            })
            .unwrap();

        assert_eq!(emitted, 5);
        assert_eq!(times, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(windows[0], vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(windows[4], vec![46.0, 47.0, 48.0, 49.0]);
        assert!(raw.is_empty());
    }

    #[test]
    fn fractional_hop_does_not_drift() {
        // 44100 / 80 = 551.25 samples per hop.
        let mut raw = RawAudioRingBuffer::new(512, 44100.0, 2.0);
        let mut analysis = AnalysisWindow::new(512, 44100.0, 80.0).unwrap();
        let mut emitted = 0;
        for _ in 0..441 {
            raw.enqueue(&[0.0; 100]);
            emitted += analysis.drain(&mut raw, |_, _| Ok(())).unwrap();
        }
        assert_eq!(emitted, 80);
        assert_eq!(analysis.processed_samples(), 44100);
    }

    #[test]
    fn windows_wait_until_full() {
        let mut raw = RawAudioRingBuffer::with_capacity(64);
        raw.enqueue(&ramp(6));
        let mut analysis = AnalysisWindow::new(8, 1000.0, 500.0).unwrap();
        let emitted = analysis.drain(&mut raw, |_, _| Ok(())).unwrap();
        assert_eq!(emitted, 0);
        assert!(!analysis.is_full());
    }

    #[test]
    fn callback_error_stops_the_drain() {
        let mut raw = RawAudioRingBuffer::with_capacity(64);
        raw.enqueue(&ramp(20));
        let mut analysis = AnalysisWindow::new(4, 1000.0, 200.0).unwrap();
        let result = analysis.drain(&mut raw, |_, _| Err(PitchError::InvalidSampleRate(0.0)));
        assert!(matches!(result, Err(PitchError::InvalidSampleRate(_))));
        assert_eq!(raw.len(), 15);
    }

    #[test]
    fn resize_keeps_newest() {
        let mut raw = RawAudioRingBuffer::with_capacity(8);
        raw.enqueue(&ramp(6));
        raw.resize(4);
        assert_eq!(raw.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(raw.enqueue(&[6.0]), 1);

        let mut analysis = AnalysisWindow::new(4, 1000.0, 1000.0).unwrap();
        let mut raw = RawAudioRingBuffer::with_capacity(8);
        raw.enqueue(&ramp(5));
        analysis.drain(&mut raw, |_, _| Ok(())).unwrap();
        analysis.resize(2);
        raw.enqueue(&[5.0]);
        let mut last = Vec::new();
        analysis
            .drain(&mut raw, |window, _| {
                last = window.to_vec();
                Ok(())
            })
            .unwrap();
        assert_eq!(last, vec![4.0, 5.0]);
    }

    #[test]
    fn invalid_construction() {
        assert!(AnalysisWindow::<f64>::new(4, 0.0, 80.0).is_err());
        assert!(AnalysisWindow::<f64>::new(4, 48000.0, 0.0).is_err());
        assert!(AnalysisWindow::<f64>::new(0, 48000.0, 80.0).is_err());
    }
}
