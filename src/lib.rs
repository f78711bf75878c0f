//! # Pitch Tracking
//! *pitch_tracking* turns a live stream of audio samples into a pitch
//! timeline: fundamental frequency, cents and vibrato rate at a fixed column
//! rate, ready to be drawn. Every stage works on pre-sized buffers so it can
//! run inside an audio callback.
//!
//! # Stages
//!   * [pipeline]: raw sample ring buffer and hop-accurate analysis windows.
//!   * [fft]: windowed real FFT with a cache of transform plans.
//!   * [detector]: harmonic scoring strategies and an autocorrelation
//!     detector behind one [PitchDetector](detector::PitchDetector) trait.
//!   * [tracker]: adaptive narrowing of the search range around the pitch.
//!   * [timeline]: gap-filled, smoothed, outlier-corrected pitch history,
//!     with the [vibrato](timeline::vibrato) rate estimator.
//!   * [session]: all of the above for one input stream.
//!
//! # Examples
//! ```
//! use pitch_tracking::config::PitchConfig;
//! use pitch_tracking::session::PitchSession;
//!
//! fn main() {
//!     let config = PitchConfig::default();
//!     let sample_rate = config.sample_rate;
//!     let mut session = PitchSession::<f32>::new(config).unwrap();
//!
//!     // Signal coming from some source (microphone, generated, etc...)
//!     let freq = 300.0;
//!     let signal: Vec<f32> = (0..sample_rate as usize / 2)
//!         .map(|x| (0.5 * (2.0 * std::f64::consts::PI * x as f64 * freq / sample_rate).sin()) as f32)
//!         .collect();
//!
//!     for chunk in signal.chunks(128) {
//!         session.push_samples(chunk);
//!         let update = session.process().unwrap();
//!         if let Some(cents) = update.cents {
//!             println!("{} cents, vibrato {:?} Hz", cents, update.vibrato_rate_hz);
//!         }
//!     }
//!     assert!(!session.timeline().is_empty());
//! }
//! ```

pub use error::{PitchError, Result};

pub mod config;
pub mod detector;
pub mod error;
pub mod fft;
pub mod float;
pub mod pipeline;
pub mod session;
pub mod timeline;
pub mod tracker;
pub mod utils;
