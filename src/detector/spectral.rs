use crate::detector::internals::Estimate;
use crate::detector::{hps, multi_seed, residual, shs};
use crate::detector::{DetectionResult, DetectorKind, DetectorOptions, PitchDetector};
use crate::error::{PitchError, Result};
use crate::fft::{is_power_of_two, FftEngine, Spectrum, WindowFunction};
use crate::float::Float;
use crate::utils::buffer::{new_real_buffer, rms};

/// One windowed FFT per prepared window, scored by a harmonic strategy.
pub struct SpectralDetector<T>
where
    T: Float,
{
    kind: DetectorKind,
    options: DetectorOptions,
    fft_size: usize,
    window_function: WindowFunction,
    engine: FftEngine<T>,
    magnitudes: Vec<T>,
    bin_size_hz: T,
    lobe_half_width: T,
    rms: T,
    voiced: bool,
}

impl<T> SpectralDetector<T>
where
    T: Float,
{
    /// `kind` must be one of the spectral strategies. `fft_size` must be a
    /// power of two of at least `window_size`; the window is zero-padded up to
    /// it.
    pub fn new(
        kind: DetectorKind,
        window_size: usize,
        fft_size: usize,
        window_function: WindowFunction,
        options: DetectorOptions,
    ) -> Result<Self> {
        if kind == DetectorKind::Autocorrelation {
            return Err(PitchError::InvalidConfig(
                "autocorrelation is not a spectral strategy".into(),
            ));
        }
        if !is_power_of_two(fft_size) {
            return Err(PitchError::NotPowerOfTwo { size: fft_size });
        }
        if fft_size < window_size {
            return Err(PitchError::TransformTooSmall {
                size: fft_size,
                samples: window_size,
            });
        }
        let mut engine = FftEngine::new();
        engine.reserve(fft_size)?;

        Ok(SpectralDetector {
            kind,
            options,
            fft_size,
            window_function,
            engine,
            magnitudes: new_real_buffer(fft_size / 2 + 1),
            bin_size_hz: T::zero(),
            lobe_half_width: T::zero(),
            rms: T::zero(),
            voiced: false,
        })
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    /// Magnitudes of the last prepared window. Multi-seed detectors hold them
    /// normalised to a maximum of 1.
    pub fn spectrum(&self) -> Spectrum<'_, T> {
        Spectrum {
            magnitudes: &self.magnitudes,
            bin_size_hz: self.bin_size_hz,
            size: self.fft_size,
            lobe_half_width: self.lobe_half_width,
        }
    }
}

impl<T> PitchDetector<T> for SpectralDetector<T>
where
    T: Float,
{
    fn prepare(&mut self, signal: &[T], sample_rate: T) -> Result<T> {
        if !(sample_rate > T::zero()) {
            return Err(PitchError::InvalidSampleRate(sample_rate.as_f64()));
        }
        self.rms = rms(signal);
        self.voiced = !signal.is_empty() && self.rms >= T::cast(self.options.min_rms);
        if !self.voiced {
            return Ok(self.rms);
        }

        let spectrum = self
            .engine
            .transform(signal, self.fft_size, self.window_function, sample_rate)?;
        self.bin_size_hz = spectrum.bin_size_hz;
        self.lobe_half_width = spectrum.lobe_half_width;
        self.magnitudes.copy_from_slice(spectrum.magnitudes);

        if self.kind == DetectorKind::MultiSeed {
            let max = self.spectrum().max_magnitude();
            if max > T::zero() {
                let scale = T::one() / max;
                self.magnitudes.iter_mut().for_each(|m| *m = *m * scale);
            }
        }
        Ok(self.rms)
    }

    fn is_silent(&self) -> bool {
        !self.voiced
    }

    fn search(&self, min_hz: T, max_hz: T) -> DetectionResult<T> {
        if !self.voiced {
            return DetectionResult::none(self.rms);
        }
        let spectrum = self.spectrum();
        let estimate: Estimate<T> = match self.kind {
            DetectorKind::Hps => hps::score(&spectrum, min_hz, max_hz, &self.options),
            DetectorKind::Shs => shs::score(&spectrum, min_hz, max_hz, &self.options),
            DetectorKind::Residual => residual::score(&spectrum, min_hz, max_hz, &self.options),
            DetectorKind::MultiSeed => multi_seed::score(&spectrum, min_hz, max_hz, &self.options),
            DetectorKind::Autocorrelation => Estimate::none(),
        };
        DetectionResult {
            hz: estimate.hz,
            confidence: estimate.confidence,
            rms: self.rms,
            debug: estimate.debug,
        }
    }
}
