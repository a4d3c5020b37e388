//! # Audio Frame Module
//!
//! The contract between the capture layer and the analysis core. Audio
//! hardware is not touched here: the capture layer hands over one
//! fixed-length block of samples per frame, optionally with a precomputed
//! log-magnitude spectrum, and this module checks that it is well formed.
//!
//! ## Features
//! - Frame validation (power-of-two length, positive sample rate)
//! - Optional externally computed dB spectrum
//! - RMS level measurement
//! - Hysteretic signal gate for onset/sustain detection

use crate::error::{AnalysisError, Result};
use crate::fft::SpectrumView;

/// Smallest frame the analysis core accepts.
pub const MIN_FRAME_SIZE: usize = 64;

/// One block of time-domain audio handed over by the capture layer.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    samples: &'a [f32],
    sample_rate: f32,
    spectrum: Option<SpectrumView<'a>>,
}

impl<'a> AudioFrame<'a> {
    /// Wraps a sample block after validating it.
    ///
    /// # Arguments
    /// * `samples` - Mono samples in [-1, 1]; length must be a power of two
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `Err(AnalysisError)` - Non-positive sample rate, or a length that is
    ///   not a power of two or shorter than `MIN_FRAME_SIZE`
    pub fn new(samples: &'a [f32], sample_rate: f32) -> Result<Self> {
        validate_samples(samples, sample_rate)?;
        if !samples.len().is_power_of_two() {
            return Err(AnalysisError::NotPowerOfTwo(samples.len()));
        }
        Ok(Self {
            samples,
            sample_rate,
            spectrum: None,
        })
    }

    /// Attaches a precomputed dB spectrum (one value per bin up to Nyquist).
    ///
    /// The spectrum may come from the same buffer or a larger, zero-padded
    /// one, so `fft_size` must be at least the frame length.
    pub fn with_spectrum(mut self, spectrum_db: &'a [f32], fft_size: usize) -> Result<Self> {
        if fft_size < self.samples.len() {
            return Err(AnalysisError::LengthMismatch {
                expected: self.samples.len(),
                actual: fft_size,
            });
        }
        self.spectrum = Some(SpectrumView::new(spectrum_db, self.sample_rate, fft_size)?);
        Ok(self)
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// The externally supplied spectrum, if any.
    pub fn spectrum(&self) -> Option<SpectrumView<'a>> {
        self.spectrum
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// RMS level of the frame.
    pub fn rms(&self) -> f32 {
        rms(self.samples)
    }
}

/// Checks the sample rate and minimum length shared by all time-domain entry points.
pub(crate) fn validate_samples(samples: &[f32], sample_rate: f32) -> Result<()> {
    validate_sample_rate(sample_rate)?;
    if samples.len() < MIN_FRAME_SIZE {
        return Err(AnalysisError::BufferTooShort {
            len: samples.len(),
            min: MIN_FRAME_SIZE,
        });
    }
    Ok(())
}

pub(crate) fn validate_sample_rate(sample_rate: f32) -> Result<()> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::InvalidSampleRate(sample_rate))
    }
}

/// Root-mean-square level of a buffer; 0.0 for an empty one.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Level gate with separate opening and closing thresholds.
///
/// A struck note decays, so the gate opens at the onset level but stays
/// open until the level falls below the lower sustain level.
#[derive(Debug, Clone)]
pub struct SignalGate {
    onset_threshold: f32,
    sustain_threshold: f32,
    open: bool,
}

impl SignalGate {
    pub fn new(onset_threshold: f32, sustain_threshold: f32) -> Self {
        Self {
            onset_threshold,
            sustain_threshold,
            open: false,
        }
    }

    /// Feeds one frame's RMS level and returns whether the gate is open.
    pub fn update(&mut self, level: f32) -> bool {
        let threshold = if self.open {
            self.sustain_threshold
        } else {
            self.onset_threshold
        };
        self.open = level >= threshold;
        self.open
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn reset(&mut self) {
        self.open = false;
    }
}
