//! # Fast Fourier Transform (FFT) Module
//!
//! This module provides the frequency-domain front end of the analysis core.
//! It handles windowing, forward transforms of arbitrary power-of-two size,
//! and conversion to log-magnitude (dB) and phase spectra.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Zero padding for high-resolution harmonic search
//! - Borrowed `SpectrumView` shared by all spectral searches

use rustfft::{FftPlanner, num_complex::Complex};

use crate::audio::validate_sample_rate;
use crate::error::{AnalysisError, Result};

/// Floor applied to dB values so silent bins stay finite.
pub const MIN_DB: f32 = -160.0;

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset can cause issues in frequency analysis by introducing
/// a large component at 0 Hz.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
///
/// # Arguments
/// * `buffer` - Audio buffer to window (modified in-place)
pub fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Performs a forward FFT on a signal, zero-padded to `fft_size`.
///
/// The signal goes through:
/// 1. DC offset removal
/// 2. Hann windowing (over the signal length, not the padded length)
/// 3. Zero padding and forward FFT
///
/// # Returns
/// * `Ok(spectrum)` - Complex spectrum with `fft_size` bins
/// * `Err(AnalysisError)` - `fft_size` not a power of two or shorter than the signal
pub fn perform_fft(signal: &[f32], fft_size: usize) -> Result<Vec<Complex<f32>>> {
    if !fft_size.is_power_of_two() {
        return Err(AnalysisError::NotPowerOfTwo(fft_size));
    }
    if signal.len() > fft_size {
        return Err(AnalysisError::LengthMismatch {
            expected: fft_size,
            actual: signal.len(),
        });
    }

    let mut processed_signal = signal.to_vec();
    remove_dc_offset(&mut processed_signal);
    apply_hann_window(&mut processed_signal);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    let mut buffer: Vec<Complex<f32>> = processed_signal
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();
    buffer.resize(fft_size, Complex { re: 0.0, im: 0.0 });

    fft.process(&mut buffer);
    Ok(buffer)
}

/// Owned magnitude and phase spectrum of one frame, up to Nyquist.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Log magnitude per bin, `20·log10(|X| / signal_len)`
    pub magnitudes_db: Vec<f32>,
    /// Phase per bin in radians
    pub phases: Vec<f32>,
    pub fft_size: usize,
    pub sample_rate: f32,
}

impl Spectrum {
    /// Borrows the dB values as a searchable view.
    pub fn view(&self) -> SpectrumView<'_> {
        SpectrumView {
            bins: &self.magnitudes_db,
            sample_rate: self.sample_rate,
            fft_size: self.fft_size,
        }
    }
}

/// Computes the dB magnitude and phase spectrum of a signal.
///
/// Magnitudes are normalized by the signal length (not the padded length), so
/// a full-scale sine centered on a bin reads about -12 dB whatever the padding.
///
/// # Arguments
/// * `signal` - Time-domain samples
/// * `sample_rate` - Sample rate in Hz
/// * `fft_size` - Transform size; a power of two no shorter than the signal
pub fn compute_spectrum(signal: &[f32], sample_rate: f32, fft_size: usize) -> Result<Spectrum> {
    validate_sample_rate(sample_rate)?;
    if signal.is_empty() {
        return Err(AnalysisError::BufferTooShort { len: 0, min: 1 });
    }
    let complex = perform_fft(signal, fft_size)?;
    let scale = 1.0 / signal.len() as f32;
    let half = &complex[..fft_size / 2];

    Ok(Spectrum {
        magnitudes_db: half.iter().map(|c| magnitude_to_db(c.norm() * scale)).collect(),
        phases: half.iter().map(|c| c.arg()).collect(),
        fft_size,
        sample_rate,
    })
}

/// Converts a linear magnitude to dB, floored at `MIN_DB`.
pub fn magnitude_to_db(magnitude: f32) -> f32 {
    if magnitude > 0.0 {
        (20.0 * magnitude.log10()).max(MIN_DB)
    } else {
        MIN_DB
    }
}

/// A borrowed dB spectrum together with the geometry needed to map bins to Hz.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumView<'a> {
    bins: &'a [f32],
    sample_rate: f32,
    fft_size: usize,
}

impl<'a> SpectrumView<'a> {
    /// Validates and wraps an externally computed dB spectrum.
    ///
    /// # Returns
    /// * `Err(AnalysisError)` - Non-positive sample rate, `fft_size` not a
    ///   power of two, or `bins.len() != fft_size / 2`
    pub fn new(bins: &'a [f32], sample_rate: f32, fft_size: usize) -> Result<Self> {
        validate_sample_rate(sample_rate)?;
        if !fft_size.is_power_of_two() || fft_size < 2 {
            return Err(AnalysisError::NotPowerOfTwo(fft_size));
        }
        if bins.len() != fft_size / 2 {
            return Err(AnalysisError::LengthMismatch {
                expected: fft_size / 2,
                actual: bins.len(),
            });
        }
        Ok(Self {
            bins,
            sample_rate,
            fft_size,
        })
    }

    pub fn bins(&self) -> &'a [f32] {
        self.bins
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Width of one bin in Hz.
    pub fn bin_width(&self) -> f32 {
        self.sample_rate / self.fft_size as f32
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }

    /// Frequency at a (possibly fractional) bin position.
    pub fn bin_to_frequency(&self, bin: f32) -> f32 {
        bin * self.bin_width()
    }

    /// Fractional bin position of a frequency.
    pub fn frequency_to_bin(&self, freq: f32) -> f32 {
        freq / self.bin_width()
    }
}
