//! # Precision Detection Module
//!
//! Narrow-band peak search for when the target note is already known. Only the
//! bins between explicit lower and upper bounds are considered, and the
//! parabolic estimate can be refined further from the phase advance of the
//! peak bin between two consecutive frames (phase-vocoder frequency
//! reassignment).
//!
//! The refinement is a pure function of the current frame, the previous
//! frame's phase spectrum and the hop between them. The caller keeps the
//! returned `PreviousPhase` and hands it back on the next frame.

use log::trace;
use std::f32::consts::PI;

use crate::audio::validate_samples;
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Result};
use crate::fft::compute_spectrum;
use crate::harmonic::{SpectralPeak, cents_window, find_peak_in_band};

/// Phase spectrum of the last frame that produced a detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousPhase {
    pub phases: Vec<f32>,
    pub fft_size: usize,
    pub sample_rate: f32,
}

/// Result of a narrow-band detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionReading {
    /// Refined frequency and level of the peak; `None` when nothing rose above the floor
    pub peak: Option<SpectralPeak>,
    /// Whether the frequency came from phase refinement rather than interpolation alone
    pub phase_refined: bool,
    /// Phase history for the next frame; `None` whenever `peak` is `None`
    pub phase: Option<PreviousPhase>,
}

/// Lower and upper search bounds for a target frequency ± a cents half-width.
pub fn precision_bounds(target_hz: f32, half_width_cents: f32) -> (f32, f32) {
    cents_window(target_hz, half_width_cents)
}

/// Finds the peak between two frequencies in a windowed, full-size FFT of `samples`.
///
/// # Arguments
/// * `samples` - Time-domain frame; its length is the FFT size
/// * `sample_rate` - Sample rate in Hz
/// * `low_hz`, `high_hz` - Search bounds
/// * `noise_floor_db` - Peaks below this level are ignored
///
/// # Returns
/// * `Err(AnalysisError)` - Non-positive sample rate or a length that is not a power of two
pub fn detect_in_band(
    samples: &[f32],
    sample_rate: f32,
    low_hz: f32,
    high_hz: f32,
    noise_floor_db: f32,
) -> Result<Option<SpectralPeak>> {
    let reading = detect_in_band_with_phase(samples, sample_rate, low_hz, high_hz, noise_floor_db, None, 0)?;
    Ok(reading.peak)
}

/// Narrow-band detection with optional phase-difference refinement.
///
/// A peak whose refined frequency falls outside `low_hz..=high_hz` is
/// reported as no peak.
///
/// Without a usable `previous` phase (first frame, previous frame silent, or a
/// different FFT geometry) the parabolic estimate is returned unchanged.
///
/// # Arguments
/// * `previous` - Phase spectrum returned by the previous call
/// * `hop` - Samples elapsed between the start of the previous frame and this one;
///   must be non-zero when `previous` is given
pub fn detect_in_band_with_phase(
    samples: &[f32],
    sample_rate: f32,
    low_hz: f32,
    high_hz: f32,
    noise_floor_db: f32,
    previous: Option<&PreviousPhase>,
    hop: usize,
) -> Result<PrecisionReading> {
    validate_samples(samples, sample_rate)?;
    let fft_size = samples.len();
    if !fft_size.is_power_of_two() {
        return Err(AnalysisError::NotPowerOfTwo(fft_size));
    }
    if previous.is_some() && hop == 0 {
        return Err(AnalysisError::InvalidHop(hop));
    }

    let spectrum = compute_spectrum(samples, sample_rate, fft_size)?;
    let Some(mut peak) = find_peak_in_band(&spectrum.view(), low_hz, high_hz, noise_floor_db) else {
        trace!("[PRECISION] Nothing above {} dB in {:.2}-{:.2} Hz", noise_floor_db, low_hz, high_hz);
        return Ok(PrecisionReading {
            peak: None,
            phase_refined: false,
            phase: None,
        });
    };

    let refined = previous
        .filter(|prev| prev.fft_size == fft_size && prev.sample_rate == sample_rate)
        .and_then(|prev| {
            refine_with_phase(
                peak.frequency_hz,
                spectrum.phases[peak.bin],
                prev.phases[peak.bin],
                hop,
                sample_rate,
                fft_size,
            )
        });
    if let Some(frequency) = refined {
        trace!(
            "[PRECISION] Phase refinement {:.4} Hz -> {:.4} Hz",
            peak.frequency_hz, frequency
        );
        peak.frequency_hz = frequency;
    }

    // The bin range is rounded out to whole bins; the bounds themselves are hard
    if !(low_hz..=high_hz).contains(&peak.frequency_hz) {
        trace!(
            "[PRECISION] Peak at {:.2} Hz outside {:.2}-{:.2} Hz",
            peak.frequency_hz, low_hz, high_hz
        );
        return Ok(PrecisionReading {
            peak: None,
            phase_refined: false,
            phase: None,
        });
    }

    Ok(PrecisionReading {
        peak: Some(peak),
        phase_refined: refined.is_some(),
        phase: Some(PreviousPhase {
            phases: spectrum.phases,
            fft_size,
            sample_rate,
        }),
    })
}

/// Convenience wrapper searching ± `precision_half_width_cents` around a target.
pub fn detect_near_target(
    samples: &[f32],
    sample_rate: f32,
    target_hz: f32,
    config: &AnalyzerConfig,
    previous: Option<&PreviousPhase>,
    hop: usize,
) -> Result<PrecisionReading> {
    let (low_hz, high_hz) = precision_bounds(target_hz, config.precision_half_width_cents);
    detect_in_band_with_phase(
        samples,
        sample_rate,
        low_hz,
        high_hz,
        config.noise_floor_db,
        previous,
        hop,
    )
}

/// Frequency from the phase advance of one bin between two frames.
///
/// The parabolic estimate predicts the advance; the wrapped residual is the
/// correction. Using the estimate as the reference keeps the result
/// unambiguous for any hop, as long as the estimate is within
/// `sample_rate / (2·hop)` of the true frequency.
///
/// Returns `None` when the correction exceeds half a bin, which means the
/// estimate was not good enough to unwrap the phase.
pub fn refine_with_phase(
    estimate_hz: f32,
    current_phase: f32,
    previous_phase: f32,
    hop: usize,
    sample_rate: f32,
    fft_size: usize,
) -> Option<f32> {
    if hop == 0 {
        return None;
    }
    let hop = hop as f64;
    let sample_rate = sample_rate as f64;
    let expected_advance = 2.0 * std::f64::consts::PI * estimate_hz as f64 * hop / sample_rate;
    let residual = wrap_phase((current_phase as f64 - previous_phase as f64 - expected_advance) as f32);
    let correction_hz = residual as f64 * sample_rate / (2.0 * std::f64::consts::PI * hop);

    let bin_width = sample_rate / fft_size as f64;
    if correction_hz.abs() > 0.5 * bin_width {
        return None;
    }
    let frequency = (estimate_hz as f64 + correction_hz) as f32;
    (frequency.is_finite() && frequency > 0.0).then_some(frequency)
}

/// Wraps a phase to (-π, π].
pub fn wrap_phase(phase: f32) -> f32 {
    let wrapped = (phase + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}
