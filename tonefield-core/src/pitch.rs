//! # Pitch Detection Module
//!
//! Time-domain fundamental estimation with the YIN algorithm, tuned for
//! struck tonefields.
//!
//! ## Features
//! - Cumulative mean normalized difference function (CMNDF)
//! - First-dip search that follows the dip down to its true local minimum
//! - Parabolic interpolation for sub-sample accuracy
//! - RMS gate so silent frames never reach the search
//! - Confidence from dip depth and signal level

use log::trace;
use serde::{Deserialize, Serialize};

use crate::audio::{rms, validate_samples};
use crate::config::AnalyzerConfig;
use crate::error::Result;

/// RMS level at and above which the level term of the confidence saturates.
const FULL_CONFIDENCE_RMS: f32 = 0.02;

/// A periodic signal found by the YIN estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    /// 0.0 to 1.0
    pub confidence: f32,
}

/// Runs the RMS gate and then YIN with the configured threshold and range.
///
/// # Returns
/// * `Ok(Some(estimate))` - A periodic signal inside the plausible range
/// * `Ok(None)` - Silence, no periodicity, or a pitch outside the range
/// * `Err(AnalysisError)` - Non-positive sample rate or a too-short buffer
pub fn estimate_pitch(
    signal: &[f32],
    sample_rate: f32,
    config: &AnalyzerConfig,
) -> Result<Option<PitchEstimate>> {
    validate_samples(signal, sample_rate)?;
    let level = rms(signal);
    if level < config.rms_sustain_threshold {
        trace!("[YIN] Silent frame (rms {:.5})", level);
        return Ok(None);
    }
    detect_pitch_yin(
        signal,
        sample_rate,
        config.yin_threshold,
        config.min_frequency,
        config.max_frequency,
    )
}

/// The YIN pitch detection algorithm.
///
/// 1. Squared difference `d(τ)` for lags `τ = 1..N/2` over a window of `N/2` samples
/// 2. CMNDF `d'(τ) = d(τ)·τ / Σd(1..τ)`
/// 3. First `τ` with `d'(τ) < threshold`, then onward while `d'` keeps falling
/// 4. Parabolic interpolation over `d[τ-1], d[τ], d[τ+1]`
///
/// # Arguments
/// * `signal` - Input audio signal
/// * `sample_rate` - Sample rate in Hz
/// * `threshold` - CMNDF threshold; lower is stricter
/// * `min_frequency`, `max_frequency` - Plausible fundamental range in Hz
///
/// # Returns
/// * `Ok(Some(estimate))` - Detected frequency and confidence
/// * `Ok(None)` - No sub-threshold dip, or the result is out of range
pub fn detect_pitch_yin(
    signal: &[f32],
    sample_rate: f32,
    threshold: f32,
    min_frequency: f32,
    max_frequency: f32,
) -> Result<Option<PitchEstimate>> {
    validate_samples(signal, sample_rate)?;
    let half = signal.len() / 2;
    let mut difference = vec![0.0_f32; half];

    // --- Step 1: Squared difference function ---
    for tau in 1..half {
        let mut diff = 0.0_f32;
        for i in 0..half {
            let delta = signal[i] - signal[i + tau];
            diff += delta * delta;
        }
        difference[tau] = diff;
    }

    // --- Step 2: Cumulative mean normalized difference ---
    let mut yin_buffer = vec![1.0_f32; half];
    let mut running_sum = 0.0_f32;
    for tau in 1..half {
        running_sum += difference[tau];
        if running_sum > 0.0 {
            yin_buffer[tau] = difference[tau] * tau as f32 / running_sum;
        }
    }

    // --- Step 3: First dip below threshold, followed to its minimum ---
    let Some(period) = first_dip(&yin_buffer, threshold) else {
        trace!("[YIN] No dip below threshold {}", threshold);
        return Ok(None);
    };

    // --- Step 4: Parabolic interpolation for better precision ---
    // Fitted on d(τ); the normalization skews the CMNDF dip at short lags
    let period_float = if period + 1 < half {
        let y1 = difference[period - 1];
        let y2 = difference[period];
        let y3 = difference[period + 1];
        let denominator = y1 - 2.0 * y2 + y3;
        if denominator.abs() > f32::EPSILON {
            let peak_shift = ((y1 - y3) / (2.0 * denominator)).clamp(-1.0, 1.0);
            period as f32 + peak_shift
        } else {
            period as f32
        }
    } else {
        period as f32
    };

    let frequency = sample_rate / period_float;
    if !(frequency.is_finite() && frequency >= min_frequency && frequency <= max_frequency) {
        trace!("[YIN] {:.2} Hz outside {}-{} Hz", frequency, min_frequency, max_frequency);
        return Ok(None);
    }

    let clarity = (1.0 - yin_buffer[period]).clamp(0.0, 1.0);
    let level = (rms(signal) / FULL_CONFIDENCE_RMS).min(1.0);
    Ok(Some(PitchEstimate {
        frequency_hz: frequency,
        confidence: clarity * level,
    }))
}

/// Index of the first local minimum reached after `d'` drops below `threshold`.
fn first_dip(cmndf: &[f32], threshold: f32) -> Option<usize> {
    let mut tau = 2;
    while tau < cmndf.len() {
        if cmndf[tau] < threshold {
            while tau + 1 < cmndf.len() && cmndf[tau + 1] < cmndf[tau] {
                tau += 1;
            }
            return Some(tau);
        }
        tau += 1;
    }
    None
}
