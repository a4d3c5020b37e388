//! # Harmonic Analysis Module
//!
//! Frequency-domain peak search around an expected frequency, used to measure
//! the octave and compound-fifth partials and to correct octave errors of the
//! time-domain estimator.
//!
//! ## Features
//! - Cents-wide search windows mapped onto FFT bins
//! - Noise-floor rejection
//! - Parabolic sub-bin interpolation on the dB spectrum
//! - Fundamental validation over an ordered list of lower candidates
//! - Optional forward confirmation with a full-spectrum rescan fallback

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::config::AnalyzerConfig;
use crate::fft::SpectrumView;

/// A spectral peak refined to sub-bin accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    pub frequency_hz: f32,
    pub magnitude_db: f32,
    /// Integer bin holding the maximum
    pub bin: usize,
}

/// How fundamental validation arrived at its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Correction {
    /// The time-domain estimate was kept.
    Unchanged,
    /// A peak at a third of the estimate was preferred.
    SubThird,
    /// A peak at half the estimate was preferred.
    SubOctave,
    /// The candidate had no confirming partials; a rescan found another fundamental.
    Rescanned,
}

/// Outcome of fundamental validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedFundamental {
    pub peak: SpectralPeak,
    pub correction: Correction,
}

/// A lower candidate that may replace the time-domain estimate.
#[derive(Debug, Clone, Copy)]
struct RedirectCandidate {
    correction: Correction,
    divisor: f32,
    /// How much quieter than the estimate's own peak the candidate may be
    window_db: f32,
}

/// Lower candidates in the order they are tried. The sub-third comes first so
/// a genuine lower fundamental is not masked by a louder sub-octave note.
fn redirect_candidates(config: &AnalyzerConfig) -> [RedirectCandidate; 2] {
    [
        RedirectCandidate {
            correction: Correction::SubThird,
            divisor: 3.0,
            window_db: config.sub_third_window_db,
        },
        RedirectCandidate {
            correction: Correction::SubOctave,
            divisor: 2.0,
            window_db: config.sub_octave_window_db,
        },
    ]
}

/// Lower and upper frequency of a symmetric cents window around `center_hz`.
pub fn cents_window(center_hz: f32, half_width_cents: f32) -> (f32, f32) {
    let ratio = 2.0_f32.powf(half_width_cents / 1200.0);
    (center_hz / ratio, center_hz * ratio)
}

/// Vertex offset of a parabola through three equally spaced points, clamped to ±0.5.
pub fn parabolic_peak_offset(left: f32, center: f32, right: f32) -> f32 {
    let denominator = left - 2.0 * center + right;
    if denominator >= 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
}

/// Finds the loudest bin between two frequencies and refines it.
///
/// A maximum sitting on the edge of the band whose outer neighbor is louder is
/// the skirt of a peak outside the band and does not count.
///
/// # Returns
/// * `Some(peak)` - Interpolated peak at or above `noise_floor_db`
/// * `None` - Empty band, band outside the spectrum, or nothing above the floor
pub fn find_peak_in_band(
    spectrum: &SpectrumView<'_>,
    low_hz: f32,
    high_hz: f32,
    noise_floor_db: f32,
) -> Option<SpectralPeak> {
    let bins = spectrum.bins();
    if bins.len() < 3 || !(low_hz.is_finite() && high_hz.is_finite()) || low_hz > high_hz {
        return None;
    }
    let start_bin = (spectrum.frequency_to_bin(low_hz).floor().max(1.0)) as usize;
    let end_bin = (spectrum.frequency_to_bin(high_hz).ceil() as usize).min(bins.len() - 2);
    if start_bin > end_bin {
        return None;
    }

    let (offset, &peak_db) = bins[start_bin..=end_bin]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let peak_bin = start_bin + offset;

    if peak_db < noise_floor_db {
        return None;
    }
    if (peak_bin == start_bin && bins[peak_bin - 1] > peak_db)
        || (peak_bin == end_bin && bins[peak_bin + 1] > peak_db)
    {
        return None;
    }

    let shift = parabolic_peak_offset(bins[peak_bin - 1], peak_db, bins[peak_bin + 1]);
    Some(SpectralPeak {
        frequency_hz: spectrum.bin_to_frequency(peak_bin as f32 + shift),
        magnitude_db: peak_db,
        bin: peak_bin,
    })
}

/// Finds a peak within `window_cents` of `target_hz`.
///
/// # Arguments
/// * `spectrum` - dB spectrum to search
/// * `target_hz` - Expected frequency
/// * `window_cents` - Half-width of the search window
/// * `noise_floor_db` - Peaks below this level are ignored
pub fn find_peak_near(
    spectrum: &SpectrumView<'_>,
    target_hz: f32,
    window_cents: f32,
    noise_floor_db: f32,
) -> Option<SpectralPeak> {
    if !(target_hz.is_finite() && target_hz > 0.0) || target_hz >= spectrum.nyquist() {
        return None;
    }
    let (low_hz, high_hz) = cents_window(target_hz, window_cents);
    find_peak_in_band(spectrum, low_hz, high_hz, noise_floor_db)
}

/// Measures a partial near its expected frequency with the configured window and floor.
pub fn find_partial(
    spectrum: &SpectrumView<'_>,
    expected_hz: f32,
    config: &AnalyzerConfig,
) -> Option<SpectralPeak> {
    find_peak_near(
        spectrum,
        expected_hz,
        config.harmonic_window_cents,
        config.noise_floor_db,
    )
}

/// Corrects octave errors of a time-domain estimate against the spectrum.
///
/// The sub-third and then the sub-octave of `detected_hz` are tried; the first
/// one whose peak is comparable to or louder than the estimate's own peak wins.
/// The winner is searched again so every path gets the same sub-bin
/// refinement. With `forward_confirmation` enabled, a fundamental without an
/// octave or fifth partial is discarded and the spectrum is rescanned.
///
/// # Returns
/// * `Some(validated)` - The fundamental's peak and the correction applied
/// * `None` - No peak at the estimate or any candidate, or nothing survives confirmation
pub fn validate_fundamental(
    spectrum: &SpectrumView<'_>,
    detected_hz: f32,
    config: &AnalyzerConfig,
) -> Option<ValidatedFundamental> {
    let detected_peak = find_partial(spectrum, detected_hz, config);
    let reference_db = detected_peak.map_or(config.noise_floor_db, |peak| peak.magnitude_db);

    let (center_hz, correction) = redirect_candidates(config)
        .into_iter()
        .filter(|candidate| detected_hz / candidate.divisor >= config.min_frequency)
        .find_map(|candidate| {
            let candidate_hz = detected_hz / candidate.divisor;
            let peak = find_partial(spectrum, candidate_hz, config)?;
            (peak.magnitude_db >= reference_db - candidate.window_db)
                .then_some((candidate_hz, candidate.correction))
        })
        .unwrap_or((detected_hz, Correction::Unchanged));

    if correction != Correction::Unchanged {
        debug!(
            "[HARMONIC] {:?} redirect: {:.2} Hz -> {:.2} Hz",
            correction, detected_hz, center_hz
        );
    }

    let Some(peak) = find_partial(spectrum, center_hz, config) else {
        trace!("[HARMONIC] No spectral peak near {:.2} Hz", center_hz);
        return None;
    };

    if !config.forward_confirmation || is_confirmed(spectrum, &peak, config) {
        return Some(ValidatedFundamental { peak, correction });
    }

    debug!(
        "[HARMONIC] Orphaned detection at {:.2} Hz, rescanning {}-{} Hz",
        peak.frequency_hz, config.rescan_min_frequency, config.rescan_max_frequency
    );
    let rescanned = rescan_fundamental(spectrum, config)?;
    debug!("[HARMONIC] Rescan found {:.2} Hz", rescanned.frequency_hz);
    Some(ValidatedFundamental {
        peak: rescanned,
        correction: Correction::Rescanned,
    })
}

/// Whether a candidate fundamental has its octave or compound fifth within
/// `confirmation_window_db` of its own level.
pub fn is_confirmed(spectrum: &SpectrumView<'_>, fundamental: &SpectralPeak, config: &AnalyzerConfig) -> bool {
    [2.0_f32, 3.0].iter().any(|&multiple| {
        find_partial(spectrum, fundamental.frequency_hz * multiple, config).is_some_and(|partial| {
            partial.magnitude_db >= fundamental.magnitude_db - config.confirmation_window_db
        })
    })
}

/// Scans the rescan range for the loudest local maximum whose octave partial is
/// independently present.
pub fn rescan_fundamental(spectrum: &SpectrumView<'_>, config: &AnalyzerConfig) -> Option<SpectralPeak> {
    let bins = spectrum.bins();
    if bins.len() < 3 {
        return None;
    }
    let start_bin = (spectrum.frequency_to_bin(config.rescan_min_frequency).ceil() as usize).max(1);
    let end_bin = (spectrum.frequency_to_bin(config.rescan_max_frequency).floor() as usize).min(bins.len() - 2);
    if start_bin > end_bin {
        return None;
    }

    let mut maxima: Vec<usize> = (start_bin..=end_bin)
        .filter(|&bin| {
            bins[bin] >= config.noise_floor_db && bins[bin] > bins[bin - 1] && bins[bin] >= bins[bin + 1]
        })
        .collect();
    maxima.sort_by(|&a, &b| bins[b].total_cmp(&bins[a]));

    maxima.into_iter().find_map(|bin| {
        let shift = parabolic_peak_offset(bins[bin - 1], bins[bin], bins[bin + 1]);
        let candidate = SpectralPeak {
            frequency_hz: spectrum.bin_to_frequency(bin as f32 + shift),
            magnitude_db: bins[bin],
            bin,
        };
        let octave = find_partial(spectrum, candidate.frequency_hz * 2.0, config)?;
        (octave.magnitude_db >= candidate.magnitude_db - config.confirmation_window_db).then_some(candidate)
    })
}
