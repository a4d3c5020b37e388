//! # Spectral Template Matching Module
//!
//! Identifies which note is sounding without a prior target by scoring the
//! whole spectrum against every candidate note's expected partials. Because
//! every partial contributes, a note is still recognised when its octave or
//! compound fifth is louder than its fundamental, which is common on
//! inharmonic metal tonefields.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::AnalyzerConfig;
use crate::fft::SpectrumView;
use crate::harmonic::find_peak_near;
use crate::tuning::{cents_deviation, midi_to_frequency};

/// Partial multiples and their weights in the template score.
const TEMPLATE_PARTIALS: [(u32, f32); 4] = [(1, 1.0), (2, 0.8), (3, 0.6), (4, 0.3)];

/// A candidate note and how well the spectrum fits its template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub midi_number: i32,
    pub nominal_frequency_hz: f32,
    /// 0.0 to 1.0
    pub score: f32,
}

/// Scores one candidate note against the spectrum.
///
/// Each partial found within `template_window_cents` of its nominal frequency
/// contributes `weight × prominence × accuracy`, where prominence maps the peak
/// level from the noise floor to `template_ceiling_db` onto [0, 1] and accuracy
/// falls linearly from 1 at the nominal frequency to 0 at the window edge.
/// The sum is divided by the weights of the partials below Nyquist.
///
/// # Returns
/// * `Some(score)` - Score in [0, 1]
/// * `None` - Not even the fundamental lies below Nyquist
pub fn score_note(spectrum: &SpectrumView<'_>, midi: i32, config: &AnalyzerConfig) -> Option<f32> {
    let nominal = midi_to_frequency(midi);

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (multiple, weight) in TEMPLATE_PARTIALS {
        let expected = nominal * multiple as f32;
        if expected >= spectrum.nyquist() {
            continue;
        }
        weight_total += weight;

        let Some(peak) = find_peak_near(spectrum, expected, config.template_window_cents, config.noise_floor_db)
        else {
            continue;
        };
        let error = cents_deviation(peak.frequency_hz, expected).abs();
        let accuracy = (1.0 - error / config.template_window_cents).max(0.0);
        weighted_sum += weight * prominence(peak.magnitude_db, config) * accuracy;
    }

    (weight_total > 0.0).then(|| weighted_sum / weight_total)
}

/// Peak level mapped from the noise floor (0) to `template_ceiling_db` (1).
pub fn prominence(magnitude_db: f32, config: &AnalyzerConfig) -> f32 {
    let range = config.template_ceiling_db - config.noise_floor_db;
    ((magnitude_db - config.noise_floor_db) / range).clamp(0.0, 1.0)
}

/// Scores every note in the configured MIDI range, best first.
pub fn rank_notes(spectrum: &SpectrumView<'_>, config: &AnalyzerConfig) -> Vec<TemplateMatch> {
    let mut matches: Vec<TemplateMatch> = (config.template_min_midi..=config.template_max_midi)
        .filter_map(|midi| {
            score_note(spectrum, midi, config).map(|score| TemplateMatch {
                midi_number: midi,
                nominal_frequency_hz: midi_to_frequency(midi),
                score,
            })
        })
        .collect();
    // Stable sort keeps the lower note first on equal scores
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches
}

/// Identifies the sounding note.
///
/// # Returns
/// * `Some(best)` - Highest-scoring note, if its score exceeds `template_min_score`
/// * `None` - No candidate scores high enough
pub fn match_note(spectrum: &SpectrumView<'_>, config: &AnalyzerConfig) -> Option<TemplateMatch> {
    let best = rank_notes(spectrum, config).into_iter().next()?;
    if best.score > config.template_min_score {
        trace!("[TEMPLATE] Best match MIDI {} (score {:.3})", best.midi_number, best.score);
        Some(best)
    } else {
        trace!("[TEMPLATE] Best score {:.3} below {}", best.score, config.template_min_score);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::compute_spectrum;
    use crate::test_signals::{noise, partials};

    const SAMPLE_RATE: f32 = 44100.0;
    const FFT_SIZE: usize = 16384;

    fn spectrum_of(components: &[(f32, f32)]) -> crate::fft::Spectrum {
        let signal = partials(components, SAMPLE_RATE, FFT_SIZE);
        compute_spectrum(&signal, SAMPLE_RATE, FFT_SIZE).unwrap()
    }

    #[test]
    fn identifies_note_from_its_partials() {
        let config = AnalyzerConfig::default();
        for midi in [52, 57, 60, 64, 71] {
            let f0 = midi_to_frequency(midi);
            let spectrum = spectrum_of(&[(f0, 0.3), (2.0 * f0, 0.2), (3.0 * f0, 0.1)]);
            let found = match_note(&spectrum.view(), &config).unwrap();
            assert!((found.midi_number - midi).abs() <= 1, "MIDI {midi} matched as {}", found.midi_number);
            assert!((0.0..=1.0).contains(&found.score));
        }
    }

    #[test]
    fn loud_upper_partials_do_not_fool_the_matcher() {
        let config = AnalyzerConfig::default();
        let f0 = midi_to_frequency(62);
        // Octave and compound fifth both louder than the fundamental
        let spectrum = spectrum_of(&[(f0, 0.1), (2.0 * f0, 0.4), (3.0 * f0, 0.3)]);
        let found = match_note(&spectrum.view(), &config).unwrap();
        assert_eq!(found.midi_number, 62);
        assert!(found.score > 0.5 && found.score <= 1.0, "score {}", found.score);
    }

    #[test]
    fn slightly_detuned_note_scores_lower_than_in_tune() {
        let config = AnalyzerConfig::default();
        let f0 = midi_to_frequency(60);
        let in_tune = spectrum_of(&[(f0, 0.3), (2.0 * f0, 0.2), (3.0 * f0, 0.1)]);
        let off = f0 * 2.0_f32.powf(25.0 / 1200.0);
        let detuned = spectrum_of(&[(off, 0.3), (2.0 * off, 0.2), (3.0 * off, 0.1)]);

        let in_tune_score = score_note(&in_tune.view(), 60, &config).unwrap();
        let detuned_score = score_note(&detuned.view(), 60, &config).unwrap();
        assert!(detuned_score < in_tune_score);
    }

    #[test]
    fn prominence_spans_floor_to_ceiling() {
        let config = AnalyzerConfig::default();
        assert_eq!(prominence(-90.0, &config), 0.0);
        assert_eq!(prominence(-10.0, &config), 1.0);
        assert!((prominence(-42.5, &config) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn spectrum_below_floor_has_no_match() {
        let config = AnalyzerConfig::default();
        let bins = vec![-80.0; FFT_SIZE / 2];
        let view = SpectrumView::new(&bins, SAMPLE_RATE, FFT_SIZE).unwrap();
        assert_eq!(match_note(&view, &config), None);
        assert!(rank_notes(&view, &config).iter().all(|m| m.score == 0.0));
    }

    #[test]
    fn faint_noise_has_no_match() {
        let config = AnalyzerConfig::default();
        let signal = noise(FFT_SIZE, 0.01, 3);
        let spectrum = compute_spectrum(&signal, SAMPLE_RATE, FFT_SIZE).unwrap();
        assert_eq!(match_note(&spectrum.view(), &config), None);
    }

    #[test]
    fn partials_above_nyquist_are_not_counted() {
        let config = AnalyzerConfig::default();
        // At 8 kHz the 4th partial of MIDI 84 (4186 Hz) is above Nyquist;
        // its partials 1 to 3 (1046.5, 2093, 3139.5 Hz) are below it.
        let sample_rate = 8000.0;
        let f0 = midi_to_frequency(72);
        let signal = partials(&[(f0, 0.3), (2.0 * f0, 0.3), (3.0 * f0, 0.3)], sample_rate, 8192);
        let spectrum = compute_spectrum(&signal, sample_rate, 8192).unwrap();
        let view = spectrum.view();

        // Only the fundamental of MIDI 84 (the octave of MIDI 72) is in the signal
        let nominal = midi_to_frequency(84);
        let found = find_peak_near(&view, nominal, config.template_window_cents, config.noise_floor_db).unwrap();
        let accuracy = 1.0 - cents_deviation(found.frequency_hz, nominal).abs() / config.template_window_cents;
        let contribution = prominence(found.magnitude_db, &config) * accuracy;
        assert!(find_peak_near(&view, 2.0 * nominal, config.template_window_cents, config.noise_floor_db).is_none());
        assert!(find_peak_near(&view, 3.0 * nominal, config.template_window_cents, config.noise_floor_db).is_none());

        let score = score_note(&view, 84, &config).unwrap();
        assert!((score - contribution / 2.4).abs() < 1e-5, "score {score}");
        assert!((score - contribution / 2.7).abs() > 1e-2);
    }
}
