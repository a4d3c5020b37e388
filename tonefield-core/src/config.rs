//! # Analyzer Configuration
//!
//! Every tunable constant of the analysis core lives here. Defaults are also
//! exported as `DEFAULT_*` constants; the dB windows used for octave
//! disambiguation were tuned empirically against struck tonefields and should
//! be re-checked against recorded instrument audio before being changed.

use serde::{Deserialize, Serialize};

use crate::capture_processing::ProcessingOperation;
use crate::error::{AnalysisError, Result};

/// YIN threshold on the cumulative mean normalized difference.
pub const DEFAULT_YIN_THRESHOLD: f32 = 0.06;
/// RMS level that opens the signal gate.
pub const DEFAULT_RMS_ONSET_THRESHOLD: f32 = 0.005;
/// RMS level below which an open gate closes again.
pub const DEFAULT_RMS_SUSTAIN_THRESHOLD: f32 = 0.003;
/// Lowest fundamental the instrument can produce (Hz).
pub const DEFAULT_MIN_FREQUENCY: f32 = 55.0;
/// Highest fundamental the instrument can produce (Hz).
pub const DEFAULT_MAX_FREQUENCY: f32 = 4200.0;
/// Half-width of the harmonic peak search window (cents).
pub const DEFAULT_HARMONIC_WINDOW_CENTS: f32 = 80.0;
/// Spectral content below this level is treated as absent (dB).
pub const DEFAULT_NOISE_FLOOR_DB: f32 = -65.0;
/// A sub-third candidate may be this much quieter than the detection and still win (dB).
pub const DEFAULT_SUB_THIRD_WINDOW_DB: f32 = 6.0;
/// A sub-octave candidate may be this much quieter than the detection and still win (dB).
pub const DEFAULT_SUB_OCTAVE_WINDOW_DB: f32 = 6.0;
/// An octave or fifth partial within this distance of its fundamental confirms it (dB).
pub const DEFAULT_CONFIRMATION_WINDOW_DB: f32 = 24.0;
/// Lower bound of the full-spectrum rescan for orphaned detections (Hz).
pub const DEFAULT_RESCAN_MIN_FREQUENCY: f32 = 55.0;
/// Upper bound of the full-spectrum rescan for orphaned detections (Hz).
pub const DEFAULT_RESCAN_MAX_FREQUENCY: f32 = 1200.0;
/// Half-width of the narrow-band precision window (cents).
pub const DEFAULT_PRECISION_HALF_WIDTH_CENTS: f32 = 20.0;
/// Weight of the previous smoothed value in the EMA.
pub const DEFAULT_EMA_ALPHA: f32 = 0.7;
/// Consecutive stable frames required for a lock (about 0.5 s at 60 fps).
pub const DEFAULT_STABILITY_FRAME_THRESHOLD: u32 = 30;
/// Consecutive null frames tolerated before a smoothed value is cleared.
pub const DEFAULT_NULL_GRACE_FRAMES: u32 = 3;
/// Fundamental tolerance for the stability predicate (cents).
pub const DEFAULT_FUNDAMENTAL_TOLERANCE_CENTS: f32 = 2.0;
/// Octave tolerance for the stability predicate (cents).
pub const DEFAULT_OCTAVE_TOLERANCE_CENTS: f32 = 2.0;
/// Compound-fifth tolerance for the stability predicate (cents).
pub const DEFAULT_COMPOUND_FIFTH_TOLERANCE_CENTS: f32 = 5.0;
/// Lowest MIDI note considered by the template matcher.
pub const DEFAULT_TEMPLATE_MIN_MIDI: i32 = 50;
/// Highest MIDI note considered by the template matcher.
pub const DEFAULT_TEMPLATE_MAX_MIDI: i32 = 84;
/// Half-width of each template partial window (cents).
pub const DEFAULT_TEMPLATE_WINDOW_CENTS: f32 = 50.0;
/// Peak level mapped to full prominence by the template matcher (dB).
pub const DEFAULT_TEMPLATE_CEILING_DB: f32 = -20.0;
/// Minimum template score for a match to be reported.
pub const DEFAULT_TEMPLATE_MIN_SCORE: f32 = 0.3;
/// Minimum interval between emitted session updates (ms), about 20 Hz.
pub const DEFAULT_EMIT_INTERVAL_MS: u64 = 50;

/// Tunable parameters for the whole analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub yin_threshold: f32,
    pub rms_onset_threshold: f32,
    pub rms_sustain_threshold: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    pub harmonic_window_cents: f32,
    pub noise_floor_db: f32,
    pub sub_third_window_db: f32,
    pub sub_octave_window_db: f32,
    /// Require an octave or fifth partial before accepting a fundamental.
    pub forward_confirmation: bool,
    pub confirmation_window_db: f32,
    pub rescan_min_frequency: f32,
    pub rescan_max_frequency: f32,
    pub precision_half_width_cents: f32,
    pub ema_alpha: f32,
    pub stability_frame_threshold: u32,
    pub null_grace_frames: u32,
    pub fundamental_tolerance_cents: f32,
    pub octave_tolerance_cents: f32,
    pub compound_fifth_tolerance_cents: f32,
    pub template_min_midi: i32,
    pub template_max_midi: i32,
    pub template_window_cents: f32,
    pub template_ceiling_db: f32,
    pub template_min_score: f32,
    pub emit_interval_ms: u64,
    /// Samples the capture layer advances between frames. Phase refinement
    /// in target mode is off while this is `None`.
    pub hop_size: Option<usize>,
    pub capture_operation: ProcessingOperation,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            yin_threshold: DEFAULT_YIN_THRESHOLD,
            rms_onset_threshold: DEFAULT_RMS_ONSET_THRESHOLD,
            rms_sustain_threshold: DEFAULT_RMS_SUSTAIN_THRESHOLD,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            max_frequency: DEFAULT_MAX_FREQUENCY,
            harmonic_window_cents: DEFAULT_HARMONIC_WINDOW_CENTS,
            noise_floor_db: DEFAULT_NOISE_FLOOR_DB,
            sub_third_window_db: DEFAULT_SUB_THIRD_WINDOW_DB,
            sub_octave_window_db: DEFAULT_SUB_OCTAVE_WINDOW_DB,
            forward_confirmation: false,
            confirmation_window_db: DEFAULT_CONFIRMATION_WINDOW_DB,
            rescan_min_frequency: DEFAULT_RESCAN_MIN_FREQUENCY,
            rescan_max_frequency: DEFAULT_RESCAN_MAX_FREQUENCY,
            precision_half_width_cents: DEFAULT_PRECISION_HALF_WIDTH_CENTS,
            ema_alpha: DEFAULT_EMA_ALPHA,
            stability_frame_threshold: DEFAULT_STABILITY_FRAME_THRESHOLD,
            null_grace_frames: DEFAULT_NULL_GRACE_FRAMES,
            fundamental_tolerance_cents: DEFAULT_FUNDAMENTAL_TOLERANCE_CENTS,
            octave_tolerance_cents: DEFAULT_OCTAVE_TOLERANCE_CENTS,
            compound_fifth_tolerance_cents: DEFAULT_COMPOUND_FIFTH_TOLERANCE_CENTS,
            template_min_midi: DEFAULT_TEMPLATE_MIN_MIDI,
            template_max_midi: DEFAULT_TEMPLATE_MAX_MIDI,
            template_window_cents: DEFAULT_TEMPLATE_WINDOW_CENTS,
            template_ceiling_db: DEFAULT_TEMPLATE_CEILING_DB,
            template_min_score: DEFAULT_TEMPLATE_MIN_SCORE,
            emit_interval_ms: DEFAULT_EMIT_INTERVAL_MS,
            hop_size: None,
            capture_operation: ProcessingOperation::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Checks that the settings are usable together.
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is consistent
    /// * `Err(AnalysisError::InvalidConfig)` - Naming the first offending field
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(AnalysisError::InvalidConfig(msg))
        }

        if !(self.yin_threshold > 0.0 && self.yin_threshold < 1.0) {
            return invalid(format!("yin_threshold {} must be in (0, 1)", self.yin_threshold));
        }
        if self.rms_sustain_threshold < 0.0 || self.rms_sustain_threshold > self.rms_onset_threshold {
            return invalid(format!(
                "rms_sustain_threshold {} must be in [0, rms_onset_threshold {}]",
                self.rms_sustain_threshold, self.rms_onset_threshold
            ));
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency) {
            return invalid(format!(
                "frequency range {} - {} Hz is empty",
                self.min_frequency, self.max_frequency
            ));
        }
        if !(self.rescan_min_frequency > 0.0 && self.rescan_min_frequency < self.rescan_max_frequency) {
            return invalid(format!(
                "rescan range {} - {} Hz is empty",
                self.rescan_min_frequency, self.rescan_max_frequency
            ));
        }
        for (name, value) in [
            ("harmonic_window_cents", self.harmonic_window_cents),
            ("precision_half_width_cents", self.precision_half_width_cents),
            ("template_window_cents", self.template_window_cents),
            ("fundamental_tolerance_cents", self.fundamental_tolerance_cents),
            ("octave_tolerance_cents", self.octave_tolerance_cents),
            ("compound_fifth_tolerance_cents", self.compound_fifth_tolerance_cents),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return invalid(format!("{name} {value} must be positive"));
            }
        }
        for (name, value) in [
            ("sub_third_window_db", self.sub_third_window_db),
            ("sub_octave_window_db", self.sub_octave_window_db),
            ("confirmation_window_db", self.confirmation_window_db),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return invalid(format!("{name} {value} must be non-negative"));
            }
        }
        if self.template_ceiling_db <= self.noise_floor_db {
            return invalid(format!(
                "template_ceiling_db {} must be above noise_floor_db {}",
                self.template_ceiling_db, self.noise_floor_db
            ));
        }
        if !(0.0..1.0).contains(&self.ema_alpha) {
            return invalid(format!("ema_alpha {} must be in [0, 1)", self.ema_alpha));
        }
        if self.stability_frame_threshold == 0 {
            return invalid("stability_frame_threshold must be at least 1".to_string());
        }
        if self.template_min_midi > self.template_max_midi {
            return invalid(format!(
                "template MIDI range {} - {} is empty",
                self.template_min_midi, self.template_max_midi
            ));
        }
        if self.hop_size == Some(0) {
            return invalid("hop_size must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(AnalyzerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_sustain_above_onset() {
        let config = AnalyzerConfig {
            rms_sustain_threshold: 0.01,
            rms_onset_threshold: 0.005,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_alpha_of_one() {
        let config = AnalyzerConfig { ema_alpha: 1.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{ "yin_threshold": 0.1, "forward_confirmation": true }"#;
        let config: AnalyzerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.yin_threshold, 0.1);
        assert!(config.forward_confirmation);
        assert_eq!(config.stability_frame_threshold, DEFAULT_STABILITY_FRAME_THRESHOLD);
        assert_eq!(config.noise_floor_db, DEFAULT_NOISE_FLOOR_DB);
        assert_eq!(config.hop_size, None);
        assert_eq!(config.capture_operation, ProcessingOperation::Average);
    }

    #[test]
    fn capture_operation_from_json() {
        let json = r#"{ "capture_operation": "BestConfidence", "hop_size": 1024 }"#;
        let config: AnalyzerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.capture_operation, ProcessingOperation::BestConfidence);
        assert_eq!(config.hop_size, Some(1024));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_hop() {
        let config = AnalyzerConfig { hop_size: Some(0), ..Default::default() };
        assert!(config.validate().is_err());
    }
}
