//! End-to-End Measurement Pipeline Tests
//!
//! Tests the public API from raw samples to a locked measurement:
//! - Target-mode session on an inharmonic (stiff) tonefield
//! - Blind-mode identification and decay of a struck note
//! - Configuration loaded from JSON
//! - Malformed input rejection

use std::f64::consts::PI;
use std::time::Duration;

use approx::assert_relative_eq;
use tonefield_core::{
    AnalysisError, AnalyzerConfig, AudioFrame, MeasurementSession, PartialKind,
    capture_processing::ProcessingOperation,
    pitch::estimate_pitch,
    stability::StabilityTransition,
    tuning::{midi_from_note_name, midi_to_frequency},
};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const SAMPLE_RATE: f32 = 44100.0;

/// Partials of a stiff vibrator, `f_n = n·f0·√(1 + B·n²)`, with falling amplitudes.
fn stiff_partials(f0: f32, b: f32) -> Vec<(f64, f64)> {
    [(1, 0.3), (2, 0.2), (3, 0.1)]
        .iter()
        .map(|&(n, amp)| {
            let n = n as f64;
            (n * f0 as f64 * (1.0 + b as f64 * n * n).sqrt(), amp)
        })
        .collect()
}

/// One frame of the given partials starting at sample `offset`, scaled by `gain`.
fn frame_samples(partials: &[(f64, f64)], offset: usize, len: usize, gain: f64) -> Vec<f32> {
    (offset..offset + len)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let value: f64 = partials
                .iter()
                .map(|&(freq, amp)| amp * (2.0 * PI * (freq * t).fract()).sin())
                .sum();
            (gain * value) as f32
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TARGET MODE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn target_session_measures_inharmonicity() -> anyhow::Result<()> {
    const FRAME: usize = 32768;
    const HOP: usize = 4096;
    const B: f32 = 2.0e-4;

    let midi = midi_from_note_name("C4").ok_or_else(|| anyhow::anyhow!("unknown note"))?;
    let config = AnalyzerConfig {
        stability_frame_threshold: 5,
        hop_size: Some(HOP),
        ..Default::default()
    };
    let mut session = MeasurementSession::new(config, Some(midi))?;
    let partials = stiff_partials(midi_to_frequency(midi), B);

    let mut locked = None;
    for k in 0..8 {
        let samples = frame_samples(&partials, k * HOP, FRAME, 1.0);
        let frame = AudioFrame::new(&samples, SAMPLE_RATE)?;
        let update = session.process_frame(&frame, Duration::from_millis(k as u64 * 93))?;
        if update.transition() == Some(StabilityTransition::Locked) {
            locked = update.measurement;
        }
    }

    let measurement = locked.ok_or_else(|| anyhow::anyhow!("session never locked"))?;
    assert_eq!(measurement.midi, 60);
    assert_eq!(measurement.partials.len(), 3);

    // Stretched partials are sharp of their ideal ratios, the fifth most of all
    let octave_ratio = measurement.ratio_deviation_cents(2).unwrap_or_default();
    let fifth_ratio = measurement.ratio_deviation_cents(3).unwrap_or_default();
    assert!(octave_ratio > 0.2 && fifth_ratio > octave_ratio, "{octave_ratio} / {fifth_ratio}");

    let b = measurement.calculated_b.ok_or_else(|| anyhow::anyhow!("no B value"))?;
    assert!(b > 0.5e-4 && b < 4.0e-4, "B = {b}");
    Ok(())
}

#[test]
fn best_confidence_capture_from_json_config() -> anyhow::Result<()> {
    const FRAME: usize = 8192;
    let json = r#"{
        "stability_frame_threshold": 3,
        "capture_operation": "BestConfidence",
        "compound_fifth_tolerance_cents": 6.0
    }"#;
    let config: AnalyzerConfig = serde_json::from_str(json)?;
    let mut session = MeasurementSession::new(config, Some(69))?;
    let partials = stiff_partials(440.0, 0.0);

    let updates = (0..3)
        .map(|k| {
            let samples = frame_samples(&partials, k * FRAME, FRAME, 1.0);
            let frame = AudioFrame::new(&samples, SAMPLE_RATE)?;
            session.process_frame(&frame, Duration::from_millis(k as u64 * 186))
        })
        .collect::<Result<Vec<_>, AnalysisError>>()?;

    let measurement = updates[2]
        .measurement
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no measurement at lock"))?;
    for kind in PartialKind::ALL {
        let cents = measurement.cents_from_nominal(kind.multiple()).unwrap_or(f32::MAX);
        assert!(cents.abs() < 1.0, "{kind:?} off by {cents} cents");
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLIND MODE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn blind_session_follows_a_decaying_strike() -> anyhow::Result<()> {
    const FRAME: usize = 4096;
    let mut session = MeasurementSession::new(AnalyzerConfig::default(), None)?;
    let partials = stiff_partials(midi_to_frequency(62), 0.0);

    let mut updates = Vec::new();
    for k in 0..12 {
        let gain = 0.5_f64.powi(k as i32);
        let samples = frame_samples(&partials, k * FRAME, FRAME, gain);
        let frame = AudioFrame::new(&samples, SAMPLE_RATE)?;
        updates.push(session.process_frame(&frame, Duration::from_millis(k as u64 * 93))?);
    }

    let first = &updates[0];
    let note = first.note.as_ref().ok_or_else(|| anyhow::anyhow!("no note"))?;
    assert_eq!(note.full_name, "D4");
    assert!(first.partials.fundamental.is_present());
    assert!(first.partials.octave.is_present());

    // Far below the sustain threshold the gate is closed and nothing is reported
    let last = &updates[11];
    assert!(!last.partials.fundamental.is_present());
    assert_eq!(last.source, None);
    assert!(updates.iter().all(|u| !u.stability.is_stable));
    Ok(())
}

#[test]
fn stateless_estimator_agrees_with_session_note() -> anyhow::Result<()> {
    let partials = stiff_partials(196.0, 0.0);
    let samples = frame_samples(&partials, 0, 4096, 1.0);
    let estimate = estimate_pitch(&samples, SAMPLE_RATE, &AnalyzerConfig::default())?
        .ok_or_else(|| anyhow::anyhow!("no pitch"))?;
    assert_relative_eq!(estimate.frequency_hz, 196.0, max_relative = 2e-3);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// MALFORMED INPUT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn malformed_frames_are_rejected() {
    let samples = vec![0.0_f32; 3000];
    assert_eq!(
        AudioFrame::new(&samples, SAMPLE_RATE).unwrap_err(),
        AnalysisError::NotPowerOfTwo(3000)
    );
    let samples = vec![0.0_f32; 4096];
    assert!(matches!(
        AudioFrame::new(&samples, -1.0),
        Err(AnalysisError::InvalidSampleRate(_))
    ));
    let short_spectrum = vec![-100.0_f32; 100];
    assert!(matches!(
        AudioFrame::new(&samples, SAMPLE_RATE)
            .and_then(|frame| frame.with_spectrum(&short_spectrum, 4096)),
        Err(AnalysisError::LengthMismatch { .. })
    ));
}

#[test]
fn capture_operation_defaults_to_average() {
    assert_eq!(AnalyzerConfig::default().capture_operation, ProcessingOperation::Average);
}
