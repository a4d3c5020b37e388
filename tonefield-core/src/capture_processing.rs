//! # Capture Processing Module
//!
//! Reduces the window of frames that led up to a lock into one
//! `TonefieldMeasurement`. This module provides different processing
//! strategies for the stable frames.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    PartialKind, PartialSet,
    inharmonicity::{Partial, TonefieldMeasurement},
};

/// Different processing operations that can be performed on captured frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingOperation {
    /// Use the single frame with the highest confidence
    BestConfidence,
    /// Average each partial over the frames where it was measured (default strategy)
    #[default]
    Average,
}

/// Raw readings of one frame, kept until the session locks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapturedFrame {
    pub partials: PartialSet,
    pub confidence: f32,
}

/// Processes captured frames using the specified operation strategy.
///
/// This function:
/// 1. Applies the specified processing operation to the frames
/// 2. Creates a `TonefieldMeasurement` from the processed partials
/// 3. Calculates the 'B' value for the measurement
///
/// # Arguments
/// * `frames` - The frames captured while the readings settled
/// * `midi` - The note being measured
/// * `operation` - The processing operation to perform
///
/// # Returns
/// * `Option<TonefieldMeasurement>` - `None` if no frame measured a fundamental
pub fn process(
    frames: &[CapturedFrame],
    midi: i32,
    operation: ProcessingOperation,
) -> Option<TonefieldMeasurement> {
    let partials = match operation {
        ProcessingOperation::BestConfidence => process_best_confidence(frames),
        ProcessingOperation::Average => process_average(frames),
    };
    let Some(partials) = partials else {
        debug!("[CAPTURE] Process failed: no frame with a fundamental among {}", frames.len());
        return None;
    };

    let measurement = TonefieldMeasurement::new(midi, partials);
    debug!(
        "[CAPTURE] {:?} over {} frames for MIDI {}: {:?}, B={:?}",
        operation,
        frames.len(),
        midi,
        measurement.partials,
        measurement.calculated_b
    );
    Some(measurement)
}

/// Partials of the frame with the highest confidence that measured a fundamental.
fn process_best_confidence(frames: &[CapturedFrame]) -> Option<Vec<Partial>> {
    let best_frame = frames
        .iter()
        .filter(|frame| frame.partials.fundamental.is_present())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

    Some(
        best_frame
            .partials
            .iter()
            .filter_map(|(kind, reading)| {
                reading.frequency_hz.map(|frequency| Partial {
                    number: kind.multiple(),
                    frequency,
                })
            })
            .collect(),
    )
}

/// Per-partial mean frequency over the frames where that partial was present.
fn process_average(frames: &[CapturedFrame]) -> Option<Vec<Partial>> {
    let partials: Vec<Partial> = PartialKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let (sum, count) = frames
                .iter()
                .filter_map(|frame| frame.partials.get(kind).frequency_hz)
                .fold((0.0_f64, 0_u32), |(sum, count), f| (sum + f as f64, count + 1));
            (count > 0).then(|| Partial {
                number: kind.multiple(),
                frequency: (sum / count as f64) as f32,
            })
        })
        .collect();

    partials.iter().any(|p| p.number == 1).then_some(partials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartialReading;
    use approx::assert_abs_diff_eq;

    fn frame(fundamental: Option<f32>, octave: Option<f32>, fifth: Option<f32>, confidence: f32) -> CapturedFrame {
        CapturedFrame {
            partials: PartialSet {
                fundamental: PartialReading::from_detection(fundamental, 220.0),
                octave: PartialReading::from_detection(octave, 440.0),
                compound_fifth: PartialReading::from_detection(fifth, 660.0),
            },
            confidence,
        }
    }

    #[test]
    fn best_confidence_picks_one_frame() {
        let frames = [
            frame(Some(219.0), Some(438.0), Some(657.0), 0.5),
            frame(Some(220.5), Some(441.0), None, 0.95),
            frame(None, Some(440.0), Some(660.0), 0.99),
        ];
        let measurement = process(&frames, 57, ProcessingOperation::BestConfidence).unwrap();
        assert_eq!(measurement.midi, 57);
        assert_eq!(measurement.partials.len(), 2);
        assert_eq!(measurement.partial(1).unwrap().frequency, 220.5);
        assert_eq!(measurement.partial(3), None);
        assert_eq!(measurement.calculated_b, None);
    }

    #[test]
    fn average_uses_frames_where_partial_was_present() {
        let frames = [
            frame(Some(219.0), Some(440.0), None, 0.5),
            frame(Some(221.0), None, Some(661.0), 0.7),
            frame(None, Some(442.0), Some(663.0), 0.1),
        ];
        let measurement = process(&frames, 57, ProcessingOperation::Average).unwrap();
        assert_abs_diff_eq!(measurement.partial(1).unwrap().frequency, 220.0, epsilon = 1e-4);
        assert_abs_diff_eq!(measurement.partial(2).unwrap().frequency, 441.0, epsilon = 1e-4);
        assert_abs_diff_eq!(measurement.partial(3).unwrap().frequency, 662.0, epsilon = 1e-4);
        assert!(measurement.calculated_b.is_some());
    }

    #[test]
    fn no_fundamental_means_no_measurement() {
        let frames = [frame(None, Some(440.0), Some(660.0), 0.9)];
        assert_eq!(process(&frames, 57, ProcessingOperation::Average), None);
        assert_eq!(process(&frames, 57, ProcessingOperation::BestConfidence), None);
        assert_eq!(process(&[], 57, ProcessingOperation::default()), None);
    }

    #[test]
    fn average_is_the_default() {
        assert_eq!(ProcessingOperation::default(), ProcessingOperation::Average);
    }
}
