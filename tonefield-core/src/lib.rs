// tonefield-core/src/lib.rs

//! The analysis core of the tonefield tuner.
//! This crate measures the fundamental, octave and compound fifth of a struck
//! metal tonefield frame by frame, decides when the readings are stable, and
//! reduces a stable stretch into one measurement. It is completely headless:
//! audio capture and display live with the caller.

pub mod audio;
pub mod capture_processing;
pub mod config;
pub mod error;
pub mod fft;
pub mod harmonic;
pub mod inharmonicity;
pub mod pitch;
pub mod precision;
pub mod session;
pub mod stability;
pub mod template;
pub mod tuning;

#[cfg(test)]
mod test_signals;

use serde::{Deserialize, Serialize};

pub use audio::AudioFrame;
pub use config::AnalyzerConfig;
pub use error::{AnalysisError, Result};
pub use session::{MeasurementSession, SessionUpdate};

/// The three partials measured on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartialKind {
    /// 1× the fundamental
    Fundamental,
    /// 2×
    Octave,
    /// 3×
    CompoundFifth,
}

impl PartialKind {
    pub const ALL: [PartialKind; 3] = [
        PartialKind::Fundamental,
        PartialKind::Octave,
        PartialKind::CompoundFifth,
    ];

    /// Ideal frequency ratio to the fundamental.
    pub fn multiple(self) -> u32 {
        match self {
            PartialKind::Fundamental => 1,
            PartialKind::Octave => 2,
            PartialKind::CompoundFifth => 3,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.multiple() as usize - 1
    }
}

/// One measured partial. A missing frequency always comes with missing cents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialReading {
    pub frequency_hz: Option<f32>,
    /// Signed deviation from the reference, positive is sharp
    pub cents_deviation: Option<f32>,
}

impl PartialReading {
    /// Builds a reading from a detection and the frequency it should have.
    ///
    /// Non-finite or non-positive detections become a missing reading.
    pub fn from_detection(frequency_hz: Option<f32>, reference_hz: f32) -> Self {
        match frequency_hz.filter(|f| f.is_finite() && *f > 0.0) {
            Some(frequency) => Self {
                frequency_hz: Some(frequency),
                cents_deviation: (reference_hz.is_finite() && reference_hz > 0.0)
                    .then(|| tuning::cents_deviation(frequency, reference_hz)),
            },
            None => Self::default(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

/// Readings of all three partials for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialSet {
    pub fundamental: PartialReading,
    pub octave: PartialReading,
    pub compound_fifth: PartialReading,
}

impl PartialSet {
    pub fn get(&self, kind: PartialKind) -> &PartialReading {
        match kind {
            PartialKind::Fundamental => &self.fundamental,
            PartialKind::Octave => &self.octave,
            PartialKind::CompoundFifth => &self.compound_fifth,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartialKind, &PartialReading)> {
        PartialKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}
