use linreg::linear_regression;
use serde::{Deserialize, Serialize};

use crate::tuning::{cents_deviation, midi_to_frequency, partial_reference};

/// Represents a single measured partial of a note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub number: u32,    // The partial number (n=1, 2, 3)
    pub frequency: f32, // The measured frequency in Hz
}

/// The locked measurement of one tonefield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TonefieldMeasurement {
    pub midi: i32,
    pub partials: Vec<Partial>,
    pub calculated_b: Option<f32>, // Stored after calculate_b_value
}

impl TonefieldMeasurement {
    pub fn new(midi: i32, mut partials: Vec<Partial>) -> Self {
        partials.sort_by_key(|p| p.number);
        let mut measurement = Self {
            midi,
            partials,
            calculated_b: None,
        };
        measurement.calculate_b_value();
        measurement
    }

    pub fn partial(&self, number: u32) -> Option<&Partial> {
        self.partials.iter().find(|p| p.number == number)
    }

    /// Cents of partial `number` from its equal-tempered target (`number ×` the note's nominal frequency).
    pub fn cents_from_nominal(&self, number: u32) -> Option<f32> {
        let partial = self.partial(number)?;
        Some(cents_deviation(
            partial.frequency,
            partial_reference(midi_to_frequency(self.midi), number),
        ))
    }

    /// Cents of partial `number` from `number ×` the measured fundamental.
    ///
    /// This is how far the tonefield is from a pure harmonic ratio, whatever
    /// the fundamental itself is tuned to.
    pub fn ratio_deviation_cents(&self, number: u32) -> Option<f32> {
        let fundamental = self.partial(1)?;
        let partial = self.partial(number)?;
        Some(cents_deviation(
            partial.frequency,
            partial_reference(fundamental.frequency, number),
        ))
    }

    /// Calculates the inharmonicity constant 'B' for this measurement.
    ///
    /// Fits `(f_n / n)²` against `n²`; for a stiff vibrator
    /// `f_n = n·f_0·√(1 + B·n²)`, so the slope over the intercept is `B`.
    pub fn calculate_b_value(&mut self) -> Option<f32> {
        self.calculated_b = None;

        // x = n^2, y = (f_n / n)^2
        let (xs, ys): (Vec<f64>, Vec<f64>) = self
            .partials
            .iter()
            .filter(|p| p.number > 0 && p.frequency > 0.0)
            .map(|p| {
                let n = p.number as f64;
                let f_n = p.frequency as f64;
                (n * n, (f_n / n) * (f_n / n))
            })
            .unzip();

        if xs.len() < 3 {
            return None; // Need at least 3 points for a meaningful regression
        }

        if let Ok((slope, intercept)) = linear_regression::<_, _, f64>(&xs, &ys) {
            if intercept.abs() > 1e-6 {
                self.calculated_b = Some((slope / intercept) as f32);
            }
        }
        self.calculated_b
    }
}
