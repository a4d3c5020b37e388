//! # Musical Tuning Module
//!
//! Frequency, note and cents conversions in twelve-tone equal temperament
//! with A4 = 440 Hz (MIDI 69) as the reference.
//!
//! ## Features
//! - MIDI number <-> frequency conversions
//! - Nearest-note identification with cents from the semitone
//! - Cent deviation between a detected and a reference frequency
//! - Scientific note name parsing ("C#4", "Bb3")

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference pitch for A4.
pub const A4_FREQUENCY: f32 = 440.0;
/// MIDI number of A4.
pub const A4_MIDI: i32 = 69;

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const FLAT_ALIASES: [(&str, &str); 5] = [
    ("Db", "C#"),
    ("Eb", "D#"),
    ("Gb", "F#"),
    ("Ab", "G#"),
    ("Bb", "A#"),
];

/// Identification of a frequency as an equal-tempered note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteInfo {
    /// One of the twelve pitch classes, spelled with sharps
    pub pitch_class: String,
    /// Octave in scientific pitch notation (MIDI 60 = C4)
    pub octave_number: i32,
    /// Pitch class and octave, e.g. "C#4"
    pub full_name: String,
    pub midi_number: i32,
    /// Signed distance from the note's nominal frequency (-50..=50)
    pub cents_from_semitone: f32,
}

/// Lookup table from note names (sharp and flat spellings) to MIDI numbers.
///
/// Built once on first use; covers MIDI 0 (C-1) through 127 (G9).
static NOTE_MAP: Lazy<BTreeMap<String, i32>> = Lazy::new(|| {
    let mut map = BTreeMap::new();
    for midi in 0..=127 {
        let pitch_class = PITCH_CLASSES[midi as usize % 12];
        let octave = midi / 12 - 1;
        map.insert(format!("{pitch_class}{octave}"), midi);
        if let Some((flat, _)) = FLAT_ALIASES.iter().find(|(_, sharp)| *sharp == pitch_class) {
            map.insert(format!("{flat}{octave}"), midi);
        }
    }
    map
});

/// Nominal equal-tempered frequency of a MIDI note.
pub fn midi_to_frequency(midi: i32) -> f32 {
    (A4_FREQUENCY as f64 * 2.0_f64.powf((midi - A4_MIDI) as f64 / 12.0)) as f32
}

/// Fractional MIDI number of a frequency.
///
/// # Returns
/// * `Some(midi)` - e.g. 69.0 for 440 Hz, 69.5 for a quarter tone above
/// * `None` - Frequency is not strictly positive and finite
pub fn frequency_to_midi(freq: f32) -> Option<f32> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    let midi = A4_MIDI as f64 + 12.0 * (freq as f64 / A4_FREQUENCY as f64).log2();
    Some(midi as f32)
}

/// Builds the note description for an exact MIDI number.
pub fn note_info(midi: i32) -> NoteInfo {
    let pitch_class = PITCH_CLASSES[midi.rem_euclid(12) as usize].to_string();
    let octave_number = midi.div_euclid(12) - 1;
    NoteInfo {
        full_name: format!("{pitch_class}{octave_number}"),
        pitch_class,
        octave_number,
        midi_number: midi,
        cents_from_semitone: 0.0,
    }
}

/// Finds the nearest equal-tempered note to a frequency.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
///
/// # Returns
/// * `Some(note)` - Nearest note with the signed cents from its nominal pitch
/// * `None` - Frequency is not strictly positive and finite
pub fn note_from_frequency(freq: f32) -> Option<NoteInfo> {
    let midi = frequency_to_midi(freq)?.round() as i32;
    let mut note = note_info(midi);
    note.cents_from_semitone = cents_deviation(freq, midi_to_frequency(midi));
    Some(note)
}

/// Gets the MIDI number of a scientific note name.
///
/// Accepts sharps ("C#4") and flats ("Db4") for octaves -1 through 9.
pub fn midi_from_note_name(name: &str) -> Option<i32> {
    NOTE_MAP.get(name.trim()).copied()
}

/// Ideal frequency of a partial given the fundamental's reference frequency.
pub fn partial_reference(fundamental_reference: f32, multiple: u32) -> f32 {
    fundamental_reference * multiple as f32
}

/// Calculates the deviation from a reference frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// Evaluated as a difference of logarithms, so equal inputs give exactly 0
/// and swapping the arguments flips the sign exactly.
pub fn cents_deviation(detected: f32, reference: f32) -> f32 {
    (1200.0 * ((detected as f64).log2() - (reference as f64).log2())) as f32
}
