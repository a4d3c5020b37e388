//! Synthetic signals for unit tests.

use std::f32::consts::PI;

pub fn sine(freq: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
    sine_with_phase(freq, sample_rate, len, amplitude, 0.0)
}

pub fn sine_with_phase(freq: f32, sample_rate: f32, len: usize, amplitude: f32, phase: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let cycles = (freq as f64 * t).fract() as f32;
            amplitude * (2.0 * PI * cycles + phase).sin()
        })
        .collect()
}

/// Sum of sinusoids given as `(frequency, amplitude)` pairs.
pub fn partials(components: &[(f32, f32)], sample_rate: f32, len: usize) -> Vec<f32> {
    partials_from(components, sample_rate, 0, len)
}

/// Like `partials` but starting at sample `offset`, for consecutive overlapping frames.
pub fn partials_from(components: &[(f32, f32)], sample_rate: f32, offset: usize, len: usize) -> Vec<f32> {
    (offset..offset + len)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            components
                .iter()
                .map(|&(freq, amp)| {
                    let cycles = (freq as f64 * t).fract();
                    amp * (2.0 * PI * cycles as f32).sin()
                })
                .sum()
        })
        .collect()
}

/// Deterministic white-ish noise from a linear congruential generator.
pub fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let unit = (state >> 8) as f32 / (1u32 << 24) as f32;
            amplitude * (2.0 * unit - 1.0)
        })
        .collect()
}
