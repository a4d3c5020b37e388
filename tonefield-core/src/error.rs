//! # Error Module
//!
//! Hard failures of the analysis core. Only malformed input and inconsistent
//! configuration end up here; silence, missing periodicity and missing
//! spectral peaks are ordinary `None` results and never errors.

use thiserror::Error;

/// Errors raised for input the analysis core cannot work with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Sample rate is zero, negative or not finite.
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f32),

    /// FFT and frame sizes must be powers of two.
    #[error("Size {0} is not a power of two")]
    NotPowerOfTwo(usize),

    /// A buffer does not have the length its companion requires.
    #[error("Buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Buffer is too short for the requested analysis.
    #[error("Buffer too short: {len} samples, need at least {min}")]
    BufferTooShort { len: usize, min: usize },

    /// Hop between consecutive frames must be non-zero.
    #[error("Invalid hop size: {0}")]
    InvalidHop(usize),

    /// A configuration value is out of range or inconsistent with another.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
