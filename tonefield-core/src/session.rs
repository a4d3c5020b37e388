//! # Measurement Session Module
//!
//! The per-frame pipeline. A `MeasurementSession` owns everything that must
//! survive from one frame to the next: the signal gate, the stability
//! tracker, the emission throttle, the phase history of the precision
//! detector and the frames buffered for capture. It is created for one
//! measurement and thrown away (or reset with `set_target`) when the note
//! changes, so no smoothing memory leaks from one note into the next.
//!
//! Two modes:
//! - **Target**: the note is known. The fundamental comes from the
//!   narrow-band precision detector around the target, the octave and
//!   compound fifth from the harmonic analyzer.
//! - **Blind**: the note is unknown. YIN estimates the pitch, the spectrum
//!   validates it against octave errors, and the template matcher takes over
//!   when YIN finds no periodicity.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::audio::{AudioFrame, SignalGate};
use crate::capture_processing::{self, CapturedFrame};
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Result};
use crate::fft::{Spectrum, SpectrumView, compute_spectrum};
use crate::harmonic::{Correction, find_partial, validate_fundamental};
use crate::inharmonicity::TonefieldMeasurement;
use crate::pitch::detect_pitch_yin;
use crate::precision::{PreviousPhase, detect_near_target};
use crate::stability::{EmissionThrottle, StabilitySnapshot, StabilityTracker, StabilityTransition};
use crate::template::{match_note, prominence};
use crate::tuning::{NoteInfo, cents_deviation, midi_to_frequency, note_from_frequency, note_info, partial_reference};
use crate::{PartialKind, PartialReading, PartialSet};

/// Where this frame's fundamental came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FundamentalSource {
    /// Narrow-band search around the target
    Precision { phase_refined: bool },
    /// YIN estimate after spectral validation
    Yin(Correction),
    /// Whole-spectrum template match
    Template { score: f32 },
}

/// Everything the display layer needs after one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// Raw readings of this frame
    pub partials: PartialSet,
    /// EMA-smoothed readings
    pub smoothed: PartialSet,
    pub note: Option<NoteInfo>,
    pub confidence: Option<f32>,
    pub source: Option<FundamentalSource>,
    pub stability: StabilitySnapshot,
    /// Whether the display should be refreshed with this update
    pub emit: bool,
    /// Set on the frame that locks
    pub measurement: Option<TonefieldMeasurement>,
}

impl SessionUpdate {
    pub fn transition(&self) -> Option<StabilityTransition> {
        self.stability.transition
    }
}

/// Detection results of one frame before smoothing.
#[derive(Debug, Default)]
struct FrameDetection {
    partials: PartialSet,
    note: Option<NoteInfo>,
    confidence: Option<f32>,
    source: Option<FundamentalSource>,
    phase: Option<PreviousPhase>,
}

/// State of one measurement, fed one audio frame at a time.
#[derive(Debug, Clone)]
pub struct MeasurementSession {
    config: AnalyzerConfig,
    target: Option<i32>,
    gate: SignalGate,
    tracker: StabilityTracker,
    throttle: EmissionThrottle,
    previous_phase: Option<PreviousPhase>,
    frames: VecDeque<CapturedFrame>,
    current_note: Option<i32>,
    locked: Option<TonefieldMeasurement>,
}

impl MeasurementSession {
    /// Starts a session in target mode (`Some(midi)`) or blind mode (`None`).
    ///
    /// # Returns
    /// * `Err(AnalysisError::InvalidConfig)` - Inconsistent configuration or a target outside MIDI 0..=127
    pub fn new(config: AnalyzerConfig, target: Option<i32>) -> Result<Self> {
        config.validate()?;
        validate_target(target)?;
        debug!("[SESSION] New session, target {:?}", target);
        Ok(Self {
            gate: SignalGate::new(config.rms_onset_threshold, config.rms_sustain_threshold),
            tracker: StabilityTracker::new(&config),
            throttle: EmissionThrottle::new(Duration::from_millis(config.emit_interval_ms)),
            previous_phase: None,
            frames: VecDeque::with_capacity(config.stability_frame_threshold as usize),
            current_note: target,
            locked: None,
            target,
            config,
        })
    }

    /// Switches to another target (or to blind mode) and discards all per-session state.
    pub fn set_target(&mut self, target: Option<i32>) -> Result<()> {
        validate_target(target)?;
        debug!("[SESSION] Target {:?} -> {:?}", self.target, target);
        self.target = target;
        self.reset();
        Ok(())
    }

    /// Forgets smoothing memory, counters, phase history, gate state and buffered frames.
    pub fn reset(&mut self) {
        self.gate.reset();
        self.tracker.reset();
        self.throttle.reset();
        self.previous_phase = None;
        self.frames.clear();
        self.current_note = self.target;
        self.locked = None;
    }

    pub fn target(&self) -> Option<i32> {
        self.target
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    /// The measurement captured at the last lock, until the session unlocks.
    pub fn locked_measurement(&self) -> Option<&TonefieldMeasurement> {
        self.locked.as_ref()
    }

    /// Runs the full pipeline on one frame.
    ///
    /// # Arguments
    /// * `frame` - The frame to analyze
    /// * `now` - Time since the session started, for throttling emissions
    ///
    /// # Returns
    /// * `Err(AnalysisError)` - Only for malformed input; silence and missing
    ///   detections come back as null readings
    pub fn process_frame(&mut self, frame: &AudioFrame<'_>, now: Duration) -> Result<SessionUpdate> {
        let level = frame.rms();
        let detection = if self.gate.update(level) {
            let computed: Spectrum;
            let spectrum = match frame.spectrum() {
                Some(view) => view,
                None => {
                    computed = compute_spectrum(frame.samples(), frame.sample_rate(), frame.len())?;
                    computed.view()
                }
            };
            match self.target {
                Some(midi) => self.detect_target(frame, &spectrum, midi)?,
                None => self.detect_blind(frame, &spectrum)?,
            }
        } else {
            trace!("[SESSION] Gate closed (rms {:.5})", level);
            FrameDetection {
                note: self.target.map(note_info),
                ..Default::default()
            }
        };

        // Phase history never spans a frame without a fundamental
        self.previous_phase = detection.phase;

        if self.target.is_none() {
            if let Some(midi) = detection.note.as_ref().map(|note| note.midi_number) {
                if self.current_note.is_some_and(|current| current != midi) {
                    debug!("[SESSION] Note changed {:?} -> {}", self.current_note, midi);
                    self.tracker.reset();
                    self.frames.clear();
                    self.locked = None;
                }
                self.current_note = Some(midi);
            }
        }

        let stability = self.tracker.update(&detection.partials);

        if self.frames.len() == self.config.stability_frame_threshold as usize {
            self.frames.pop_front();
        }
        self.frames.push_back(CapturedFrame {
            partials: detection.partials,
            confidence: detection.confidence.unwrap_or(0.0),
        });

        let measurement = match stability.transition {
            Some(StabilityTransition::Locked) => self.capture(),
            Some(StabilityTransition::Unlocked) => {
                self.locked = None;
                None
            }
            None => None,
        };

        let emit = self.throttle.should_emit(now, stability.transition.is_some());

        Ok(SessionUpdate {
            partials: detection.partials,
            smoothed: self.tracker.smoothed(),
            note: detection.note,
            confidence: detection.confidence,
            source: detection.source,
            stability,
            emit,
            measurement,
        })
    }

    fn capture(&mut self) -> Option<TonefieldMeasurement> {
        let midi = self.current_note?;
        let measurement = capture_processing::process(
            self.frames.make_contiguous(),
            midi,
            self.config.capture_operation,
        );
        if let Some(measurement) = &measurement {
            debug!(
                "[SESSION] Locked {} with {} partials, B={:?}",
                note_info(midi).full_name,
                measurement.partials.len(),
                measurement.calculated_b
            );
        }
        self.locked = measurement.clone();
        measurement
    }

    fn detect_target(
        &self,
        frame: &AudioFrame<'_>,
        spectrum: &SpectrumView<'_>,
        midi: i32,
    ) -> Result<FrameDetection> {
        let target_hz = midi_to_frequency(midi);
        let hop = self.config.hop_size.unwrap_or(0);
        let previous = self.previous_phase.as_ref().filter(|_| hop > 0);
        let reading = detect_near_target(
            frame.samples(),
            frame.sample_rate(),
            target_hz,
            &self.config,
            previous,
            hop,
        )?;

        let fundamental_hz = reading.peak.map(|peak| peak.frequency_hz);
        let partials = self.measure_partials(spectrum, fundamental_hz, target_hz);

        let mut note = note_info(midi);
        if let Some(cents) = partials.fundamental.cents_deviation {
            note.cents_from_semitone = cents;
        }

        Ok(FrameDetection {
            partials,
            note: Some(note),
            confidence: reading.peak.map(|peak| prominence(peak.magnitude_db, &self.config)),
            source: reading.peak.map(|_| FundamentalSource::Precision {
                phase_refined: reading.phase_refined,
            }),
            phase: reading.phase,
        })
    }

    fn detect_blind(&self, frame: &AudioFrame<'_>, spectrum: &SpectrumView<'_>) -> Result<FrameDetection> {
        let config = &self.config;
        let estimate = detect_pitch_yin(
            frame.samples(),
            frame.sample_rate(),
            config.yin_threshold,
            config.min_frequency,
            config.max_frequency,
        )?;

        let validated = estimate.and_then(|estimate| {
            validate_fundamental(spectrum, estimate.frequency_hz, config)
                .map(|validated| (estimate, validated))
        });

        if let Some((estimate, validated)) = validated {
            let fundamental_hz = validated.peak.frequency_hz;
            let Some(note) = note_from_frequency(fundamental_hz) else {
                return Ok(FrameDetection::default());
            };
            let nominal_hz = midi_to_frequency(note.midi_number);
            return Ok(FrameDetection {
                partials: self.measure_partials(spectrum, Some(fundamental_hz), nominal_hz),
                note: Some(note),
                confidence: Some(estimate.confidence),
                source: Some(FundamentalSource::Yin(validated.correction)),
                phase: None,
            });
        }

        let Some(matched) = match_note(spectrum, config) else {
            trace!("[SESSION] No pitch and no template match");
            return Ok(FrameDetection::default());
        };
        let nominal_hz = matched.nominal_frequency_hz;
        let fundamental_hz = find_partial(spectrum, nominal_hz, config).map(|peak| peak.frequency_hz);
        let mut note = note_info(matched.midi_number);
        if let Some(frequency) = fundamental_hz {
            note.cents_from_semitone = cents_deviation(frequency, nominal_hz);
        }
        Ok(FrameDetection {
            partials: self.measure_partials(spectrum, fundamental_hz, nominal_hz),
            note: Some(note),
            confidence: Some(matched.score),
            source: Some(FundamentalSource::Template { score: matched.score }),
            phase: None,
        })
    }

    /// Measures the upper partials independently around multiples of the
    /// measured fundamental (or of the nominal one when it is missing), and
    /// rates all three against the nominal note.
    fn measure_partials(
        &self,
        spectrum: &SpectrumView<'_>,
        fundamental_hz: Option<f32>,
        nominal_hz: f32,
    ) -> PartialSet {
        let center_hz = fundamental_hz.unwrap_or(nominal_hz);
        let upper = |kind: PartialKind| {
            let multiple = kind.multiple();
            let found = find_partial(spectrum, partial_reference(center_hz, multiple), &self.config);
            PartialReading::from_detection(
                found.map(|peak| peak.frequency_hz),
                partial_reference(nominal_hz, multiple),
            )
        };
        PartialSet {
            fundamental: PartialReading::from_detection(fundamental_hz, nominal_hz),
            octave: upper(PartialKind::Octave),
            compound_fifth: upper(PartialKind::CompoundFifth),
        }
    }
}

fn validate_target(target: Option<i32>) -> Result<()> {
    match target {
        Some(midi) if !(0..=127).contains(&midi) => Err(AnalysisError::InvalidConfig(format!(
            "target MIDI {midi} outside 0..=127"
        ))),
        _ => Ok(()),
    }
}
