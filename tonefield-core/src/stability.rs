//! # Stability Tracking Module
//!
//! Smooths the three partial readings over successive frames and decides when
//! the measurement has settled long enough to be trusted ("locked").
//!
//! Per partial, a raw detection updates an exponential moving average of
//! frequency and cents; a missing detection is tolerated for a few frames
//! before the smoothed value is cleared. Globally, a counter climbs by one on
//! every in-tolerance frame and falls by two on every out-of-tolerance frame,
//! so a single glitch costs two frames of progress instead of the whole run.

use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AnalyzerConfig;
use crate::{PartialKind, PartialReading, PartialSet};

/// Smoothing and stability state of one partial.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StabilityState {
    pub smoothed_frequency: Option<f32>,
    pub smoothed_cents: Option<f32>,
    pub consecutive_null_frames: u32,
    pub stability_frame_count: u32,
    pub is_stable: bool,
}

impl StabilityState {
    fn update(&mut self, reading: &PartialReading, tolerance_cents: f32, params: &TrackerParams) {
        match (reading.frequency_hz, reading.cents_deviation) {
            (Some(frequency), Some(cents)) => {
                self.smoothed_frequency = Some(ema(self.smoothed_frequency, frequency, params.alpha));
                self.smoothed_cents = Some(ema(self.smoothed_cents, cents, params.alpha));
                self.consecutive_null_frames = 0;
                self.stability_frame_count = if self.within(tolerance_cents) {
                    self.stability_frame_count.saturating_add(1)
                } else {
                    self.stability_frame_count.saturating_sub(2)
                };
            }
            _ => {
                self.consecutive_null_frames = self.consecutive_null_frames.saturating_add(1);
                if self.consecutive_null_frames >= params.null_grace_frames {
                    self.smoothed_frequency = None;
                    self.smoothed_cents = None;
                    self.stability_frame_count = 0;
                }
            }
        }
        self.is_stable = self.stability_frame_count >= params.frame_threshold;
    }

    /// Whether the smoothed cents lie within `tolerance_cents` of zero.
    pub fn within(&self, tolerance_cents: f32) -> bool {
        self.smoothed_cents.is_some_and(|cents| cents.abs() <= tolerance_cents)
    }
}

fn ema(previous: Option<f32>, raw: f32, alpha: f32) -> f32 {
    match previous {
        Some(smoothed) => alpha * smoothed + (1.0 - alpha) * raw,
        None => raw,
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackerParams {
    alpha: f32,
    null_grace_frames: u32,
    frame_threshold: u32,
}

/// Where the measurement currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerPhase {
    /// No fundamental, counters idle
    Silent,
    /// Readings arriving, counting stable frames
    Tracking,
    /// The stability counter has reached the threshold
    Stable,
}

/// A crossing of the stability threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityTransition {
    Locked,
    Unlocked,
}

/// Stability after one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilitySnapshot {
    pub frame_count: u32,
    pub frame_threshold: u32,
    pub is_stable: bool,
    pub phase: TrackerPhase,
    pub transition: Option<StabilityTransition>,
}

/// Per-session smoothing of the fundamental, octave and compound fifth.
///
/// Owned by exactly one measurement session; build a fresh one whenever the
/// target note changes so no EMA memory carries over.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    params: TrackerParams,
    tolerances: [f32; 3],
    partials: [StabilityState; 3],
    frame_count: u32,
    is_stable: bool,
}

impl StabilityTracker {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            params: TrackerParams {
                alpha: config.ema_alpha,
                null_grace_frames: config.null_grace_frames,
                frame_threshold: config.stability_frame_threshold,
            },
            tolerances: [
                config.fundamental_tolerance_cents,
                config.octave_tolerance_cents,
                config.compound_fifth_tolerance_cents,
            ],
            partials: [StabilityState::default(); 3],
            frame_count: 0,
            is_stable: false,
        }
    }

    /// Feeds one frame of raw readings.
    ///
    /// A frame whose raw fundamental is missing while its smoothed value is
    /// still inside the grace window leaves the global counter unchanged.
    pub fn update(&mut self, readings: &PartialSet) -> StabilitySnapshot {
        for kind in PartialKind::ALL {
            let tolerance = self.tolerances[kind.index()];
            self.partials[kind.index()].update(readings.get(kind), tolerance, &self.params);
        }

        let fundamental_present = readings.fundamental.frequency_hz.is_some();
        let holding = !fundamental_present && self.state(PartialKind::Fundamental).smoothed_cents.is_some();
        if !holding {
            self.frame_count = if self.all_partials_stable() {
                self.frame_count.saturating_add(1)
            } else {
                self.frame_count.saturating_sub(2)
            };
        }

        let was_stable = self.is_stable;
        self.is_stable = self.frame_count >= self.params.frame_threshold;
        let transition = match (was_stable, self.is_stable) {
            (false, true) => Some(StabilityTransition::Locked),
            (true, false) => Some(StabilityTransition::Unlocked),
            _ => None,
        };
        if let Some(transition) = transition {
            debug!("[STABILITY] {:?} at frame count {}", transition, self.frame_count);
        }

        StabilitySnapshot {
            frame_count: self.frame_count,
            frame_threshold: self.params.frame_threshold,
            is_stable: self.is_stable,
            phase: self.phase(),
            transition,
        }
    }

    /// Fundamental within tolerance, and each upper partial either absent or within its own tolerance.
    pub fn all_partials_stable(&self) -> bool {
        let fundamental = PartialKind::Fundamental;
        if !self.state(fundamental).within(self.tolerances[fundamental.index()]) {
            return false;
        }
        [PartialKind::Octave, PartialKind::CompoundFifth].iter().all(|&kind| {
            let state = self.state(kind);
            state.smoothed_cents.is_none() || state.within(self.tolerances[kind.index()])
        })
    }

    pub fn phase(&self) -> TrackerPhase {
        if self.is_stable {
            TrackerPhase::Stable
        } else if self.state(PartialKind::Fundamental).smoothed_frequency.is_some() {
            TrackerPhase::Tracking
        } else {
            TrackerPhase::Silent
        }
    }

    pub fn state(&self, kind: PartialKind) -> &StabilityState {
        &self.partials[kind.index()]
    }

    /// Smoothed readings of all three partials.
    pub fn smoothed(&self) -> PartialSet {
        let reading = |kind: PartialKind| {
            let state = self.state(kind);
            PartialReading {
                frequency_hz: state.smoothed_frequency,
                cents_deviation: state.smoothed_frequency.and(state.smoothed_cents),
            }
        };
        PartialSet {
            fundamental: reading(PartialKind::Fundamental),
            octave: reading(PartialKind::Octave),
            compound_fifth: reading(PartialKind::CompoundFifth),
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn is_stable(&self) -> bool {
        self.is_stable
    }

    /// Forgets all smoothing memory and counters.
    pub fn reset(&mut self) {
        self.partials = [StabilityState::default(); 3];
        self.frame_count = 0;
        self.is_stable = false;
    }
}

/// Rate limiter for publishing updates to a display.
///
/// Threshold crossings are always let through.
#[derive(Debug, Clone)]
pub struct EmissionThrottle {
    min_interval: Duration,
    last_emit: Option<Duration>,
}

impl EmissionThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    /// Decides whether to emit at `now` (time since the session started).
    pub fn should_emit(&mut self, now: Duration, force: bool) -> bool {
        let due = force
            || self
                .last_emit
                .is_none_or(|last| now.saturating_sub(last) >= self.min_interval);
        if due {
            self.last_emit = Some(now);
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reading(cents: f32) -> PartialReading {
        PartialReading::from_detection(Some(440.0 * 2.0_f32.powf(cents / 1200.0)), 440.0)
    }

    fn fundamental_only(cents: f32) -> PartialSet {
        PartialSet {
            fundamental: reading(cents),
            ..PartialSet::default()
        }
    }

    fn config(threshold: u32) -> AnalyzerConfig {
        AnalyzerConfig {
            stability_frame_threshold: threshold,
            ..Default::default()
        }
    }

    #[test]
    fn counter_climbs_then_soft_resets() {
        let mut tracker = StabilityTracker::new(&config(30));
        for n in 1..=12 {
            let snapshot = tracker.update(&fundamental_only(0.5));
            assert_eq!(snapshot.frame_count, n);
        }
        let snapshot = tracker.update(&fundamental_only(40.0));
        assert_eq!(snapshot.frame_count, 10);
    }

    #[test]
    fn counter_never_goes_negative() {
        let mut tracker = StabilityTracker::new(&config(30));
        tracker.update(&fundamental_only(0.0));
        let snapshot = tracker.update(&fundamental_only(60.0));
        assert_eq!(snapshot.frame_count, 0);
        let snapshot = tracker.update(&fundamental_only(60.0));
        assert_eq!(snapshot.frame_count, 0);
    }

    #[test]
    fn locks_exactly_at_threshold() {
        let threshold = 30;
        let mut tracker = StabilityTracker::new(&config(threshold));
        for _ in 1..threshold {
            let snapshot = tracker.update(&fundamental_only(1.0));
            assert!(!snapshot.is_stable);
            assert_ne!(snapshot.phase, TrackerPhase::Stable);
        }
        let snapshot = tracker.update(&fundamental_only(1.0));
        assert!(snapshot.is_stable);
        assert_eq!(snapshot.transition, Some(StabilityTransition::Locked));
        assert_eq!(snapshot.phase, TrackerPhase::Stable);

        let snapshot = tracker.update(&fundamental_only(1.0));
        assert_eq!(snapshot.transition, None);

        let snapshot = tracker.update(&fundamental_only(50.0));
        assert_eq!(snapshot.frame_count, threshold - 1);
        assert!(!snapshot.is_stable);
        assert_eq!(snapshot.transition, Some(StabilityTransition::Unlocked));
    }

    #[test]
    fn ema_blends_toward_new_readings() {
        let mut tracker = StabilityTracker::new(&AnalyzerConfig::default());
        tracker.update(&fundamental_only(0.0));
        tracker.update(&fundamental_only(10.0));
        let cents = tracker.state(PartialKind::Fundamental).smoothed_cents.unwrap();
        assert_abs_diff_eq!(cents, 3.0, epsilon = 1e-3);
    }

    #[test]
    fn null_grace_holds_then_clears() {
        let mut tracker = StabilityTracker::new(&AnalyzerConfig::default());
        for _ in 0..5 {
            tracker.update(&fundamental_only(0.0));
        }
        assert_eq!(tracker.frame_count(), 5);

        for missed in 1..=2 {
            let snapshot = tracker.update(&PartialSet::default());
            let state = tracker.state(PartialKind::Fundamental);
            assert_eq!(state.consecutive_null_frames, missed);
            assert!(state.smoothed_frequency.is_some());
            assert_eq!(snapshot.frame_count, 5);
            assert_eq!(snapshot.phase, TrackerPhase::Tracking);
        }

        let snapshot = tracker.update(&PartialSet::default());
        assert_eq!(tracker.state(PartialKind::Fundamental).smoothed_frequency, None);
        assert_eq!(snapshot.frame_count, 3);
        assert_eq!(snapshot.phase, TrackerPhase::Silent);
    }

    #[test]
    fn reading_after_dropout_resets_null_counter() {
        let mut tracker = StabilityTracker::new(&AnalyzerConfig::default());
        tracker.update(&fundamental_only(0.0));
        tracker.update(&PartialSet::default());
        tracker.update(&fundamental_only(0.0));
        assert_eq!(tracker.state(PartialKind::Fundamental).consecutive_null_frames, 0);
    }

    #[test]
    fn absent_upper_partials_are_not_penalized() {
        let tracker_config = config(3);
        let mut tracker = StabilityTracker::new(&tracker_config);
        for _ in 0..3 {
            tracker.update(&fundamental_only(0.0));
        }
        assert!(tracker.is_stable());
    }

    #[test]
    fn fifth_has_wider_tolerance_than_octave() {
        let mut tracker = StabilityTracker::new(&config(5));
        let set = PartialSet {
            fundamental: reading(0.0),
            octave: reading(1.5),
            compound_fifth: reading(4.0),
        };
        tracker.update(&set);
        assert!(tracker.all_partials_stable());

        let mut tracker = StabilityTracker::new(&config(5));
        let set = PartialSet {
            fundamental: reading(0.0),
            octave: reading(4.0),
            compound_fifth: reading(0.0),
        };
        tracker.update(&set);
        assert!(!tracker.all_partials_stable());
        assert_eq!(tracker.frame_count(), 0);
    }

    #[test]
    fn reset_forgets_previous_note() {
        let mut tracker = StabilityTracker::new(&config(3));
        for _ in 0..4 {
            tracker.update(&fundamental_only(0.0));
        }
        tracker.reset();
        assert_eq!(tracker.frame_count(), 0);
        assert!(!tracker.is_stable());
        assert_eq!(tracker.smoothed(), PartialSet::default());
        assert_eq!(tracker.phase(), TrackerPhase::Silent);
    }

    #[test]
    fn throttle_limits_rate_but_not_crossings() {
        let mut throttle = EmissionThrottle::new(Duration::from_millis(50));
        assert!(throttle.should_emit(Duration::from_millis(0), false));
        assert!(!throttle.should_emit(Duration::from_millis(16), false));
        assert!(throttle.should_emit(Duration::from_millis(33), true));
        assert!(!throttle.should_emit(Duration::from_millis(50), false));
        assert!(throttle.should_emit(Duration::from_millis(83), false));
    }
}
