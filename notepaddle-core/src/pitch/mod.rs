//! # Pitch Detection Module
//!
//! Two interchangeable strategies estimate the fundamental frequency of the
//! captured audio:
//!
//! - [`PitchStrategy::Probabilistic`]: probabilistic YIN over the whole
//!   buffered history. Robust to transients and octave errors, but needs at
//!   least one full analysis frame of history.
//! - [`PitchStrategy::PeakTracking`]: picks the strongest interpolated
//!   spectral peak of the latest chunk only. Cheaper and more responsive,
//!   but noisier.
//!
//! Both restrict their search to the active [`NoteRange`].

pub mod peak;
pub mod pyin;

use crate::fft::PlanCache;
use crate::range::NoteRange;
use crate::tuning::{self, Note};
use serde::{Deserialize, Serialize};

/// Which estimator [`PitchDetector`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchStrategy {
    /// Probabilistic YIN over the buffered history (default).
    #[default]
    Probabilistic,
    /// Strongest spectral peak of the latest chunk.
    PeakTracking,
}

/// A detected fundamental with its confidence in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    pub frequency: f32,
    pub confidence: f32,
}

impl PitchEstimate {
    /// Nearest equal-tempered note.
    pub fn note(&self) -> Option<Note> {
        Note::from_frequency(self.frequency)
    }

    /// Deviation from the nearest note in cents.
    pub fn cents_deviation(&self) -> Option<f32> {
        tuning::find_nearest_note(self.frequency)
            .map(|(_, target)| tuning::calculate_cents_deviation(self.frequency, target))
    }
}

/// Runs the configured pitch strategy against analyzer buffers.
///
/// FFT plans are kept between calls, so one detector should live as long
/// as the analyzer that polls it.
#[derive(Debug, Default)]
pub struct PitchDetector {
    strategy: PitchStrategy,
    plans: PlanCache,
}

impl PitchDetector {
    pub fn new(strategy: PitchStrategy) -> Self {
        Self {
            strategy,
            plans: PlanCache::new(),
        }
    }

    pub fn strategy(&self) -> PitchStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: PitchStrategy) {
        self.strategy = strategy;
    }

    /// Estimates the pitch for the current buffers.
    ///
    /// # Arguments
    /// * `history` - The flattened ring buffer, oldest sample first
    /// * `latest_chunk` - The most recent capture chunk
    /// * `range` - Bounds the search band and supplies the sample rate
    ///
    /// # Returns
    /// * `Some(estimate)` - A pitch inside the search band
    /// * `None` - Nothing voiced (silence, noise, or not enough history)
    pub fn detect(&mut self, history: &[f32], latest_chunk: &[f32], range: &NoteRange) -> Option<PitchEstimate> {
        match self.strategy {
            PitchStrategy::Probabilistic => {
                let (fmin, fmax) = search_band(range);
                pyin::detect_pitch_pyin(&mut self.plans, history, range.sample_rate(), fmin, fmax)
            }
            PitchStrategy::PeakTracking => peak::detect_pitch_peak(&mut self.plans, latest_chunk, range),
        }
    }

    /// Strongest spectral peak of `chunk` within the range, as
    /// `(frequency, magnitude)`. Independent of the selected strategy.
    pub fn strongest_bin_pitch(&mut self, chunk: &[f32], range: &NoteRange) -> Option<(f32, f32)> {
        peak::strongest_bin_pitch(&mut self.plans, chunk, range)
    }
}

/// The range widened by half a semitone on each side, so endpoint notes
/// that are slightly out of tune are still found.
pub fn search_band(range: &NoteRange) -> (f32, f32) {
    let half_semitone = 2.0_f32.powf(0.5 / 12.0);
    (
        range.min_frequency() / half_semitone,
        range.max_frequency() * half_semitone,
    )
}

/// Vertex offset of the parabola through three equally spaced points, in
/// units of the spacing. Returns 0.0 when the points are collinear or the
/// vertex falls outside the middle cell.
pub(crate) fn parabolic_offset(y1: f32, y2: f32, y3: f32) -> f32 {
    let curvature = y1 - 2.0 * y2 + y3;
    let slope = (y3 - y1) / 2.0;
    if curvature.abs() <= f32::EPSILON || slope.abs() >= curvature.abs() {
        return 0.0;
    }
    -slope / curvature
}
