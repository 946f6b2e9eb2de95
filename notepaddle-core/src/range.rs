//! # Note Range Model
//!
//! Translates a note-name range (e.g. `C2..=C7`) into the per-bin tables the
//! spectrum and pitch passes work from: one bin per semitone, with the bin's
//! note, its center frequency and its A-weighting correction.
//!
//! A range is always derived as a whole. Adjustments build a fresh set of
//! tables and swap them in, so readers never see a partially updated range.

use crate::tuning::Note;
use log::info;

/// Default divisor applied to the sample rate to find the highest usable
/// frequency. Kept below 2.0 to leave some room under the true Nyquist limit.
pub const DEFAULT_NYQUIST_MARGIN: f32 = 2.2;

/// A-weighting values are floored here so very low bins stay finite.
const A_WEIGHTING_MIN_DB: f32 = -80.0;

/// A contiguous span of semitone bins with derived frequency tables.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRange {
    min_note: Note,
    max_note: Note,
    ceiling: Note,
    sample_rate: u32,
    notes: Vec<Note>,
    note_names: Vec<String>,
    frequencies: Vec<f32>,
    a_weighting: Vec<f32>,
}

impl NoteRange {
    /// Builds a range for `sample_rate` using the default Nyquist margin.
    pub fn new(min_note: Note, max_note: Note, sample_rate: u32) -> Self {
        Self::with_margin(min_note, max_note, sample_rate, DEFAULT_NYQUIST_MARGIN)
    }

    /// Builds a range whose ceiling is the note nearest
    /// `sample_rate / nyquist_margin`.
    pub fn with_margin(min_note: Note, max_note: Note, sample_rate: u32, nyquist_margin: f32) -> Self {
        let ceiling = ceiling_note(sample_rate, nyquist_margin);
        let mut range = Self {
            min_note,
            max_note,
            ceiling,
            sample_rate,
            notes: Vec::new(),
            note_names: Vec::new(),
            frequencies: Vec::new(),
            a_weighting: Vec::new(),
        };
        range.set_range(min_note, max_note);
        range
    }

    /// Re-derives every table for `min_note..=max_note`.
    ///
    /// Never fails. A max note above the ceiling is clamped to it, a min
    /// note above the ceiling is pulled down to it, and an inverted range
    /// collapses to a single bin at the min note.
    pub fn set_range(&mut self, min_note: Note, max_note: Note) {
        let mut min = min_note;
        let mut max = max_note;

        if max > self.ceiling {
            info!(
                "[RANGE] Requested max note {} exceeds ceiling {} at {} Hz, clamping",
                max_note, self.ceiling, self.sample_rate
            );
            max = self.ceiling;
        }
        if min > self.ceiling {
            info!("[RANGE] Requested min note {} exceeds ceiling {}, clamping", min_note, self.ceiling);
            min = self.ceiling;
        }
        if max < min {
            info!("[RANGE] Inverted range {}..{} collapsed to a single bin", min, max);
            max = min;
        }

        let notes: Vec<Note> = (min.midi()..=max.midi()).map(Note::from_midi).collect();
        let note_names = notes.iter().map(|n| n.name()).collect();
        let min_frequency = min.frequency();
        let frequencies: Vec<f32> = (0..notes.len())
            .map(|k| min_frequency * 2.0_f32.powf(k as f32 / 12.0))
            .collect();
        let a_weighting = frequencies.iter().map(|&f| a_weighting_db(f)).collect();

        self.min_note = min;
        self.max_note = max;
        self.notes = notes;
        self.note_names = note_names;
        self.frequencies = frequencies;
        self.a_weighting = a_weighting;

        info!(
            "[RANGE] Adjusted range: {} to {}, total notes: {}, fmin={:.2} fmax={:.2}",
            self.min_note,
            self.max_note,
            self.bin_count(),
            self.min_frequency(),
            self.max_frequency()
        );
    }

    /// Transposes both endpoints by `note_semitones` and moves the upper
    /// endpoint a further `range_semitones`.
    ///
    /// Not exactly invertible when the forward step hit the ceiling.
    pub fn shift(&mut self, note_semitones: i32, range_semitones: i32) {
        let min = self.min_note.transpose(note_semitones);
        let max = self
            .max_note
            .transpose(note_semitones)
            .transpose(range_semitones);
        self.set_range(min, max);
    }

    pub fn min_note(&self) -> Note {
        self.min_note
    }

    pub fn max_note(&self) -> Note {
        self.max_note
    }

    /// Highest note this sample rate allows.
    pub fn ceiling(&self) -> Note {
        self.ceiling
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn min_frequency(&self) -> f32 {
        self.frequencies[0]
    }

    pub fn max_frequency(&self) -> f32 {
        self.frequencies[self.frequencies.len() - 1]
    }

    /// One bin per semitone, both endpoints included.
    pub fn bin_count(&self) -> usize {
        self.notes.len()
    }

    pub fn num_octaves(&self) -> usize {
        self.bin_count().div_ceil(12)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note_names(&self) -> &[String] {
        &self.note_names
    }

    /// Bin center frequencies in ascending order.
    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    /// A-weighting offsets in dB, aligned with `frequencies()`.
    pub fn a_weighting(&self) -> &[f32] {
        &self.a_weighting
    }

    /// Index of the bin whose center is closest to `freq` on a log scale.
    pub fn nearest_bin(&self, freq: f32) -> Option<usize> {
        if !freq.is_finite() || freq <= 0.0 {
            return None;
        }
        let semitones = 12.0 * (freq / self.min_frequency()).log2();
        let index = semitones.round().clamp(0.0, (self.bin_count() - 1) as f32);
        Some(index as usize)
    }

    /// Whether `freq` falls inside the range, allowing half a semitone of
    /// slack on either side.
    pub fn contains_frequency(&self, freq: f32) -> bool {
        if !freq.is_finite() || freq <= 0.0 {
            return false;
        }
        let semitones = 12.0 * (freq / self.min_frequency()).log2();
        semitones >= -0.5 && semitones <= (self.bin_count() - 1) as f32 + 0.5
    }
}

/// The note nearest `sample_rate / nyquist_margin`.
pub fn ceiling_note(sample_rate: u32, nyquist_margin: f32) -> Note {
    let limit = sample_rate as f32 / nyquist_margin;
    Note::from_frequency(limit).unwrap_or(Note::from_midi(0))
}

/// A-weighting gain in dB for `freq` (IEC 61672, normalized to 0 dB at
/// 1 kHz), floored at -80 dB.
pub fn a_weighting_db(freq: f32) -> f32 {
    if !freq.is_finite() || freq <= 0.0 {
        return A_WEIGHTING_MIN_DB;
    }
    let f_sq = (freq as f64) * (freq as f64);
    let c = [
        12194.217_f64.powi(2),
        20.598997_f64.powi(2),
        107.65265_f64.powi(2),
        737.86223_f64.powi(2),
    ];
    let weight = 2.0
        + 20.0
            * (c[0].log10() + 2.0 * f_sq.log10()
                - (f_sq + c[0]).log10()
                - (f_sq + c[1]).log10()
                - 0.5 * (f_sq + c[2]).log10()
                - 0.5 * (f_sq + c[3]).log10());
    (weight as f32).max(A_WEIGHTING_MIN_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(name: &str) -> Note {
        name.parse().unwrap()
    }

    #[test]
    fn c2_to_c7_has_61_ascending_bins() {
        let range = NoteRange::new(note("C2"), note("C7"), 44100);
        assert_eq!(range.bin_count(), 61);
        assert_eq!(range.frequencies().len(), 61);
        assert_eq!(range.note_names().len(), 61);
        assert_eq!(range.a_weighting().len(), 61);
        assert!(range.frequencies().windows(2).all(|w| w[0] < w[1]));

        assert_eq!(range.max_note(), note("C7"));
        assert!(range.max_note() <= range.ceiling());
        assert_eq!(range.ceiling(), note("D#10"));
        assert_eq!(range.note_names()[0], "C2");
        assert_eq!(range.note_names()[60], "C7");
        assert_eq!(range.num_octaves(), 6);
        assert!((range.min_frequency() - 65.406).abs() < 0.01);
        assert!((range.max_frequency() - 2093.0).abs() < 0.2);
    }

    #[test]
    fn max_above_ceiling_is_clamped() {
        let range = NoteRange::new(note("C2"), note("C11"), 44100);
        assert_eq!(range.max_note(), range.ceiling());
        assert_eq!(range.bin_count(), (range.ceiling().midi() - 36 + 1) as usize);

        // A lower capture rate lowers the ceiling.
        let range = NoteRange::new(note("C2"), note("C9"), 16000);
        assert_eq!(range.max_note(), note("A#8"));
        let range = NoteRange::new(note("C2"), note("C9"), 8000);
        assert!(range.max_note() < note("C9"));
        assert!(range.max_frequency() <= 8000.0 / 2.2 * 2.0_f32.powf(0.5 / 12.0));
    }

    #[test]
    fn inverted_range_collapses_to_one_bin() {
        let range = NoteRange::new(note("C5"), note("C4"), 44100);
        assert_eq!(range.bin_count(), 1);
        assert_eq!(range.min_note(), note("C5"));
        assert_eq!(range.max_note(), note("C5"));
        assert_eq!(range.num_octaves(), 1);
    }

    #[test]
    fn shift_zero_is_identity() {
        let mut range = NoteRange::new(note("C2"), note("C7"), 44100);
        let before = range.clone();
        range.shift(0, 0);
        assert_eq!(range, before);
    }

    #[test]
    fn shift_round_trip_restores_range() {
        let mut range = NoteRange::new(note("C2"), note("C7"), 44100);
        let before = range.clone();
        range.shift(1, 0);
        assert_eq!(range.min_note(), note("C#2"));
        assert_eq!(range.max_note(), note("C#7"));
        range.shift(-1, 0);
        assert_eq!(range, before);
    }

    #[test]
    fn shift_past_ceiling_is_not_invertible() {
        let mut range = NoteRange::new(note("C2"), note("D#10"), 44100);
        range.shift(1, 0);
        assert_eq!(range.max_note(), note("D#10"));
        range.shift(-1, 0);
        assert_eq!(range.min_note(), note("C2"));
        assert_eq!(range.max_note(), note("D10"));
    }

    #[test]
    fn range_shift_zooms_upper_endpoint() {
        let mut range = NoteRange::new(note("C2"), note("C7"), 44100);
        range.shift(0, -12);
        assert_eq!(range.min_note(), note("C2"));
        assert_eq!(range.max_note(), note("C6"));
        assert_eq!(range.bin_count(), 49);
    }

    #[test]
    fn nearest_bin_and_containment() {
        let range = NoteRange::new(note("C2"), note("C7"), 44100);
        let a4 = range.nearest_bin(440.0).unwrap();
        assert_eq!(range.notes()[a4], note("A4"));
        assert_eq!(range.nearest_bin(10.0), Some(0));
        assert_eq!(range.nearest_bin(20000.0), Some(60));
        assert_eq!(range.nearest_bin(-1.0), None);
        assert!(range.contains_frequency(440.0));
        assert!(!range.contains_frequency(40.0));
        assert!(!range.contains_frequency(5000.0));
    }

    #[test]
    fn a_weighting_matches_reference_points() {
        assert!(a_weighting_db(1000.0).abs() < 0.1);
        assert!((a_weighting_db(100.0) - -19.1).abs() < 0.2);
        assert!((a_weighting_db(440.0) - -4.1).abs() < 0.2);
        assert_eq!(a_weighting_db(1.0), -80.0);
        assert_eq!(a_weighting_db(0.0), -80.0);
    }
}
