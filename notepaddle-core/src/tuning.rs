//! # Musical Tuning Module
//!
//! Note naming and equal temperament frequency math used by the range model,
//! the spectrum labels and the pitch detector.
//!
//! Notes are MIDI numbers (`C4` = 60, `A4` = 69 = 440 Hz). Names follow the
//! scientific pitch notation used by most audio tooling: sharps on output
//! (`C#4`), sharps or flats accepted on input (`Db4`, `E♭2`), and octaves
//! may be negative (`C-1` = MIDI 0).

use crate::error::AnalyzerError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Reference pitch for equal temperament.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI number of the reference pitch.
pub const A4_MIDI: i32 = 69;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Semitone offset of each natural note letter from C.
const LETTER_OFFSETS: [(char, i32); 7] = [
    ('C', 0),
    ('D', 2),
    ('E', 4),
    ('F', 5),
    ('G', 7),
    ('A', 9),
    ('B', 11),
];

/// Highest MIDI number kept in the precomputed name table (B10). This covers
/// the Nyquist ceiling of every common capture rate up to 96 kHz.
const TABLE_HIGH: i32 = 143;

/// Precomputed names for MIDI 0 (`C-1`) through `TABLE_HIGH`.
static NOTE_TABLE: Lazy<Vec<String>> = Lazy::new(|| {
    (0..=TABLE_HIGH).map(compose_name).collect()
});

/// Reverse lookup for canonical (sharp, ASCII) names.
static NOTE_MAP: Lazy<BTreeMap<&'static str, i32>> = Lazy::new(|| {
    NOTE_TABLE
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as i32))
        .collect()
});

fn compose_name(midi: i32) -> String {
    let pitch_class = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

/// A single equal-tempered pitch, identified by its MIDI number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note(i32);

impl Note {
    pub const fn from_midi(midi: i32) -> Self {
        Note(midi)
    }

    pub const fn midi(self) -> i32 {
        self.0
    }

    /// Equal temperament frequency in Hz relative to A4 = 440 Hz.
    pub fn frequency(self) -> f32 {
        A4_FREQUENCY * 2.0_f32.powf((self.0 - A4_MIDI) as f32 / 12.0)
    }

    /// Nearest note to `freq`, or `None` for non-positive or non-finite input.
    pub fn from_frequency(freq: f32) -> Option<Note> {
        let midi = midi_from_frequency(freq)?;
        Some(Note(midi.round() as i32))
    }

    /// Returns the note `semitones` above (or below, if negative) this one.
    pub fn transpose(self, semitones: i32) -> Note {
        Note(self.0.saturating_add(semitones))
    }

    /// Canonical name, e.g. `"A4"` or `"C#3"`.
    pub fn name(self) -> String {
        match usize::try_from(self.0) {
            Ok(i) if self.0 <= TABLE_HIGH => NOTE_TABLE[i].clone(),
            _ => compose_name(self.0),
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match usize::try_from(self.0) {
            Ok(i) if self.0 <= TABLE_HIGH => f.write_str(&NOTE_TABLE[i]),
            _ => f.write_str(&compose_name(self.0)),
        }
    }
}

impl FromStr for Note {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(&midi) = NOTE_MAP.get(trimmed) {
            return Ok(Note(midi));
        }
        parse_note_name(trimmed).ok_or_else(|| AnalyzerError::InvalidNote(s.to_string()))
    }
}

impl TryFrom<String> for Note {
    type Error = AnalyzerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Note> for String {
    fn from(note: Note) -> Self {
        note.name()
    }
}

/// Slow path for names outside the canonical table: flats, unicode
/// accidentals, lowercase letters, stacked accidentals and negative octaves.
fn parse_note_name(name: &str) -> Option<Note> {
    let mut chars = name.chars().peekable();
    let letter = chars.next()?.to_ascii_uppercase();
    let mut semitone = LETTER_OFFSETS
        .iter()
        .find(|(l, _)| *l == letter)
        .map(|(_, offset)| *offset)?;

    while let Some(&c) = chars.peek() {
        match c {
            '#' | '♯' => semitone += 1,
            'b' | '♭' => semitone -= 1,
            _ => break,
        }
        chars.next();
    }

    let octave_str: String = chars.collect();
    if octave_str.is_empty() {
        return None;
    }
    let octave: i32 = octave_str.parse().ok()?;

    Some(Note(12 * (octave + 1) + semitone))
}

/// Fractional MIDI number for `freq`, or `None` for non-positive or
/// non-finite input.
pub fn midi_from_frequency(freq: f32) -> Option<f32> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    Some(A4_MIDI as f32 + 12.0 * (freq / A4_FREQUENCY).log2())
}

/// Finds the closest note to a given frequency.
///
/// # Returns
/// * `Some((note, target_frequency))` - Closest note and its exact frequency
/// * `None` - The input was not a usable frequency
pub fn find_nearest_note(freq: f32) -> Option<(Note, f32)> {
    Note::from_frequency(freq).map(|note| (note, note.frequency()))
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents = 1 semitone. Positive values are sharp, negative are flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(name: &str) -> Note {
        name.parse().unwrap()
    }

    #[test]
    fn parses_canonical_names() {
        assert_eq!(note("C4").midi(), 60);
        assert_eq!(note("A4").midi(), 69);
        assert_eq!(note("C2").midi(), 36);
        assert_eq!(note("C7").midi(), 96);
        assert_eq!(note("C#3").midi(), 49);
        assert_eq!(note("C-1").midi(), 0);
    }

    #[test]
    fn parses_flats_unicode_and_lowercase() {
        assert_eq!(note("Db4"), note("C#4"));
        assert_eq!(note("E♭2"), note("D#2"));
        assert_eq!(note("F♯5"), note("F#5"));
        assert_eq!(note("bb3"), note("A#3"));
        assert_eq!(note("Cb4").midi(), 59);
        assert_eq!(note("B#3").midi(), 60);
        assert_eq!(note("C##4").midi(), 62);
        assert_eq!(note(" a4 ").midi(), 69);
        assert_eq!(note("C-2").midi(), -12);
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["", "H4", "C", "C#", "4C", "C4x", "Cx4"] {
            assert!(
                matches!(bad.parse::<Note>(), Err(AnalyzerError::InvalidNote(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn names_use_sharps() {
        assert_eq!(Note::from_midi(69).to_string(), "A4");
        assert_eq!(Note::from_midi(61).name(), "C#4");
        assert_eq!(Note::from_midi(-1).name(), "B-2");
        assert_eq!(Note::from_midi(200).name(), "G#15");
    }

    #[test]
    fn frequencies_follow_equal_temperament() {
        assert!((note("A4").frequency() - 440.0).abs() < 1e-3);
        assert!((note("A5").frequency() - 880.0).abs() < 1e-2);
        assert!((note("C2").frequency() - 65.406).abs() < 1e-2);
        assert!((note("C7").frequency() - 2093.005).abs() < 0.05);
    }

    #[test]
    fn nearest_note_rounds_to_closest_semitone() {
        assert_eq!(Note::from_frequency(440.0), Some(note("A4")));
        assert_eq!(Note::from_frequency(452.0), Some(note("A4")));
        assert_eq!(Note::from_frequency(455.0), Some(note("A#4")));
        assert_eq!(Note::from_frequency(0.0), None);
        assert_eq!(Note::from_frequency(f32::NAN), None);

        // The capture ceiling for 44.1 kHz sits at D#10.
        assert_eq!(Note::from_frequency(44100.0 / 2.2), Some(note("D#10")));
    }

    #[test]
    fn cents_deviation() {
        assert!(calculate_cents_deviation(440.0, 440.0).abs() < 1e-4);
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-3);
        let (target, freq) = find_nearest_note(445.0).unwrap();
        assert_eq!(target, note("A4"));
        assert!(calculate_cents_deviation(445.0, freq) > 0.0);
    }

    #[test]
    fn serde_uses_names() {
        let json = serde_json::to_string(&note("F#2")).unwrap();
        assert_eq!(json, "\"F#2\"");
        let back: Note = serde_json::from_str("\"Gb2\"").unwrap();
        assert_eq!(back, note("F#2"));
        assert!(serde_json::from_str::<Note>("\"Q2\"").is_err());
    }
}
