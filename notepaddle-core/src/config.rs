//! Configuration parameters for the note analyzer

use crate::error::AnalyzerError;
use crate::pitch::PitchStrategy;
use crate::range::DEFAULT_NYQUIST_MARGIN;
use crate::tuning::Note;
use serde::{Deserialize, Serialize};

/// Analyzer configuration parameters.
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes:
///
/// ```
/// use notepaddle_core::config::AnalyzerConfig;
///
/// let config = AnalyzerConfig::from_json(r#"{ "min_note": "A2", "sensitivity_db": -30 }"#).unwrap();
/// assert_eq!(config.min_note.to_string(), "A2");
/// assert_eq!(config.chunk_size, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    // Capture
    /// Capture sample rate in Hz (default: 44100)
    pub sample_rate: u32,

    /// Samples per captured chunk (default: 1024, ~23 ms at 44.1 kHz)
    pub chunk_size: usize,

    /// Chunks kept in the ring buffer (default: 10, ~232 ms of history)
    pub num_chunks: usize,

    /// Chunks that may wait between polls before new ones are dropped
    /// (default: 32)
    pub channel_capacity: usize,

    // Note range
    /// Lowest analyzed note (default: C2)
    pub min_note: Note,

    /// Highest analyzed note, clamped to the Nyquist ceiling (default: C7)
    pub max_note: Note,

    /// The ceiling note is the one nearest `sample_rate / nyquist_margin`
    /// (default: 2.2)
    pub nyquist_margin: f32,

    // Sensitivity gate
    /// Minimum A-weighted level in dB for a note to count as strong
    /// (default: -10.0)
    pub sensitivity_db: f32,

    /// Change per sensitivity adjustment in dB (default: 2.0)
    pub sensitivity_step_db: f32,

    /// Lower bound of the sensitivity in dB (default: -120.0)
    pub sensitivity_min_db: f32,

    /// Upper bound of the sensitivity in dB (default: 0.0)
    pub sensitivity_max_db: f32,

    // Pitch detection
    /// Pitch estimator (default: probabilistic YIN over the ring buffer)
    pub pitch_strategy: PitchStrategy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            chunk_size: 1024,
            num_chunks: 10,
            channel_capacity: 32,
            min_note: Note::from_midi(36), // C2
            max_note: Note::from_midi(96), // C7
            nyquist_margin: DEFAULT_NYQUIST_MARGIN,
            sensitivity_db: -10.0,
            sensitivity_step_db: 2.0,
            sensitivity_min_db: -120.0,
            sensitivity_max_db: 0.0,
            pitch_strategy: PitchStrategy::Probabilistic,
        }
    }
}

impl AnalyzerConfig {
    /// Parses a (possibly partial) JSON configuration and validates it.
    pub fn from_json(json: &str) -> Result<Self, AnalyzerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AnalyzerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // Every field serializes to a plain JSON value.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Checks the configuration for values the analyzer cannot run with.
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if self.sample_rate == 0 {
            return Err(AnalyzerError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(AnalyzerError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.num_chunks == 0 {
            return Err(AnalyzerError::InvalidConfig("num_chunks must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(AnalyzerError::InvalidConfig("channel_capacity must be > 0".into()));
        }
        if !(self.nyquist_margin.is_finite() && self.nyquist_margin >= 2.0) {
            return Err(AnalyzerError::InvalidConfig(format!(
                "nyquist_margin must be >= 2.0, got {}",
                self.nyquist_margin
            )));
        }
        if !(self.sensitivity_step_db.is_finite() && self.sensitivity_step_db > 0.0) {
            return Err(AnalyzerError::InvalidConfig("sensitivity_step_db must be > 0".into()));
        }
        if !(self.sensitivity_min_db.is_finite()
            && self.sensitivity_max_db.is_finite()
            && self.sensitivity_min_db <= self.sensitivity_max_db)
        {
            return Err(AnalyzerError::InvalidConfig(format!(
                "sensitivity bounds [{}, {}] are invalid",
                self.sensitivity_min_db, self.sensitivity_max_db
            )));
        }
        if !self.sensitivity_db.is_finite() {
            return Err(AnalyzerError::InvalidConfig("sensitivity_db must be finite".into()));
        }
        Ok(())
    }

    /// Seconds of audio held by a full ring buffer.
    pub fn buffer_duration_secs(&self) -> f32 {
        (self.chunk_size * self.num_chunks) as f32 / self.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_setup() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.min_note.to_string(), "C2");
        assert_eq!(config.max_note.to_string(), "C7");
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.sensitivity_db, -10.0);
        assert!(config.validate().is_ok());
        assert!((config.buffer_duration_secs() - 0.2322).abs() < 1e-3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = AnalyzerConfig::from_json(
            r#"{ "max_note": "Bb5", "pitch_strategy": "peak_tracking", "num_chunks": 4 }"#,
        )
        .unwrap();
        assert_eq!(config.max_note.to_string(), "A#5");
        assert_eq!(config.pitch_strategy, PitchStrategy::PeakTracking);
        assert_eq!(config.num_chunks, 4);
        assert_eq!(config.chunk_size, 1024);
    }

    #[test]
    fn json_round_trip() {
        let config = AnalyzerConfig {
            sensitivity_db: -42.0,
            ..AnalyzerConfig::default()
        };
        let back = AnalyzerConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rejects_bad_values() {
        for json in [
            r#"{ "chunk_size": 0 }"#,
            r#"{ "num_chunks": 0 }"#,
            r#"{ "sample_rate": 0 }"#,
            r#"{ "nyquist_margin": 1.5 }"#,
            r#"{ "sensitivity_step_db": 0 }"#,
            r#"{ "sensitivity_min_db": 5, "sensitivity_max_db": -5 }"#,
            r#"{ "min_note": "H2" }"#,
            r#"{ "chunk_size": "big" }"#,
        ] {
            assert!(
                matches!(AnalyzerConfig::from_json(json), Err(AnalyzerError::InvalidConfig(_))),
                "{json} should be rejected"
            );
        }
    }
}
