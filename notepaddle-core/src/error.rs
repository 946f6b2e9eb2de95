//! Error types for the note analyzer.
//!
//! Analysis itself never fails: out-of-range requests are clamped and
//! missing signal is reported through sentinel values. These errors cover
//! the parts that can: parsing user-supplied note names, validating the
//! configuration and bringing up the capture device.

use std::fmt;

/// Errors produced by the analyzer core.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    /// A note name could not be parsed (e.g. "H4" or "C#").
    InvalidNote(String),

    /// The analyzer configuration is unusable.
    InvalidConfig(String),

    /// No default input device is available on the host.
    NoInputDevice,

    /// The input device offers no usable sample format.
    UnsupportedFormat(String),

    /// The capture stream failed to open, start or stop.
    Stream(String),
}

impl fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerError::InvalidNote(name) => write!(f, "Invalid note name: {:?}", name),
            AnalyzerError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            AnalyzerError::NoInputDevice => write!(f, "No input device available"),
            AnalyzerError::UnsupportedFormat(msg) => write!(f, "Unsupported input format: {}", msg),
            AnalyzerError::Stream(msg) => write!(f, "Audio stream error: {}", msg),
        }
    }
}

impl std::error::Error for AnalyzerError {}
