//! The core of the notepaddle live note analyzer.
//!
//! Captures a microphone signal, keeps a short history of it, and answers
//! two questions on demand: how much energy sits on each musical note, and
//! which single note (if any) is clearly being played right now. The crate
//! is headless; the game and visualization layers consume it through
//! [`Analyzer`].
//!
//! ```no_run
//! use notepaddle_core::{Analyzer, AnalyzerConfig};
//!
//! let mut analyzer = Analyzer::open_default(AnalyzerConfig::default())?;
//! loop {
//!     let snapshot = analyzer.snapshot();
//!     println!("{}", snapshot.strongest);
//! #   break;
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod analyzer;
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod range;
pub mod ring_buffer;
pub mod spectrum;
pub mod tuning;

pub use analyzer::{AnalysisSnapshot, Analyzer, AnalyzerState, BufferPhase, StrongestNote};
pub use config::AnalyzerConfig;
pub use error::AnalyzerError;
pub use pitch::{PitchEstimate, PitchStrategy};
pub use range::NoteRange;
pub use spectrum::SpectrumBin;
pub use tuning::Note;
